//! Method routing for one session.
//!
//! [`Dispatcher::accept`] handles everything that can be answered at once
//! (`initialize`, `ping`, `tools/list`, notifications and every kind of
//! rejected call) and turns a valid `tools/call` into a [`PendingCall`].
//! Transports spawn pending calls so several can be in flight per session;
//! `accept` itself is synchronous, so messages are registered in arrival
//! order and a cancellation can never overtake the call it names.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::task::JoinError;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::mcp::adapter::{AdapterError, CallContext};
use crate::mcp::fault::McpFault;
use crate::mcp::protocol::{
    CancelledParams, IncomingMessage, InitializeParams, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, OutgoingMessage, RequestId, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolCallResult, CANCELLED_NOTIFICATION, MCP_PROTOCOL_VERSION,
};
use crate::mcp::registry::ToolHandler;
use crate::mcp::schema::Arguments;
use crate::mcp::session::Session;

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do with an accepted message.
#[derive(Debug)]
pub enum Dispatch {
    /// Send this reply now.
    Reply(OutgoingMessage),
    /// Run this tool call; it produces its own reply.
    Call(PendingCall),
    /// Nothing to send.
    Silent,
}

/// Routes decoded messages for a session.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    call_timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl Dispatcher {
    /// Creates a dispatcher bounding each adapter call by `call_timeout`.
    #[must_use]
    pub const fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    /// The per-call deadline.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Accepts one message for `session`.
    pub fn accept(&self, session: &Arc<Session>, message: IncomingMessage) -> Dispatch {
        match message {
            IncomingMessage::Request(req) => self.accept_request(session, req),
            IncomingMessage::Notification(notif) => {
                Self::handle_notification(session, &notif);
                Dispatch::Silent
            }
        }
    }

    /// Accepts one message and runs it to completion.
    ///
    /// Returns the reply, if the message produces one.
    pub async fn dispatch(
        &self,
        session: &Arc<Session>,
        message: IncomingMessage,
    ) -> Option<OutgoingMessage> {
        match self.accept(session, message) {
            Dispatch::Reply(reply) => Some(reply),
            Dispatch::Call(call) => call.run().await,
            Dispatch::Silent => None,
        }
    }

    fn accept_request(&self, session: &Arc<Session>, req: JsonRpcRequest) -> Dispatch {
        let id = req.id.clone();
        let outcome = match req.method.as_str() {
            "initialize" => Self::handle_initialize(session, &req).map(Dispatch::Reply),
            "ping" => Ok(Dispatch::Reply(
                JsonRpcResponse::success(req.id, json!({})).into(),
            )),
            "tools/list" => Self::handle_tools_list(session, &req).map(Dispatch::Reply),
            "tools/call" => self.handle_tools_call(session, req),
            other => Err(McpFault::UnknownMethod(other.to_string())),
        };

        outcome.unwrap_or_else(|fault| {
            tracing::debug!(session = %session.id(), id = %id, error = %fault, "Request rejected");
            Dispatch::Reply(fault.into_response(Some(id)))
        })
    }

    fn handle_initialize(
        session: &Session,
        req: &JsonRpcRequest,
    ) -> Result<OutgoingMessage, McpFault> {
        let params: InitializeParams = parse_params(req.params.as_ref())
            .map_err(|e| McpFault::InvalidParams(format!("Invalid initialize params: {e}")))?
            .unwrap_or_default();

        session.initialize(params.client_info.as_ref())?;

        if let Some(requested) = params
            .protocol_version
            .as_deref()
            .filter(|v| *v != MCP_PROTOCOL_VERSION)
        {
            tracing::debug!(requested, "Client asked for a different protocol version");
        }
        tracing::info!(
            session = %session.id(),
            client = session.client_name().unwrap_or("unknown"),
            "Session initialised"
        );

        let registry = session.registry();
        let result = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
            "instructions": format!(
                "{} tool(s) available from adapters: {}",
                registry.len(),
                registry.adapter_names().join(", ")
            ),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result).into())
    }

    fn handle_tools_list(
        session: &Session,
        req: &JsonRpcRequest,
    ) -> Result<OutgoingMessage, McpFault> {
        session.require_initialized()?;

        let result = json!({ "tools": session.registry().definitions() });
        Ok(JsonRpcResponse::success(req.id.clone(), result).into())
    }

    fn handle_tools_call(
        &self,
        session: &Arc<Session>,
        req: JsonRpcRequest,
    ) -> Result<Dispatch, McpFault> {
        session.require_initialized()?;

        let params: ToolCallParams = parse_params(req.params.as_ref())
            .map_err(|e| McpFault::InvalidParams(format!("Invalid tool call params: {e}")))?
            .ok_or_else(|| McpFault::InvalidParams("Missing tool call params".to_string()))?;

        let token = session.begin(req.id.clone())?;

        let prepared = session
            .registry()
            .resolve(&params.name)
            .map_err(McpFault::from)
            .and_then(|entry| {
                let arguments = entry.tool().schema().validate(&params.arguments)?;
                Ok((entry.handler().clone(), arguments))
            });

        match prepared {
            Ok((handler, arguments)) => Ok(Dispatch::Call(PendingCall {
                session: Arc::clone(session),
                id: req.id,
                tool: params.name,
                handler,
                arguments,
                token,
                deadline: self.call_timeout,
            })),
            Err(fault) => {
                session.finish(&req.id);
                Err(fault)
            }
        }
    }

    fn handle_notification(session: &Session, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                tracing::debug!(session = %session.id(), "Client confirmed initialisation");
            }
            CANCELLED_NOTIFICATION => {
                match parse_params::<CancelledParams>(notif.params.as_ref()) {
                    Ok(Some(params)) => {
                        if session.cancel(&params.request_id) {
                            tracing::info!(
                                session = %session.id(),
                                id = %params.request_id,
                                reason = params.reason.as_deref().unwrap_or(""),
                                "Request cancelled"
                            );
                        } else {
                            tracing::debug!(
                                session = %session.id(),
                                id = %params.request_id,
                                "Cancellation for unknown or finished request ignored"
                            );
                        }
                    }
                    Ok(None) => tracing::warn!("Cancellation without params ignored"),
                    Err(e) => tracing::warn!(error = %e, "Malformed cancellation ignored"),
                }
            }
            other => tracing::debug!(method = other, "Ignoring unknown notification"),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> serde_json::Result<Option<T>> {
    params
        .filter(|p| !p.is_null())
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
}

/// A validated tool call waiting to run.
#[derive(Debug)]
pub struct PendingCall {
    session: Arc<Session>,
    id: RequestId,
    tool: String,
    handler: ToolHandler,
    arguments: Arguments,
    token: CancellationToken,
    deadline: Duration,
}

enum Outcome {
    Cancelled,
    Finished(Result<Result<ToolCallResult, AdapterError>, JoinError>),
    TimedOut,
}

impl PendingCall {
    /// The request being answered.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// The tool being called.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Runs the adapter call under the deadline.
    ///
    /// Returns `None` if the call was cancelled, in which case nothing may
    /// be sent for its ID.
    pub async fn run(self) -> Option<OutgoingMessage> {
        let Self {
            session,
            id,
            tool,
            handler,
            arguments,
            token,
            deadline,
        } = self;

        let adapter = handler.adapter_name().to_string();
        let started = Instant::now();
        tracing::debug!(session = %session.id(), id = %id, tool = %tool, adapter = %adapter, "Calling tool");

        // Spawned so a panicking adapter surfaces as a JoinError.
        let ctx = CallContext::new(id.clone(), token.clone());
        let task_tool = tool.clone();
        let mut task =
            tokio::spawn(async move { handler.invoke(&task_tool, arguments, ctx).await });

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Outcome::Cancelled,
            joined = time::timeout(deadline, &mut task) => match joined {
                Ok(joined) => Outcome::Finished(joined),
                Err(_) => Outcome::TimedOut,
            },
        };

        let result = match outcome {
            Outcome::Cancelled => {
                task.abort();
                tracing::debug!(session = %session.id(), id = %id, tool = %tool, "Dropped cancelled call");
                return None;
            }
            Outcome::TimedOut => {
                token.cancel();
                task.abort();
                tracing::warn!(tool = %tool, deadline_ms = deadline.as_millis(), "Tool call timed out");
                Err(McpFault::DeadlineExceeded {
                    tool: tool.clone(),
                    deadline,
                })
            }
            Outcome::Finished(Ok(Ok(result))) => Ok(result),
            Outcome::Finished(Ok(Err(error))) => {
                tracing::warn!(tool = %tool, adapter = %adapter, error = %error, "Tool call failed");
                Err(McpFault::from_adapter(&adapter, error))
            }
            Outcome::Finished(Err(join)) => {
                tracing::error!(tool = %tool, adapter = %adapter, error = %join, "Tool handler crashed");
                Err(McpFault::Backend {
                    adapter: adapter.clone(),
                    message: format!("adapter '{adapter}' crashed while running '{tool}'"),
                    status: None,
                })
            }
        };

        if !session.finish(&id) {
            tracing::debug!(session = %session.id(), id = %id, "Result for resolved request dropped");
            return None;
        }

        tracing::info!(
            tool = %tool,
            is_error = result.as_ref().map_or(true, |r| r.is_error),
            elapsed_ms = started.elapsed().as_millis(),
            "Tool call finished"
        );

        Some(match result {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value).into(),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialise tool call result");
                    JsonRpcError::internal_error(id, "Internal error: failed to serialise result")
                        .into()
                }
            },
            Err(fault) => fault.into_response(Some(id)),
        })
    }
}
