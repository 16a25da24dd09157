//! Fault taxonomy and error mapping.
//!
//! Every failure reaching the dispatcher or a transport is an [`McpFault`].
//! [`map`] classifies it by origin and decides how it reaches the caller:
//!
//! | Class     | Examples                                   | Outcome                        |
//! |-----------|--------------------------------------------|--------------------------------|
//! | Client    | bad arguments, unknown tool/method, order  | error result, session stays    |
//! | Backend   | upstream error, deadline exceeded          | error result, session stays    |
//! | Transport | undecodable frame                          | error envelope, connection ends|

use std::time::Duration;

use thiserror::Error;

use crate::mcp::adapter::AdapterError;
use crate::mcp::protocol::{
    ErrorCode, JsonRpcError, JsonRpcErrorData, JsonRpcResponse, OutgoingMessage, RequestId,
    ToolCallResult, NOT_INITIALISED, SESSION_NOT_FOUND,
};
use crate::mcp::registry::RegistryError;
use crate::mcp::schema::ValidationError;

/// Where a fault originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// The caller sent something wrong.
    Client,
    /// A backend adapter failed.
    Backend,
    /// The transport could not decode a frame.
    Transport,
}

/// Every failure the runtime knows about.
#[derive(Debug, Error)]
pub enum McpFault {
    /// Arguments do not match the tool's schema.
    #[error("Invalid arguments: {0}")]
    Validation(#[from] ValidationError),

    /// No tool with this name is registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The method is not part of the protocol.
    #[error("Method not found: {0}")]
    UnknownMethod(String),

    /// Method parameters are missing or malformed.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The request ID is already in flight in this session.
    #[error("Request id {0} is already in flight")]
    DuplicateRequest(RequestId),

    /// A method other than `initialize` arrived first.
    #[error("Server not initialised")]
    NotInitialized,

    /// `initialize` arrived a second time.
    #[error("Server already initialised")]
    AlreadyInitialized,

    /// The backend adapter failed.
    #[error("Error: {message}")]
    Backend {
        /// Adapter name.
        adapter: String,
        /// Adapter-supplied detail.
        message: String,
        /// Upstream status code, if known.
        status: Option<u16>,
    },

    /// The adapter call exceeded its deadline.
    #[error("Deadline exceeded: tool '{tool}' did not complete within {} ms", .deadline.as_millis())]
    DeadlineExceeded {
        /// Tool name.
        tool: String,
        /// The configured bound.
        deadline: Duration,
    },

    /// The HTTP/SSE session does not exist (or its stream has closed).
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A frame could not be decoded.
    #[error("Framing error: {0}")]
    Framing(String),
}

/// What a fault turns into on the wire.
#[derive(Debug, Clone)]
pub enum Mapped {
    /// A tool result with `isError: true`.
    CallResult(ToolCallResult),
    /// A JSON-RPC error; the session continues.
    Protocol(JsonRpcErrorData),
    /// A JSON-RPC error after which the connection is closed.
    CloseConnection(JsonRpcErrorData),
}

impl McpFault {
    /// Wraps an adapter error, keeping argument problems as client faults.
    #[must_use]
    pub fn from_adapter(adapter: &str, error: AdapterError) -> Self {
        match error {
            AdapterError::InvalidArgument { field, reason } => {
                Self::Validation(ValidationError::new(field, reason))
            }
            AdapterError::UnsupportedTool(tool) => Self::UnknownTool(tool),
            other => Self::Backend {
                adapter: adapter.to_string(),
                status: other.status(),
                message: other.to_string(),
            },
        }
    }

    /// Classifies the fault by origin.
    #[must_use]
    pub const fn class(&self) -> FaultClass {
        match self {
            Self::Validation(_)
            | Self::UnknownTool(_)
            | Self::UnknownMethod(_)
            | Self::InvalidParams(_)
            | Self::DuplicateRequest(_)
            | Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::SessionNotFound(_) => FaultClass::Client,
            Self::Backend { .. } | Self::DeadlineExceeded { .. } => FaultClass::Backend,
            Self::Framing(_) => FaultClass::Transport,
        }
    }

    /// Caller-facing diagnostic text.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Backend {
                status: Some(status),
                ..
            } => format!("{self} (upstream status {status})"),
            _ => self.to_string(),
        }
    }

    /// Maps the fault to its wire outcome.
    #[must_use]
    pub fn map(&self) -> Mapped {
        let text = self.diagnostic();
        match self {
            Self::Validation(_)
            | Self::UnknownTool(_)
            | Self::Backend { .. }
            | Self::DeadlineExceeded { .. } => Mapped::CallResult(ToolCallResult::error(text)),
            Self::UnknownMethod(_) => {
                Mapped::Protocol(JsonRpcErrorData::with_message(ErrorCode::MethodNotFound, text))
            }
            Self::InvalidParams(_) => {
                Mapped::Protocol(JsonRpcErrorData::with_message(ErrorCode::InvalidParams, text))
            }
            Self::DuplicateRequest(_) | Self::AlreadyInitialized => {
                Mapped::Protocol(JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, text))
            }
            Self::NotInitialized => {
                Mapped::Protocol(JsonRpcErrorData::with_message(NOT_INITIALISED, text))
            }
            Self::SessionNotFound(_) => {
                Mapped::Protocol(JsonRpcErrorData::with_message(SESSION_NOT_FOUND, text))
            }
            Self::Framing(_) => {
                Mapped::CloseConnection(JsonRpcErrorData::with_message(ErrorCode::ParseError, text))
            }
        }
    }

    /// Builds the envelope answering request `id`.
    #[must_use]
    pub fn into_response(self, id: Option<RequestId>) -> OutgoingMessage {
        match (self.map(), id) {
            (Mapped::CallResult(result), Some(id)) => match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value).into(),
                Err(e) => JsonRpcError::internal_error(id, format!("failed to serialise result: {e}")).into(),
            },
            (Mapped::CallResult(result), None) => JsonRpcError::new(
                None,
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, result.text_content()),
            )
            .into(),
            (Mapped::Protocol(data) | Mapped::CloseConnection(data), id) => {
                JsonRpcError::new(id, data).into()
            }
        }
    }
}

impl From<RegistryError> for McpFault {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::UnknownTool(name) => Self::UnknownTool(name),
            RegistryError::DuplicateTool { name, existing } => Self::Backend {
                adapter: existing,
                message: format!("tool '{name}' is registered twice"),
                status: None,
            },
            RegistryError::Connect { adapter, source } => Self::from_adapter(&adapter, source),
        }
    }
}

/// Maps a fault to its wire outcome. Total over [`McpFault`].
#[must_use]
pub fn map(fault: &McpFault) -> Mapped {
    fault.map()
}
