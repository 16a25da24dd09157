//! Diagnostics adapter.
//!
//! Self-contained tools for checking that a client, the transport and the
//! dispatcher work end to end: an echo, a cancellable sleep, and a tool
//! that always fails with a chosen upstream status.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::mcp::adapter::{AdapterError, BackendAdapter, CallContext, Concurrency};
use crate::mcp::protocol::ToolCallResult;
use crate::mcp::registry::Tool;
use crate::mcp::schema::{Arguments, InputSchema, PropertySchema};

/// Adapter name.
pub const NAME: &str = "diagnostics";

/// Longest sleep `sleep` accepts.
pub const MAX_SLEEP: Duration = Duration::from_secs(600);

/// Async tools with no backend behind them.
#[derive(Debug, Default)]
pub struct DiagnosticsAdapter;

impl DiagnosticsAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BackendAdapter for DiagnosticsAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                "echo",
                "Return the given message unchanged, or upper-cased.",
                InputSchema::object()
                    .required_property(
                        "msg",
                        PropertySchema::string().describe("Message to echo back"),
                    )
                    .property(
                        "uppercase",
                        PropertySchema::boolean()
                            .describe("Upper-case the message")
                            .with_default(false),
                    ),
            ),
            Tool::new(
                "sleep",
                "Wait for the given number of milliseconds, then report how long it waited.",
                InputSchema::object().required_property(
                    "duration_ms",
                    PropertySchema::integer().describe("Milliseconds to wait (0-600000)"),
                ),
            ),
            Tool::new(
                "fail",
                "Always fail with the given message, as an upstream service would.",
                InputSchema::object()
                    .required_property(
                        "message",
                        PropertySchema::string().describe("Error message to report"),
                    )
                    .property(
                        "status",
                        PropertySchema::integer().describe("Upstream status code (100-599)"),
                    ),
            ),
        ]
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Concurrent
    }

    async fn invoke(
        &self,
        tool: &str,
        arguments: Arguments,
        ctx: CallContext,
    ) -> Result<ToolCallResult, AdapterError> {
        match tool {
            "echo" => Ok(echo(&arguments)),
            "sleep" => sleep(&arguments, &ctx).await,
            "fail" => Err(fail(&arguments)?),
            other => Err(AdapterError::UnsupportedTool(other.to_string())),
        }
    }
}

fn echo(arguments: &Arguments) -> ToolCallResult {
    let msg = arguments.get("msg").and_then(Value::as_str).unwrap_or_default();
    let uppercase = arguments
        .get("uppercase")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if uppercase {
        ToolCallResult::text(msg.to_uppercase())
    } else {
        ToolCallResult::text(msg)
    }
}

async fn sleep(arguments: &Arguments, ctx: &CallContext) -> Result<ToolCallResult, AdapterError> {
    let millis = integer(arguments, "duration_ms")
        .and_then(|ms| u64::try_from(ms).ok())
        .filter(|ms| u128::from(*ms) <= MAX_SLEEP.as_millis())
        .ok_or_else(|| AdapterError::InvalidArgument {
            field: "duration_ms".to_string(),
            reason: format!("must be between 0 and {}", MAX_SLEEP.as_millis()),
        })?;

    tokio::select! {
        () = tokio::time::sleep(Duration::from_millis(millis)) => {
            Ok(ToolCallResult::text(format!("Slept for {millis} ms")))
        }
        () = ctx.cancellation().cancelled() => {
            tracing::debug!(id = %ctx.request_id(), "Sleep interrupted");
            Err(AdapterError::Cancelled)
        }
    }
}

fn fail(arguments: &Arguments) -> Result<AdapterError, AdapterError> {
    let message = arguments
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let status = match integer(arguments, "status") {
        None => None,
        Some(code) => Some(
            u16::try_from(code)
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| AdapterError::InvalidArgument {
                    field: "status".to_string(),
                    reason: "must be between 100 and 599".to_string(),
                })?,
        ),
    };

    Ok(AdapterError::Upstream { message, status })
}

#[allow(clippy::cast_possible_truncation)] // Schema validation only admits whole numbers
fn integer(arguments: &Arguments, name: &str) -> Option<i64> {
    let value = arguments.get(name)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::mcp::protocol::RequestId;

    fn ctx() -> CallContext {
        CallContext::new(RequestId::Number(1), CancellationToken::new())
    }

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn echo_applies_default_and_flag() {
        let adapter = DiagnosticsAdapter::new();
        let tool = adapter.tools().into_iter().find(|t| t.name() == "echo").unwrap();

        let validated = tool.schema().validate(&json!({"msg": "hi"})).unwrap();
        assert_eq!(validated.get("uppercase"), Some(&json!(false)));
        let result = adapter.invoke("echo", validated, ctx()).await.unwrap();
        assert_eq!(result, ToolCallResult::text("hi"));

        let result = adapter
            .invoke("echo", args(json!({"msg": "hi", "uppercase": true})), ctx())
            .await
            .unwrap();
        assert_eq!(result.text_content(), "HI");
    }

    #[tokio::test]
    async fn sleep_completes() {
        let result = DiagnosticsAdapter::new()
            .invoke("sleep", args(json!({"duration_ms": 5})), ctx())
            .await
            .unwrap();
        assert_eq!(result.text_content(), "Slept for 5 ms");
    }

    #[tokio::test]
    async fn sleep_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(RequestId::Number(2), token.clone());
        token.cancel();

        let err = DiagnosticsAdapter::new()
            .invoke("sleep", args(json!({"duration_ms": 60_000})), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled));
    }

    #[tokio::test]
    async fn sleep_rejects_negative_duration() {
        let err = DiagnosticsAdapter::new()
            .invoke("sleep", args(json!({"duration_ms": -1})), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidArgument { ref field, .. } if field == "duration_ms"));
    }

    #[tokio::test]
    async fn fail_reports_upstream_status() {
        let err = DiagnosticsAdapter::new()
            .invoke("fail", args(json!({"message": "bad gateway", "status": 502})), ctx())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.to_string(), "bad gateway");
    }

    #[tokio::test]
    async fn fail_rejects_bogus_status() {
        let err = DiagnosticsAdapter::new()
            .invoke("fail", args(json!({"message": "x", "status": 42})), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_is_unsupported() {
        let err = DiagnosticsAdapter::new()
            .invoke("reboot", Arguments::new(), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedTool(_)));
    }
}
