//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use homelab_mcp::mcp::adapter::{
    AdapterError, BackendAdapter, BlockingAdapter, CallContext, Concurrency,
};
use homelab_mcp::mcp::dispatcher::Dispatcher;
use homelab_mcp::mcp::protocol::{parse_message, ToolCallResult};
use homelab_mcp::mcp::registry::{Tool, ToolRegistry};
use homelab_mcp::mcp::schema::{Arguments, InputSchema, PropertySchema};
use homelab_mcp::mcp::session::Session;

/// Stub backend with call accounting.
///
/// Tools (each prefixed with the adapter's prefix):
///
/// - `echo {msg: string, delay_ms?: integer}` returns `msg`
/// - `fail {}` fails with an upstream 502
/// - `panic {}` panics
/// - `hang {}` waits until cancelled
pub struct StubAdapter {
    name: &'static str,
    prefix: &'static str,
    concurrency: Concurrency,
    pub calls: AtomicUsize,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub cancelled: AtomicUsize,
}

impl StubAdapter {
    pub fn new() -> Self {
        Self::with("stub", "", Concurrency::Concurrent)
    }

    pub fn serialized(name: &'static str, prefix: &'static str) -> Self {
        Self::with(name, prefix, Concurrency::Serialized)
    }

    pub fn with(name: &'static str, prefix: &'static str, concurrency: Concurrency) -> Self {
        Self {
            name,
            prefix,
            concurrency,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn tool(&self, name: &str, description: &str, schema: InputSchema) -> Tool {
        Tool::new(format!("{}{name}", self.prefix), description, schema)
    }
}

#[async_trait]
impl BackendAdapter for StubAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            self.tool(
                "echo",
                "Echo a message",
                InputSchema::object()
                    .required_property("msg", PropertySchema::string())
                    .property("delay_ms", PropertySchema::integer()),
            ),
            self.tool("fail", "Always fails", InputSchema::object()),
            self.tool("panic", "Always panics", InputSchema::object()),
            self.tool("hang", "Never finishes", InputSchema::object()),
        ]
    }

    fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    async fn invoke(
        &self,
        tool: &str,
        arguments: Arguments,
        ctx: CallContext,
    ) -> Result<ToolCallResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match tool.strip_prefix(self.prefix).unwrap_or(tool) {
            "echo" => {
                if let Some(ms) = arguments.get("delay_ms").and_then(Value::as_u64) {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                let msg = arguments.get("msg").and_then(Value::as_str).unwrap_or_default();
                Ok(ToolCallResult::text(msg))
            }
            "fail" => Err(AdapterError::upstream_status(502, "upstream exploded")),
            "panic" => panic!("stub adapter panicked"),
            "hang" => {
                ctx.cancellation().cancelled().await;
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Cancelled)
            }
            other => Err(AdapterError::UnsupportedTool(other.to_string())),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Serialised blocking backend whose only tool, `slow_op {}`, holds the
/// calling thread for `hold` and ignores cancellation.
pub struct SlowBlocking {
    hold: Duration,
    pub calls: Arc<AtomicUsize>,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl SlowBlocking {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            calls: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BlockingAdapter for SlowBlocking {
    fn name(&self) -> &str {
        "slow"
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::new("slow_op", "Blocks for a while", InputSchema::object())]
    }

    fn invoke(
        &self,
        _tool: &str,
        _arguments: &Arguments,
        _ctx: &CallContext,
    ) -> Result<ToolCallResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.hold);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolCallResult::text("done"))
    }
}

/// Builds a registry from adapters, in order.
pub fn registry(adapters: Vec<Arc<dyn BackendAdapter>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for adapter in adapters {
        registry.register_adapter(adapter).unwrap();
    }
    Arc::new(registry)
}

/// A session over a single stub adapter, plus the adapter.
pub fn stub_session() -> (Arc<Session>, Arc<StubAdapter>) {
    let stub = Arc::new(StubAdapter::new());
    let session = Arc::new(Session::new(registry(vec![stub.clone() as Arc<dyn BackendAdapter>])));
    (session, stub)
}

/// Builds a request line.
pub fn request(id: impl Into<Value>, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id.into(), "method": method, "params": params}).to_string()
}

/// Builds a `tools/call` request line.
pub fn call(id: impl Into<Value>, tool: &str, arguments: Value) -> String {
    request(id, "tools/call", json!({"name": tool, "arguments": arguments}))
}

/// Builds an `initialize` request line.
pub fn initialize(id: impl Into<Value>) -> String {
    request(
        id,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }),
    )
}

/// Dispatches one line and returns the reply as JSON.
pub async fn send(dispatcher: &Dispatcher, session: &Arc<Session>, line: &str) -> Option<Value> {
    let reply = dispatcher
        .dispatch(session, parse_message(line).unwrap())
        .await?;
    Some(serde_json::from_str(&reply.to_json().unwrap()).unwrap())
}
