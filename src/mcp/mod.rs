//! Model Context Protocol (MCP) tool-invocation runtime.
//!
//! This module exposes the tools of the configured backend adapters to AI
//! assistants over JSON-RPC 2.0, on either of two transports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            MCP Runtime                           │
//! │                                                                  │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────────────┐  │
//! │   │  Transport  │───▶│  Dispatcher │───▶│   Tool Registry     │  │
//! │   │ stdio / SSE │    │  (session)  │    │ (schema + adapter)  │  │
//! │   └─────────────┘    └─────────────┘    └─────────────────────┘  │
//! │          ▲                  │                      │             │
//! │          │                  ▼                      ▼             │
//! │          │           ┌─────────────┐    ┌─────────────────────┐  │
//! │          └───────────│ Error Mapper│◀───│   Backend Adapter   │  │
//! │                      └─────────────┘    └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod adapter;
pub mod dispatcher;
pub mod fault;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod session;
pub mod transport;

pub use adapter::{
    AdapterError, BackendAdapter, Blocking, BlockingAdapter, CallContext, Concurrency, WorkerPool,
};
pub use dispatcher::{Dispatch, Dispatcher, PendingCall};
pub use fault::{FaultClass, Mapped, McpFault};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, OutgoingMessage, RequestId, ToolCallResult,
    MCP_PROTOCOL_VERSION,
};
pub use registry::{RegistryError, Tool, ToolHandler, ToolRegistry};
pub use schema::{Arguments, InputSchema, PropertyKind, PropertySchema, SchemaError, ValidationError};
pub use server::{ConnectionState, McpServer};
pub use session::Session;
pub use transport::StdioTransport;
