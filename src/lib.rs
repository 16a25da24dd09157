//! homelab-mcp: MCP server exposing homelab backends as schema-described tools
//!
//! This library provides the tool-invocation runtime that lets AI assistants
//! list and call tools backed by homelab services, over either stdio or
//! HTTP/SSE.
//!
//! # Architecture
//!
//! The runtime is written once against a single capability interface:
//!
//! - **Backend adapters** supply tools (name, description, input schema) and
//!   run them with already validated arguments
//! - **The registry** binds tool names to adapters, in registration order
//! - **The dispatcher** validates arguments, enforces per-call deadlines and
//!   cancellation, and maps every failure to a uniform result
//!
//! A failing backend never takes down its session or the process.
//!
//! # Modules
//!
//! - [`adapters`]: Built-in backend adapters
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Startup error types
//! - [`mcp`]: MCP protocol implementation

pub mod adapters;
pub mod config;
pub mod error;
pub mod mcp;
