//! Tool registry.
//!
//! Maps tool names to their declaration and the adapter that runs them.
//! The registry is assembled once at startup from the configured adapters
//! and is read-only afterwards; sessions share it through an [`Arc`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::mcp::adapter::{AdapterError, BackendAdapter, CallContext, Concurrency};
use crate::mcp::protocol::{ToolCallResult, ToolDefinition};
use crate::mcp::schema::{Arguments, InputSchema, SchemaError};

/// A named, schema-described operation.
#[derive(Debug, Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    schema: InputSchema,
}

impl Tool {
    /// Creates a tool from a typed schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: InputSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: schema.to_json(),
            schema,
        }
    }

    /// Creates a tool from a declared JSON Schema document.
    ///
    /// The document is kept verbatim for listing.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the document is not a supported schema.
    pub fn from_declared(
        name: impl Into<String>,
        description: impl Into<String>,
        document: Value,
    ) -> Result<Self, SchemaError> {
        let schema = InputSchema::from_json(&document)?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            input_schema: document,
            schema,
        })
    }

    /// Unique tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The declared input schema document.
    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// The typed schema used for validation.
    #[must_use]
    pub const fn schema(&self) -> &InputSchema {
        &self.schema
    }

    /// Wire form for `tools/list`.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition<'_> {
        ToolDefinition {
            name: &self.name,
            description: &self.description,
            input_schema: &self.input_schema,
        }
    }
}

/// The callable bound to a tool.
///
/// Serialised adapters share one gate across all of their tools. The turn
/// travels inside the call's [`CallContext`], so it is released only when
/// the adapter is done with the call, not when the caller gives up.
#[derive(Clone)]
pub struct ToolHandler {
    adapter: Arc<dyn BackendAdapter>,
    gate: Option<Arc<Mutex<()>>>,
}

impl ToolHandler {
    /// Binds a handler to `adapter`, honouring its declared concurrency.
    #[must_use]
    pub fn new(adapter: Arc<dyn BackendAdapter>) -> Self {
        let gate = match adapter.concurrency() {
            Concurrency::Concurrent => None,
            Concurrency::Serialized => Some(Arc::new(Mutex::new(()))),
        };
        Self { adapter, gate }
    }

    /// Name of the bound adapter.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    /// Returns `true` if calls through this handler are serialised.
    #[must_use]
    pub const fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    /// Invokes `tool` on the bound adapter.
    ///
    /// # Errors
    ///
    /// Propagates the adapter's error.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: Arguments,
        ctx: CallContext,
    ) -> Result<ToolCallResult, AdapterError> {
        let ctx = match &self.gate {
            Some(gate) => ctx.holding(Arc::clone(gate).lock_owned().await),
            None => ctx,
        };
        self.adapter.invoke(tool, arguments, ctx).await
    }
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolHandler")
            .field("adapter", &self.adapter.name())
            .field("serialized", &self.gate.is_some())
            .finish()
    }
}

/// A tool together with its handler.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    tool: Tool,
    handler: ToolHandler,
}

impl RegisteredTool {
    /// The tool declaration.
    #[must_use]
    pub const fn tool(&self) -> &Tool {
        &self.tool
    }

    /// The bound handler.
    #[must_use]
    pub const fn handler(&self) -> &ToolHandler {
        &self.handler
    }
}

/// Errors raised while building or querying the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A tool name was registered twice.
    #[error("tool '{name}' is already registered (by adapter '{existing}')")]
    DuplicateTool {
        /// Tool name.
        name: String,
        /// Adapter that registered it first.
        existing: String,
    },

    /// No tool with this name exists.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// An adapter failed its startup health check.
    #[error("adapter '{adapter}' failed to connect")]
    Connect {
        /// Adapter name.
        adapter: String,
        /// The adapter's error.
        #[source]
        source: AdapterError,
    },
}

/// Ordered, immutable-after-construction tool table.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: IndexMap<String, RegisteredTool>,
    adapters: Vec<String>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects every adapter, then registers all of their tools.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Connect`] if an adapter fails its health
    /// check, or [`RegistryError::DuplicateTool`] on a name clash.
    pub async fn from_adapters(
        adapters: Vec<Arc<dyn BackendAdapter>>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for adapter in adapters {
            let name = adapter.name().to_string();
            adapter
                .connect()
                .await
                .map_err(|source| RegistryError::Connect {
                    adapter: name.clone(),
                    source,
                })?;
            let count = registry.register_adapter(adapter)?;
            debug!(adapter = %name, tools = count, "Adapter registered");
        }
        info!(
            tools = registry.len(),
            adapters = ?registry.adapters,
            "Tool registry built"
        );
        Ok(registry)
    }

    /// Registers every tool of `adapter` behind one shared handler.
    ///
    /// Returns the number of tools registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] on a name clash; tools
    /// registered before the clash remain.
    pub fn register_adapter(
        &mut self,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Result<usize, RegistryError> {
        let handler = ToolHandler::new(Arc::clone(&adapter));
        let tools = adapter.tools();
        let count = tools.len();
        for tool in tools {
            self.register(tool, handler.clone())?;
        }
        self.adapters.push(adapter.name().to_string());
        Ok(count)
    }

    /// Registers a single tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] if the name is taken.
    pub fn register(&mut self, tool: Tool, handler: ToolHandler) -> Result<(), RegistryError> {
        if let Some(existing) = self.entries.get(tool.name()) {
            return Err(RegistryError::DuplicateTool {
                name: tool.name().to_string(),
                existing: existing.handler.adapter_name().to_string(),
            });
        }
        self.entries
            .insert(tool.name().to_string(), RegisteredTool { tool, handler });
        Ok(())
    }

    /// Tools in registration order.
    pub fn list(&self) -> impl Iterator<Item = &Tool> + '_ {
        self.entries.values().map(RegisteredTool::tool)
    }

    /// Wire definitions in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition<'_>> {
        self.list().map(Tool::definition).collect()
    }

    /// Looks up a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownTool`] if no such tool exists.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool, RegistryError> {
        self.entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// Names of the registered adapters, in registration order.
    #[must_use]
    pub fn adapter_names(&self) -> &[String] {
        &self.adapters
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::mcp::schema::PropertySchema;

    struct Fixed {
        name: &'static str,
        tools: Vec<&'static str>,
        concurrency: Concurrency,
        healthy: bool,
    }

    #[async_trait]
    impl BackendAdapter for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn tools(&self) -> Vec<Tool> {
            self.tools
                .iter()
                .map(|name| Tool::new(*name, format!("{name} tool"), InputSchema::object()))
                .collect()
        }

        fn concurrency(&self) -> Concurrency {
            self.concurrency
        }

        async fn connect(&self) -> Result<(), AdapterError> {
            if self.healthy {
                Ok(())
            } else {
                Err(AdapterError::Unavailable("connection refused".into()))
            }
        }

        async fn invoke(
            &self,
            tool: &str,
            _arguments: Arguments,
            _ctx: CallContext,
        ) -> Result<ToolCallResult, AdapterError> {
            Ok(ToolCallResult::text(tool))
        }
    }

    fn fixed(name: &'static str, tools: Vec<&'static str>) -> Arc<dyn BackendAdapter> {
        Arc::new(Fixed {
            name,
            tools,
            concurrency: Concurrency::Concurrent,
            healthy: true,
        })
    }

    #[test]
    fn list_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register_adapter(fixed("containers", vec!["list_containers", "get_logs"]))
            .unwrap();
        registry
            .register_adapter(fixed("downloads", vec!["add_torrent"]))
            .unwrap();

        let names: Vec<_> = registry.list().map(Tool::name).collect();
        assert_eq!(names, ["list_containers", "get_logs", "add_torrent"]);
        assert_eq!(registry.adapter_names(), ["containers", "downloads"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry
            .register_adapter(fixed("media-server", vec!["search"]))
            .unwrap();
        let err = registry
            .register_adapter(fixed("media-management", vec!["search"]))
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::DuplicateTool { ref name, ref existing }
                if name == "search" && existing == "media-server"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        let err = registry.resolve("set_weather").unwrap_err();
        assert_eq!(err.to_string(), "unknown tool: set_weather");
    }

    #[test]
    fn declared_schema_is_listed_verbatim() {
        let document = json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "Entity ID (e.g., light.living_room)"}
            },
            "required": ["entity_id"]
        });
        let tool = Tool::from_declared("turn_on", "Turn on an entity", document.clone()).unwrap();

        let mut registry = ToolRegistry::new();
        registry
            .register(tool, ToolHandler::new(fixed("homeautomation", vec![])))
            .unwrap();

        let listed = serde_json::to_value(registry.definitions()).unwrap();
        assert_eq!(
            listed,
            json!([{"name": "turn_on", "description": "Turn on an entity", "inputSchema": document}])
        );
    }

    #[test]
    fn builder_schema_is_rendered() {
        let tool = Tool::new(
            "scan_library",
            "Trigger a library scan",
            InputSchema::object().required_property("library_id", PropertySchema::string()),
        );
        assert_eq!(tool.input_schema()["required"], json!(["library_id"]));
    }

    #[test]
    fn serialized_adapters_get_a_gate() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(Fixed {
            name: "network",
            tools: vec!["block_client"],
            concurrency: Concurrency::Serialized,
            healthy: true,
        });
        assert!(ToolHandler::new(adapter).is_serialized());
        assert!(!ToolHandler::new(fixed("gaming", vec![])).is_serialized());
    }

    #[tokio::test]
    async fn failed_connect_aborts_build() {
        let adapters: Vec<Arc<dyn BackendAdapter>> = vec![
            fixed("workflows", vec!["list_workflows"]),
            Arc::new(Fixed {
                name: "virtualization",
                tools: vec!["list_vms"],
                concurrency: Concurrency::Concurrent,
                healthy: false,
            }),
        ];

        let err = ToolRegistry::from_adapters(adapters).await.unwrap_err();
        assert!(matches!(err, RegistryError::Connect { ref adapter, .. } if adapter == "virtualization"));
    }
}
