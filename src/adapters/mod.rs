//! Built-in backend adapters.
//!
//! Real homelab integrations (virtualisation host, container engine,
//! torrent daemon, ...) plug in as further [`BackendAdapter`]s. The crate
//! ships two self-contained ones so the server is usable out of the box:
//!
//! - [`diagnostics`]: async, concurrent. `echo`, `sleep`, `fail`.
//! - [`host`]: blocking, serialised. `host_info`, `load_average`.

pub mod diagnostics;
pub mod host;

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::mcp::adapter::{AdapterError, BackendAdapter, Blocking, WorkerPool};
use crate::mcp::protocol::ToolCallResult;

pub use diagnostics::DiagnosticsAdapter;
pub use host::HostAdapter;

/// Builds the adapters enabled in `config`, in registration order.
///
/// Blocking adapters share `pool`.
#[must_use]
pub fn build_adapters(config: &Config, pool: &WorkerPool) -> Vec<Arc<dyn BackendAdapter>> {
    let mut adapters: Vec<Arc<dyn BackendAdapter>> = Vec::new();

    if config.adapters.diagnostics.enabled {
        adapters.push(Arc::new(DiagnosticsAdapter::new()));
    }
    if config.adapters.host.enabled {
        adapters.push(Arc::new(Blocking::new(HostAdapter::new(), pool.clone())));
    }

    tracing::debug!(count = adapters.len(), "Adapters configured");
    adapters
}

/// Renders a JSON value as a pretty-printed text result.
pub(crate) fn json_result(value: &Value) -> Result<ToolCallResult, AdapterError> {
    serde_json::to_string_pretty(value)
        .map(ToolCallResult::text)
        .map_err(|e| AdapterError::Internal(format!("failed to serialise result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_respects_toggles() {
        let pool = WorkerPool::new(1);

        let config = Config::default();
        let names: Vec<_> = build_adapters(&config, &pool)
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, ["diagnostics", "host"]);

        let mut config = Config::default();
        config.adapters.diagnostics.enabled = false;
        let adapters = build_adapters(&config, &pool);
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name(), "host");
    }
}
