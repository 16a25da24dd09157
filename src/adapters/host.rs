//! Host adapter.
//!
//! Reports on the machine the server runs on. Tool bodies read the
//! filesystem synchronously, so this is a [`BlockingAdapter`] and runs on
//! the shared worker pool, one call at a time.

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::adapters::json_result;
use crate::mcp::adapter::{AdapterError, BlockingAdapter, CallContext};
use crate::mcp::protocol::ToolCallResult;
use crate::mcp::registry::Tool;
use crate::mcp::schema::{Arguments, InputSchema};

/// Adapter name.
pub const NAME: &str = "host";

const LOADAVG_PATH: &str = "/proc/loadavg";

/// Blocking tools describing the local host.
#[derive(Debug)]
pub struct HostAdapter {
    started_at: DateTime<Utc>,
    loadavg_path: PathBuf,
}

impl Default for HostAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HostAdapter {
    /// Creates the adapter, recording the current time as process start.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            loadavg_path: PathBuf::from(LOADAVG_PATH),
        }
    }

    /// Reads load averages from `path` instead of `/proc/loadavg`.
    #[must_use]
    pub fn with_loadavg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.loadavg_path = path.into();
        self
    }

    fn host_info(&self) -> Result<ToolCallResult, AdapterError> {
        let now = Utc::now();
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

        json_result(&json!({
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "cpus": cpus,
            "server_version": env!("CARGO_PKG_VERSION"),
            "started_at": self.started_at.to_rfc3339(),
            "uptime_secs": (now - self.started_at).num_seconds(),
        }))
    }

    fn load_average(&self) -> Result<ToolCallResult, AdapterError> {
        let contents = std::fs::read_to_string(&self.loadavg_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AdapterError::Unavailable(format!(
                "load averages are not available on this host ({} missing)",
                self.loadavg_path.display()
            )),
            _ => AdapterError::Internal(format!(
                "failed to read {}: {e}",
                self.loadavg_path.display()
            )),
        })?;

        let (one, five, fifteen) = parse_loadavg(&contents).ok_or_else(|| {
            AdapterError::Internal(format!(
                "unexpected contents in {}",
                self.loadavg_path.display()
            ))
        })?;

        json_result(&json!({
            "load_1m": one,
            "load_5m": five,
            "load_15m": fifteen,
        }))
    }
}

impl BlockingAdapter for HostAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                "host_info",
                "Describe the host running this server: OS, architecture, CPU count and uptime.",
                InputSchema::object(),
            ),
            Tool::new(
                "load_average",
                "Report the 1, 5 and 15 minute load averages of the host.",
                InputSchema::object(),
            ),
        ]
    }

    fn invoke(
        &self,
        tool: &str,
        _arguments: &Arguments,
        ctx: &CallContext,
    ) -> Result<ToolCallResult, AdapterError> {
        if ctx.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }

        match tool {
            "host_info" => self.host_info(),
            "load_average" => self.load_average(),
            other => Err(AdapterError::UnsupportedTool(other.to_string())),
        }
    }
}

/// Parses the first three fields of a `/proc/loadavg` line.
fn parse_loadavg(contents: &str) -> Option<(f64, f64, f64)> {
    let mut fields = contents.split_whitespace().map(str::parse::<f64>);
    let one = fields.next()?.ok()?;
    let five = fields.next()?.ok()?;
    let fifteen = fields.next()?.ok()?;
    Some((one, five, fifteen))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::mcp::protocol::RequestId;

    fn ctx() -> CallContext {
        CallContext::new(RequestId::Number(1), CancellationToken::new())
    }

    fn parse(result: &ToolCallResult) -> Value {
        serde_json::from_str(&result.text_content()).unwrap()
    }

    #[test]
    fn parse_proc_loadavg() {
        assert_eq!(
            parse_loadavg("0.52 0.58 0.59 2/1214 98213\n"),
            Some((0.52, 0.58, 0.59))
        );
        assert_eq!(parse_loadavg("0.52 oops"), None);
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn host_info_reports_platform() {
        let result = HostAdapter::new()
            .invoke("host_info", &Arguments::new(), &ctx())
            .unwrap();
        let info = parse(&result);

        assert_eq!(info["os"], std::env::consts::OS);
        assert!(info["cpus"].as_u64().unwrap() >= 1);
        assert!(info["uptime_secs"].as_i64().unwrap() >= 0);
    }

    #[test]
    fn load_average_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.50 0.75 0.25 1/100 4242").unwrap();

        let adapter = HostAdapter::new().with_loadavg_path(file.path());
        let result = adapter
            .invoke("load_average", &Arguments::new(), &ctx())
            .unwrap();
        let load = parse(&result);

        assert_eq!(load["load_1m"], 1.5);
        assert_eq!(load["load_15m"], 0.25);
    }

    #[test]
    fn load_average_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = HostAdapter::new().with_loadavg_path(dir.path().join("loadavg"));

        let err = adapter
            .invoke("load_average", &Arguments::new(), &ctx())
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(_)));
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::new(RequestId::Number(3), token);

        let err = HostAdapter::new()
            .invoke("host_info", &Arguments::new(), &ctx)
            .unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled));
    }
}
