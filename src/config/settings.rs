//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Dispatch settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Which built-in adapters to register.
    #[serde(default)]
    pub adapters: AdaptersConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.bind_addr()?;

        if self.transport.sse_keep_alive_secs == 0 {
            return Err(invalid("transport.sse_keep_alive_secs must be greater than 0"));
        }
        if self.transport.channel_capacity == 0 {
            return Err(invalid("transport.channel_capacity must be greater than 0"));
        }
        if self.runtime.call_timeout_ms == 0 {
            return Err(invalid("runtime.call_timeout_ms must be greater than 0"));
        }
        if self.runtime.blocking_workers == 0 {
            return Err(invalid("runtime.blocking_workers must be greater than 0"));
        }
        if !self.adapters.diagnostics.enabled && !self.adapters.host.enabled {
            return Err(invalid("at least one adapter must be enabled"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError {
        message: message.to_string(),
    }
}

/// Which transport the server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// Server-Sent Events plus POST endpoint.
    Http,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Transport mode.
    #[serde(default)]
    pub mode: TransportMode,

    /// Listen address for the HTTP transport.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Interval between SSE keep-alive comments, in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub sse_keep_alive_secs: u64,

    /// Capacity of per-connection message queues.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl TransportConfig {
    /// Parses [`bind`](Self::bind).
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|_| ConfigError::ValidationError {
            message: format!(
                "Invalid bind address '{}'. Expected host:port, e.g. 0.0.0.0:8000",
                self.bind
            ),
        })
    }

    /// SSE keep-alive interval.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            bind: default_bind(),
            sse_keep_alive_secs: default_keep_alive_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

const fn default_keep_alive_secs() -> u64 {
    15
}

const fn default_channel_capacity() -> usize {
    64
}

/// Dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Deadline for a single adapter call, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Number of blocking adapter calls allowed to run at once.
    #[serde(default = "default_blocking_workers")]
    pub blocking_workers: usize,
}

impl RuntimeConfig {
    /// Per-call deadline.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            blocking_workers: default_blocking_workers(),
        }
    }
}

const fn default_call_timeout_ms() -> u64 {
    30_000
}

const fn default_blocking_workers() -> usize {
    4
}

/// Built-in adapter switches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptersConfig {
    /// The `diagnostics` adapter (echo, sleep, fail).
    #[serde(default)]
    pub diagnostics: AdapterToggle,

    /// The `host` adapter (host info, load average).
    #[serde(default)]
    pub host: AdapterToggle,
}

/// Enables or disables one adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterToggle {
    /// Register this adapter's tools.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AdapterToggle {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
