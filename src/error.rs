//! Error types for homelab-mcp.
//!
//! Runtime faults seen by callers live in [`crate::mcp::fault`]; the types
//! here cover process startup only. Any of them aborts the process with a
//! non-zero exit code.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::mcp::registry::RegistryError;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors that abort startup.
#[derive(Error, Debug)]
pub enum StartupError {
    /// The configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The tool registry could not be built.
    #[error("failed to build tool registry")]
    Registry(#[from] RegistryError),

    /// The HTTP listener could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The async runtime could not be created.
    #[error("failed to create async runtime")]
    Runtime(#[source] std::io::Error),

    /// The transport failed while serving.
    #[error("transport I/O failed")]
    Transport(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use crate::mcp::adapter::AdapterError;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("invalid setting"));
    }

    #[test]
    fn startup_error_keeps_cause() {
        let error = StartupError::from(RegistryError::Connect {
            adapter: "host".to_string(),
            source: AdapterError::Unavailable("no /proc".to_string()),
        });
        assert_eq!(error.to_string(), "failed to build tool registry");

        let cause = error.source().unwrap();
        assert_eq!(cause.to_string(), "adapter 'host' failed to connect");
        assert_eq!(
            cause.source().unwrap().to_string(),
            "backend unavailable: no /proc"
        );
    }
}
