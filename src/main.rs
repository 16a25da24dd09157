//! homelab-mcp: MCP server exposing homelab backends as tools
//!
//! Serves the configured backend adapters to AI assistants over stdio or
//! HTTP/SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use homelab_mcp::adapters;
use homelab_mcp::config::{self, Config, TransportMode};
use homelab_mcp::error::StartupError;
use homelab_mcp::mcp::adapter::WorkerPool;
use homelab_mcp::mcp::dispatcher::Dispatcher;
use homelab_mcp::mcp::http::{self, AppState};
use homelab_mcp::mcp::registry::ToolRegistry;
use homelab_mcp::mcp::server::{shutdown_signal, McpServer};

/// How long to wait for blocked workers (such as a pending stdin read)
/// once the server has finished.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// MCP server exposing homelab backends as schema-described tools.
///
/// Speaks newline-delimited JSON-RPC over stdio, or Server-Sent Events
/// over HTTP.
#[derive(Parser, Debug)]
#[command(name = "homelab-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve (overrides the configuration file)
    #[arg(short, long, value_enum)]
    transport: Option<TransportMode>,

    /// Listen address for the HTTP transport (overrides the configuration file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the stdio protocol.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Applies CLI overrides and re-validates.
fn apply_overrides(mut cfg: Config, args: &Args) -> Result<Config, StartupError> {
    if let Some(mode) = args.transport {
        cfg.transport.mode = mode;
    }
    if let Some(bind) = args.bind {
        cfg.transport.bind = bind.to_string();
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Builds the registry and serves the configured transport.
async fn serve(cfg: Config) -> Result<(), StartupError> {
    let pool = WorkerPool::new(cfg.runtime.blocking_workers);
    let registry = Arc::new(
        ToolRegistry::from_adapters(adapters::build_adapters(&cfg, &pool)).await?,
    );
    let dispatcher = Dispatcher::new(cfg.runtime.call_timeout());

    match cfg.transport.mode {
        TransportMode::Stdio => {
            info!("MCP server ready, waiting for client connection...");
            McpServer::new(registry, dispatcher)
                .with_channel_capacity(cfg.transport.channel_capacity)
                .run()
                .await
                .map_err(StartupError::Transport)
        }
        TransportMode::Http => {
            let addr = cfg.transport.bind_addr()?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|source| StartupError::Bind { addr, source })?;

            let state = AppState::new(registry, dispatcher)
                .with_keep_alive(cfg.transport.keep_alive())
                .with_channel_capacity(cfg.transport.channel_capacity);

            http::serve(listener, state, shutdown_signal())
                .await
                .map_err(StartupError::Transport)
        }
    }
}

/// Entry point for the homelab-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path)
        .map_err(StartupError::from)
        .and_then(|cfg| apply_overrides(cfg, &args))
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                    eprintln!("Create one based on config/example-config.json");
                }
            }
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    // Display GPL license notice (required by GPLv3 Section 5d)
    eprintln!(
        "homelab-mcp {}  Copyright (C) 2026  The Embedded Society",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cfg.transport.mode,
        "Starting homelab-mcp server"
    );

    // stdio serves one caller; HTTP serves many sessions in parallel
    let runtime = match cfg.transport.mode {
        TransportMode::Stdio => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
        TransportMode::Http => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build(),
    };
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            let e = StartupError::Runtime(e);
            error!(error = %e, "Failed to start");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(serve(cfg));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            if let Some(cause) = std::error::Error::source(&e) {
                error!(cause = %cause, "Caused by");
            }
            ExitCode::FAILURE
        }
    }
}
