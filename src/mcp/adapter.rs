//! Backend adapter capability interface.
//!
//! Every backend integration (virtualisation host, container engine,
//! torrent daemon, ...) is a [`BackendAdapter`]: a named set of tools plus an
//! `invoke` entry point. The runtime is written once against this trait.
//!
//! Integrations whose client libraries block implement [`BlockingAdapter`]
//! instead and are wrapped in [`Blocking`], which moves every call onto
//! tokio's blocking pool, bounded by a shared [`WorkerPool`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::mcp::protocol::{RequestId, ToolCallResult};
use crate::mcp::registry::Tool;
use crate::mcp::schema::Arguments;

/// Whether an adapter tolerates overlapping calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrency {
    /// Calls may run at the same time.
    #[default]
    Concurrent,
    /// Calls to this adapter are run one at a time, across all its tools.
    Serialized,
}

/// Per-call context handed to an adapter.
///
/// For a serialised adapter the context also holds the adapter's turn: the
/// next call cannot start until every copy of the context is dropped, even
/// if the caller stopped waiting for this one.
#[derive(Debug, Clone)]
pub struct CallContext {
    request_id: RequestId,
    cancellation: CancellationToken,
    turn: Option<Arc<OwnedMutexGuard<()>>>,
}

impl CallContext {
    /// Creates a context for the given request.
    #[must_use]
    pub const fn new(request_id: RequestId, cancellation: CancellationToken) -> Self {
        Self {
            request_id,
            cancellation,
            turn: None,
        }
    }

    /// Attaches the adapter's serialisation turn to this call.
    #[must_use]
    pub fn holding(mut self, turn: OwnedMutexGuard<()>) -> Self {
        self.turn = Some(Arc::new(turn));
        self
    }

    /// The caller's correlation ID.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Token fired when the caller cancels or the deadline passes.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the call should stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Failures reported by a backend adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The upstream service returned an error.
    #[error("{message}")]
    Upstream {
        /// Upstream diagnostic.
        message: String,
        /// Upstream status code, if the protocol has one.
        status: Option<u16>,
    },

    /// The upstream service did not answer in time.
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// The upstream service rejected the configured credentials.
    #[error("upstream rejected credentials: {0}")]
    Unauthorized(String),

    /// The backend cannot be reached or is not configured.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// An argument passed schema validation but is still unusable.
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument {
        /// Offending property name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The adapter was asked for a tool it does not provide.
    #[error("tool '{0}' is not provided by this adapter")]
    UnsupportedTool(String),

    /// The call observed its cancellation token and stopped.
    #[error("call was cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl AdapterError {
    /// Creates an upstream error without a status code.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status: None,
        }
    }

    /// Creates an upstream error carrying a status code.
    #[must_use]
    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Returns the upstream status code, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::Unauthorized(_) => Some(401),
            _ => None,
        }
    }
}

/// A backend integration exposing tools.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Stable adapter name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Tools provided by this adapter, in listing order.
    fn tools(&self) -> Vec<Tool>;

    /// Whether calls may overlap.
    fn concurrency(&self) -> Concurrency {
        Concurrency::Concurrent
    }

    /// Connects and health-checks the backend. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or misconfigured.
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Runs one tool with already validated arguments.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] describing the backend fault.
    async fn invoke(
        &self,
        tool: &str,
        arguments: Arguments,
        ctx: CallContext,
    ) -> Result<ToolCallResult, AdapterError>;
}

/// A backend integration whose tool bodies block the calling thread.
pub trait BlockingAdapter: Send + Sync + 'static {
    /// Stable adapter name.
    fn name(&self) -> &str;

    /// Tools provided by this adapter, in listing order.
    fn tools(&self) -> Vec<Tool>;

    /// Whether calls may overlap. Blocking clients are serialised unless
    /// they say otherwise.
    fn concurrency(&self) -> Concurrency {
        Concurrency::Serialized
    }

    /// Connects and health-checks the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or misconfigured.
    fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Runs one tool on a blocking worker thread.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] describing the backend fault.
    fn invoke(
        &self,
        tool: &str,
        arguments: &Arguments,
        ctx: &CallContext,
    ) -> Result<ToolCallResult, AdapterError>;
}

/// Bounded pool of blocking worker slots shared by all blocking adapters.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool allowing `size` concurrent blocking calls.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum number of concurrent blocking calls.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of currently free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `job` on the blocking pool once a slot is free.
    ///
    /// The slot stays taken until `job` returns, even if the caller stops
    /// waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Internal`] if the job panics.
    pub async fn run<F, T>(&self, job: F) -> Result<T, AdapterError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AdapterError::Unavailable("worker pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| AdapterError::Internal(format!("blocking worker failed: {e}")))
    }
}

/// Lifts a [`BlockingAdapter`] into a [`BackendAdapter`].
pub struct Blocking<A> {
    inner: Arc<A>,
    pool: WorkerPool,
}

impl<A: BlockingAdapter> Blocking<A> {
    /// Wraps `inner`, running its calls on `pool`.
    #[must_use]
    pub fn new(inner: A, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(inner),
            pool,
        }
    }
}

#[async_trait]
impl<A: BlockingAdapter> BackendAdapter for Blocking<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn tools(&self) -> Vec<Tool> {
        self.inner.tools()
    }

    fn concurrency(&self) -> Concurrency {
        self.inner.concurrency()
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        let inner = Arc::clone(&self.inner);
        self.pool.run(move || inner.connect()).await?
    }

    async fn invoke(
        &self,
        tool: &str,
        arguments: Arguments,
        ctx: CallContext,
    ) -> Result<ToolCallResult, AdapterError> {
        let inner = Arc::clone(&self.inner);
        let tool = tool.to_string();
        // ctx moves into the job, so a serialised turn outlives an abandoned caller.
        self.pool
            .run(move || inner.invoke(&tool, &arguments, &ctx))
            .await?
    }
}
