//! Per-connection session state.
//!
//! A session lives exactly as long as its transport connection: stdio
//! process lifetime, or one open SSE stream. Nothing survives a reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::mcp::fault::McpFault;
use crate::mcp::protocol::{ClientInfo, RequestId};
use crate::mcp::registry::ToolRegistry;

/// One logical conversation with a caller.
#[derive(Debug)]
pub struct Session {
    id: String,
    registry: Arc<ToolRegistry>,
    initialized: AtomicBool,
    client: OnceLock<String>,
    pending: DashMap<RequestId, CancellationToken>,
}

impl Session {
    /// Creates a session with a fresh random ID.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), registry)
    }

    /// Creates a session with the given ID.
    #[must_use]
    pub fn with_id(id: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            id: id.into(),
            registry,
            initialized: AtomicBool::new(false),
            client: OnceLock::new(),
            pending: DashMap::new(),
        }
    }

    /// Session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The registry snapshot this session dispatches against.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Client name announced during `initialize`, if any.
    #[must_use]
    pub fn client_name(&self) -> Option<&str> {
        self.client.get().map(String::as_str)
    }

    /// Marks the session initialised.
    ///
    /// # Errors
    ///
    /// Returns [`McpFault::AlreadyInitialized`] on a second call.
    pub fn initialize(&self, client: Option<&ClientInfo>) -> Result<(), McpFault> {
        self.initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| McpFault::AlreadyInitialized)?;
        if let Some(client) = client {
            let _ = self.client.set(client.name.clone());
        }
        Ok(())
    }

    /// Returns `true` once `initialize` has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Fails unless the session is initialised.
    ///
    /// # Errors
    ///
    /// Returns [`McpFault::NotInitialized`] before `initialize`.
    pub fn require_initialized(&self) -> Result<(), McpFault> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(McpFault::NotInitialized)
        }
    }

    /// Records `id` as in flight and returns its cancellation token.
    ///
    /// # Errors
    ///
    /// Returns [`McpFault::DuplicateRequest`] if `id` is already in flight.
    pub fn begin(&self, id: RequestId) -> Result<CancellationToken, McpFault> {
        match self.pending.entry(id) {
            Entry::Occupied(entry) => Err(McpFault::DuplicateRequest(entry.key().clone())),
            Entry::Vacant(entry) => {
                let token = CancellationToken::new();
                entry.insert(token.clone());
                Ok(token)
            }
        }
    }

    /// Resolves `id`. Returns `false` if it was no longer in flight, in
    /// which case no result may be emitted for it.
    pub fn finish(&self, id: &RequestId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Cancels an in-flight request. Returns `false` for unknown or
    /// already-resolved IDs.
    pub fn cancel(&self, id: &RequestId) -> bool {
        match self.pending.remove(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels everything still in flight. Called when the connection closes.
    pub fn close(&self) {
        let mut cancelled = 0_usize;
        self.pending.retain(|_, token| {
            token.cancel();
            cancelled += 1;
            false
        });
        debug!(session = %self.id, cancelled, "Session closed");
    }

    /// Returns `true` if `id` is in flight.
    #[must_use]
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
