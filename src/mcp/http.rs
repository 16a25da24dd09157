//! HTTP/SSE transport.
//!
//! Each `GET /sse` opens one [`Session`]. The stream's first event is
//! `endpoint`, whose data is the URL the client must POST its envelopes to
//! (`/messages?session_id=<id>`). Every reply for that session, including
//! tool results, arrives afterwards as a `message` event; a POST only
//! acknowledges receipt. When the stream is dropped the session is removed
//! and its in-flight calls are cancelled.
//!
//! Each session's reply queue is bounded. A POST never waits for room: if
//! the client is not draining its stream, the POST is refused with `503`.
//! Tool results are queued by their own tasks and do wait.
//!
//! `GET /health` is a stateless liveness check.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::mcp::dispatcher::{Dispatch, Dispatcher};
use crate::mcp::fault::McpFault;
use crate::mcp::protocol::{parse_message, OutgoingMessage};
use crate::mcp::registry::ToolRegistry;
use crate::mcp::server::DEFAULT_CHANNEL_CAPACITY;
use crate::mcp::session::Session;

/// Largest accepted POST body.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Default interval between keep-alive comments on the event stream.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// A live SSE session: its state plus the queue feeding its event stream.
#[derive(Debug, Clone)]
pub struct HttpSession {
    session: Arc<Session>,
    outgoing: mpsc::Sender<OutgoingMessage>,
}

impl HttpSession {
    /// The session state.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Queues a message for the event stream, waiting for room.
    ///
    /// Returns `false` if the stream has closed.
    pub async fn send(&self, message: OutgoingMessage) -> bool {
        self.outgoing.send(message).await.is_ok()
    }

    /// Queues a message for the event stream without waiting.
    ///
    /// # Errors
    ///
    /// Returns the message back if the queue is full or the stream has
    /// closed.
    pub fn offer(&self, message: OutgoingMessage) -> Result<(), TrySendError<OutgoingMessage>> {
        self.outgoing.try_send(message)
    }
}

/// Removes its session when the event stream is dropped.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<Session>,
    sessions: Arc<DashMap<String, HttpSession>>,
}

impl SessionGuard {
    /// The guarded session.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(self.session.id());
        self.session.close();
        tracing::info!(session = %self.session.id(), "SSE session closed");
    }
}

/// All open SSE sessions of the process.
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, HttpSession>>,
    closing: CancellationToken,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session. It stays registered until the guard is dropped.
    #[must_use]
    pub fn open(
        &self,
        registry: Arc<ToolRegistry>,
        capacity: usize,
    ) -> (SessionGuard, mpsc::Receiver<OutgoingMessage>) {
        let session = Arc::new(Session::new(registry));
        let (outgoing, replies) = mpsc::channel(capacity.max(1));
        self.sessions.insert(
            session.id().to_string(),
            HttpSession {
                session: Arc::clone(&session),
                outgoing,
            },
        );
        tracing::info!(session = %session.id(), open = self.sessions.len(), "SSE session opened");

        let guard = SessionGuard {
            session,
            sessions: Arc::clone(&self.sessions),
        };
        (guard, replies)
    }

    /// Looks up an open session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<HttpSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ends every event stream, present and future.
    pub fn close_all(&self) {
        self.closing.cancel();
    }

    /// Fired by [`close_all`](Self::close_all).
    #[must_use]
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }
}

/// Shared state of the HTTP transport.
#[derive(Debug, Clone)]
pub struct AppState {
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    sessions: SessionManager,
    keep_alive: Duration,
    channel_capacity: usize,
}

impl AppState {
    /// Creates the state for serving `registry`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            dispatcher,
            sessions: SessionManager::new(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub const fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Sets the per-session reply queue capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// The open sessions.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

/// Query string of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Target session.
    pub session_id: Option<String>,
}

/// Builds the router: `GET /sse`, `POST /messages`, `GET /health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages", post(messages_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves.
///
/// Open event streams are ended on shutdown so the server can drain.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sessions = state.sessions.clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP/SSE transport listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!(open = sessions.len(), "Closing SSE sessions");
            sessions.close_all();
        })
        .await
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (guard, mut replies) = state
        .sessions
        .open(Arc::clone(&state.registry), state.channel_capacity);
    let endpoint = format!("/messages?session_id={}", guard.session().id());
    let closing = state.sessions.closing();

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok(Event::default().event("endpoint").data(endpoint));

        loop {
            let next = tokio::select! {
                () = closing.cancelled() => None,
                reply = replies.recv() => reply,
            };
            let Some(reply) = next else {
                break;
            };

            match reply.to_json() {
                Ok(json) => yield Ok(Event::default().event("message").data(json)),
                Err(e) => tracing::error!(error = %e, "Failed to serialise reply"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

async fn messages_handler(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "Missing session_id query parameter").into_response();
    };

    let Some(target) = state.sessions.get(&session_id) else {
        return session_not_found(session_id);
    };

    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(e) if e.is_fatal() => {
            tracing::debug!(session = %session_id, error = %e, "Rejected malformed POST body");
            let reply = McpFault::Framing(e.to_string()).into_response(None);
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
        Err(e) => {
            tracing::debug!(session = %session_id, error = %e, "Rejected envelope");
            return enqueue(&target, session_id, e.to_response().into());
        }
    };

    match state.dispatcher.accept(target.session(), message) {
        Dispatch::Reply(reply) => return enqueue(&target, session_id, reply),
        Dispatch::Call(call) => {
            tokio::spawn(async move {
                if let Some(reply) = call.run().await {
                    if !target.send(reply).await {
                        tracing::debug!("Event stream closed before the result was ready");
                    }
                }
            });
        }
        Dispatch::Silent => {}
    }

    accepted()
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Queues an immediate reply. A POST never waits on a stalled event stream.
fn enqueue(target: &HttpSession, session_id: String, reply: OutgoingMessage) -> Response {
    match target.offer(reply) {
        Ok(()) => accepted(),
        Err(TrySendError::Full(_)) => {
            tracing::warn!(session = %session_id, "Event stream is not keeping up, rejecting POST");
            (StatusCode::SERVICE_UNAVAILABLE, "Event stream is full").into_response()
        }
        Err(TrySendError::Closed(_)) => session_not_found(session_id),
    }
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

fn session_not_found(session_id: String) -> Response {
    let reply = McpFault::SessionNotFound(session_id).into_response(None);
    (StatusCode::NOT_FOUND, Json(reply)).into_response()
}
