//! stdio MCP server.
//!
//! Drives one [`Session`] over one newline-framed byte stream for the
//! lifetime of the process. The connection moves through
//! [`ConnectionState`]: frames are read, accepted by the [`Dispatcher`] in
//! arrival order, and replies are written by a dedicated writer task.
//! Tool calls run as separate tasks so a slow backend never blocks the
//! reader; their replies are written as they complete.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::mcp::dispatcher::{Dispatch, Dispatcher};
use crate::mcp::fault::McpFault;
use crate::mcp::protocol::{parse_message, OutgoingMessage};
use crate::mcp::registry::ToolRegistry;
use crate::mcp::session::Session;
use crate::mcp::transport::{FrameReader, FrameWriter, StdioTransport};

/// Default capacity of the reader and writer queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle.
///
/// ```text
/// Open → Reading → Dispatching → Writing → Reading → … → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, nothing read yet.
    Open,
    /// Waiting for the next frame or a finished call.
    Reading,
    /// Handing a frame to the dispatcher.
    Dispatching,
    /// Queueing a reply.
    Writing,
    /// End of stream or fatal framing error. Nothing more is read or written.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open | Self::Writing | Self::Dispatching, Self::Reading)
                | (Self::Reading, Self::Dispatching | Self::Writing)
                | (Self::Dispatching, Self::Writing)
                | (Self::Open | Self::Reading | Self::Dispatching | Self::Writing, Self::Closed)
        )
    }
}

/// Why the read loop stopped.
enum Exit {
    EndOfStream,
    Shutdown,
    Framing,
    WriterGone,
    Io(io::Error),
}

struct Connection {
    state: ConnectionState,
}

impl Connection {
    const fn new() -> Self {
        Self {
            state: ConnectionState::Open,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        tracing::trace!(from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

/// The stdio MCP server.
#[derive(Debug, Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    channel_capacity: usize,
}

impl McpServer {
    /// Creates a server dispatching against `registry`.
    #[must_use]
    pub const fn new(registry: Arc<ToolRegistry>, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            dispatcher,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Sets the capacity of the internal reader and writer queues.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Serves stdin/stdout until end of stream or a termination signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&self) -> io::Result<()> {
        let (reader, writer) = StdioTransport::new().split();
        self.serve_until(reader, writer, shutdown_signal()).await
    }

    /// Serves one connection until end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve<R, W>(&self, reader: FrameReader<R>, writer: FrameWriter<W>) -> io::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.serve_until(reader, writer, std::future::pending()).await
    }

    /// Serves one connection until end of stream or until `shutdown`
    /// resolves.
    ///
    /// A framing error is reported to the peer and closes the connection
    /// but is not an error of this function.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve_until<R, W, F>(
        &self,
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        shutdown: F,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        let session = Arc::new(Session::new(Arc::clone(&self.registry)));
        tracing::info!(session = %session.id(), tools = self.registry.len(), "stdio session opened");

        let (frame_tx, mut frames) = mpsc::channel(self.channel_capacity);
        let reader_task = tokio::spawn(read_frames(reader, frame_tx));

        let (outgoing, replies) = mpsc::channel(self.channel_capacity);
        let writer_task = tokio::spawn(write_frames(writer, replies));

        let mut conn = Connection::new();
        let mut in_flight: JoinSet<Option<OutgoingMessage>> = JoinSet::new();
        tokio::pin!(shutdown);

        let exit = loop {
            conn.transition(ConnectionState::Reading);

            tokio::select! {
                () = &mut shutdown => break Exit::Shutdown,

                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match done {
                        Ok(Some(reply)) => {
                            conn.transition(ConnectionState::Writing);
                            if outgoing.send(reply).await.is_err() {
                                break Exit::WriterGone;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::error!(error = %e, "Tool call task failed"),
                    }
                }

                frame = frames.recv() => {
                    let line = match frame {
                        None => break Exit::EndOfStream,
                        Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                            conn.transition(ConnectionState::Writing);
                            let fault = McpFault::Framing(e.to_string());
                            tracing::warn!(error = %fault, "Closing connection");
                            let _ = outgoing.send(fault.into_response(None)).await;
                            break Exit::Framing;
                        }
                        Some(Err(e)) => break Exit::Io(e),
                        Some(Ok(line)) => line,
                    };

                    if line.trim().is_empty() {
                        continue;
                    }

                    conn.transition(ConnectionState::Dispatching);
                    let reply = match parse_message(&line) {
                        Ok(message) => match self.dispatcher.accept(&session, message) {
                            Dispatch::Reply(reply) => Some(reply),
                            Dispatch::Call(call) => {
                                in_flight.spawn(call.run());
                                None
                            }
                            Dispatch::Silent => None,
                        },
                        Err(e) if e.is_fatal() => {
                            conn.transition(ConnectionState::Writing);
                            let fault = McpFault::Framing(e.to_string());
                            tracing::warn!(error = %fault, "Closing connection");
                            let _ = outgoing.send(fault.into_response(None)).await;
                            break Exit::Framing;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "Rejected envelope");
                            Some(e.to_response().into())
                        }
                    };

                    if let Some(reply) = reply {
                        conn.transition(ConnectionState::Writing);
                        if outgoing.send(reply).await.is_err() {
                            break Exit::WriterGone;
                        }
                    }
                }
            }
        };

        let mut result = Ok(());
        match exit {
            Exit::EndOfStream => {
                tracing::debug!(pending = in_flight.len(), "End of stream, draining in-flight calls");
                while let Some(done) = in_flight.join_next().await {
                    if let Ok(Some(reply)) = done {
                        if outgoing.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Exit::Shutdown => tracing::info!("Shutting down stdio session"),
            Exit::Framing | Exit::WriterGone => {}
            Exit::Io(e) => {
                tracing::error!(error = %e, "Failed to read from transport");
                result = Err(e);
            }
        }

        conn.transition(ConnectionState::Closed);
        session.close();
        in_flight.abort_all();
        reader_task.abort();
        drop(outgoing);

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to write to transport");
                if result.is_ok() {
                    result = Err(e);
                }
            }
            Err(e) => tracing::error!(error = %e, "Writer task failed"),
        }

        tracing::info!(session = %session.id(), "stdio session closed");
        result
    }
}

async fn read_frames<R>(mut reader: FrameReader<R>, frames: mpsc::Sender<io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read_frame().await {
            Ok(Some(line)) => {
                if frames.send(Ok(line)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = frames.send(Err(e)).await;
                return;
            }
        }
    }
}

async fn write_frames<W>(
    mut writer: FrameWriter<W>,
    mut replies: mpsc::Receiver<OutgoingMessage>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = replies.recv().await {
        writer.write_message(&reply).await?;
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
///
/// If the handlers cannot be installed the error is logged and the future
/// never resolves.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves on Ctrl+C.
#[cfg(windows)]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
