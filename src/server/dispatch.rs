//! Connection dispatch loop.
//!
//! Accepts connections until shutdown, assigning each its request number
//! from the loop itself so numbers reflect true arrival order no matter how
//! handling interleaves. Shutdown is a watch channel selected against
//! accept; both the in-process handle and the reserved wire message feed
//! it. On exit, every still-running worker is joined before the loop
//! returns.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::daemon::ServerState;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::server::listener::Listener;

/// Reserved first line requesting shutdown instead of normal processing.
pub const TERMINATE_LITERAL: &str = "TERMINATE_SERVER";

pub struct DispatchLoop {
    state: Arc<ServerState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DispatchLoop {
    pub fn new(state: Arc<ServerState>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            state,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Request shutdown. The loop finishes the accept it is blocked in (or
    /// the select wakes immediately), then drains its workers.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Drive accept-and-dispatch until shutdown.
    pub async fn run<L: Listener>(&self, mut listener: L) -> Result<()> {
        let mut shutdown = self.shutdown_rx.clone();
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut next_request: u64 = 1;
        let threaded = self.state.config.is_threaded();

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("dispatch loop stopping");
                    break Ok(());
                }
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                            // Connection source exhausted: normal exit.
                            break Ok(());
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            break Err(e.into());
                        }
                    };

                    // Assigned here, never in a worker: arrival order is
                    // definitive even when handling finishes out of order.
                    let request = next_request;
                    next_request += 1;

                    let state = Arc::clone(&self.state);
                    let shutdown_tx = Arc::clone(&self.shutdown_tx);
                    if threaded {
                        workers.spawn(handle_connection(stream, state, request, shutdown_tx));
                    } else {
                        handle_connection(stream, state, request, shutdown_tx).await;
                    }
                }
            }
        };

        // No handler outlives the loop.
        while workers.join_next().await.is_some() {}
        info!(requests = next_request - 1, "dispatch loop finished");
        result
    }
}

/// Handle one connection: one message, read to end of stream.
///
/// Failures are isolated here; nothing a single connection does stops the
/// loop.
async fn handle_connection<S>(
    mut stream: S,
    state: Arc<ServerState>,
    request: u64,
    shutdown_tx: Arc<watch::Sender<bool>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut raw = Vec::new();
    if let Err(e) = stream.read_to_end(&mut raw).await {
        warn!(request, error = %e, "failed to read message");
        complete_quietly(&state, request);
        return;
    }
    let message = String::from_utf8_lossy(&raw);
    let message = message.trim_end_matches('\n');

    if message.starts_with(TERMINATE_LITERAL) {
        debug!(request, "terminate message received");
        let _ = shutdown_tx.send(true);
        complete_quietly(&state, request);
        return;
    }

    let traffic = match state.registry.classify(message) {
        Ok(traffic) => traffic,
        Err(e) => {
            error!(request, error = %e, "unclassifiable message");
            complete_quietly(&state, request);
            return;
        }
    };

    let mut replies = Vec::new();
    // The pipeline signals request completion itself, on every path.
    if let Err(e) = Pipeline::new(&state).process(traffic, request, &mut replies).await {
        warn!(request, error = %e, "traffic processing failed");
        return;
    }

    for reply in replies {
        if let Err(e) = stream.write_all(reply.as_bytes()).await {
            warn!(request, error = %e, "failed to write reply");
            return;
        }
    }
    let _ = stream.shutdown().await;
}

/// Keep the ordered writer's bookkeeping intact on paths that never reach
/// the pipeline.
fn complete_quietly(state: &ServerState, request: u64) {
    if let Err(e) = state.writer.request_complete(request) {
        warn!(request, error = %e, "failed to complete request");
    }
}
