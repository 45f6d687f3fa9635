//! WebSocket transport and HTTP router.
//!
//! Each upgraded socket gets a `ConnectionActor`. The socket is split: the
//! reader loop below forwards text frames into the actor's mailbox, and a
//! writer task drains the actor's outbound channel. When the actor exits its
//! outbound sender drops, the writer sends a close frame, and the socket ends.

use crate::actors::{
    ActorMetrics, CloseReason, ConnectionActor, ConnectionActorHandle, ConnectionContext,
    PairingRegistryHandle,
};
use crate::config::Config;
use crate::observability::{health_router, HealthState};
use crate::protocol::ServerFrame;
use crate::transport::{ConnectionDirectory, Transport};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared application state passed to Axum handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub connections: ConnectionContext,
    /// Root token; cancelling it closes every connection.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Spawn the registry actor and build the state shared by all connections.
    #[must_use]
    pub fn new(config: &Config, metrics: Arc<ActorMetrics>, shutdown: CancellationToken) -> Self {
        let directory = Arc::new(ConnectionDirectory::new());
        let registry = PairingRegistryHandle::new(
            Arc::clone(&directory) as Arc<dyn Transport>,
            shutdown.child_token(),
            Arc::clone(&metrics),
        );

        Self {
            connections: ConnectionContext {
                registry,
                directory,
                metrics,
                session_timeout: config.session_timeout(),
                mailbox_capacity: config.connection_buffer,
            },
            shutdown,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &PairingRegistryHandle {
        &self.connections.registry
    }
}

/// Build the Axum router: the signaling stream at `stream_path` plus
/// `/health` and `/ready`.
pub fn build_router(state: AppState, stream_path: &str, health: Arc<HealthState>) -> Router {
    Router::new()
        .route(stream_path, get(stream_handler))
        .with_state(state)
        .merge(health_router(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// WebSocket upgrade handler.
async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound_tx, outbound_rx) = mpsc::channel(state.connections.mailbox_capacity);
    let (handle, actor_task) =
        ConnectionActor::spawn(&state.connections, outbound_tx, &state.shutdown);

    info!(
        target: "rendezvous.transport",
        connection_id = %handle.connection_id(),
        "WebSocket client connected"
    );

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_frames(ws_tx, outbound_rx));

    read_frames(ws_rx, &handle).await;

    let reason = match actor_task.await {
        Ok(reason) => reason,
        Err(e) => {
            error!(
                target: "rendezvous.transport",
                connection_id = %handle.connection_id(),
                error = %e,
                "ConnectionActor task failed"
            );
            CloseReason::ServerShutdown
        }
    };
    let _ = writer.await;

    info!(
        target: "rendezvous.transport",
        connection_id = %handle.connection_id(),
        reason = reason.as_str(),
        "WebSocket client disconnected"
    );
}

/// Forward peer frames to the actor until either side closes.
async fn read_frames(
    mut ws_rx: futures::stream::SplitStream<WebSocket>,
    handle: &ConnectionActorHandle,
) {
    let closing = handle.close_token();

    loop {
        tokio::select! {
            () = closing.cancelled() => break,

            msg = ws_rx.next() => {
                let forwarded = match msg {
                    Some(Ok(Message::Text(text))) => handle.receive_text(&text).await,
                    Some(Ok(Message::Binary(bytes))) => {
                        handle.receive_text(&String::from_utf8_lossy(&bytes)).await
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.into_owned())
                            .filter(|reason| !reason.is_empty());
                        let _ = handle.disconnect(reason).await;
                        break;
                    }
                    // axum answers pings itself
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(()),
                    Some(Err(e)) => {
                        debug!(
                            target: "rendezvous.transport",
                            connection_id = %handle.connection_id(),
                            error = %e,
                            "WebSocket read failed"
                        );
                        let _ = handle.disconnect(None).await;
                        break;
                    }
                    None => {
                        let _ = handle.disconnect(None).await;
                        break;
                    }
                };

                if forwarded.is_err() {
                    break;
                }
            }
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<ServerFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(target: "rendezvous.transport", error = %e, "Failed to encode frame");
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}
