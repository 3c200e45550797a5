//! WebSocket signaling endpoint.
//!
//! `GET /ws` upgrades to a WebSocket and spawns one [`PeerActor`] for the
//! connection. The socket reader decodes text frames and queues them on the
//! actor; a writer task serializes the actor's outbound frames. When the
//! socket closes the actor is told to disconnect: it drops queued requests
//! and removes the peer from its room.

use crate::actors::{ActorMetrics, PeerActor, RoomRegistryHandle};
use crate::errors::RcError;
use crate::signaling::protocol::{parse_request, ServerMessage};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Signaling frames are small; reject anything larger.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Outbound frames buffered per connection.
const OUTBOUND_BUFFER: usize = 256;

/// How long a closing connection waits for its peer actor.
const PEER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state of the signaling router.
#[derive(Clone)]
pub struct SignalingState {
    pub registry: RoomRegistryHandle,
    pub metrics: Arc<ActorMetrics>,
    /// Cancelled on server shutdown; parent of every peer actor token.
    pub shutdown: CancellationToken,
}

/// Router serving `GET /ws`.
pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(State(state): State<SignalingState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SignalingState) {
    let peer_id = Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let (peer, peer_task) = PeerActor::spawn(
        peer_id.clone(),
        state.registry.clone(),
        outbound_tx,
        state.shutdown.child_token(),
        Arc::clone(&state.metrics),
    );

    info!(target: "rc.signaling", peer_id = %peer_id, "Signaling connection opened");

    let (mut sink, mut stream) = socket.split();

    let writer_peer_id = peer_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        target: "rc.signaling",
                        peer_id = %writer_peer_id,
                        error = %e,
                        "Failed to encode outbound frame"
                    );
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,

            frame = stream.next() => {
                let queued = match frame {
                    Some(Ok(Message::Text(text))) => match parse_request(&text) {
                        Ok(request) => peer.submit(request).await,
                        Err((id, error)) => {
                            debug!(
                                target: "rc.signaling",
                                peer_id = %peer_id,
                                request_id = id,
                                error = %error,
                                "Malformed frame"
                            );
                            peer.reject(id, error).await
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        peer.reject(
                            0,
                            RcError::BadRequest("binary frames are not supported".to_string()),
                        )
                        .await
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong are answered by axum
                    Some(Ok(_)) => Ok(()),
                    Some(Err(e)) => {
                        debug!(
                            target: "rc.signaling",
                            peer_id = %peer_id,
                            error = %e,
                            "WebSocket read failed"
                        );
                        break;
                    }
                };
                if queued.is_err() {
                    break;
                }
            }
        }
    }

    // Requests still queued behind the one in progress are dropped
    peer.disconnect();
    if tokio::time::timeout(PEER_SHUTDOWN_TIMEOUT, peer_task)
        .await
        .is_err()
    {
        warn!(
            target: "rc.signaling",
            peer_id = %peer_id,
            "Peer actor did not stop in time"
        );
    }
    // The writer ends once the peer actor dropped its outbound sender.
    let _ = tokio::time::timeout(PEER_SHUTDOWN_TIMEOUT, writer).await;

    info!(target: "rc.signaling", peer_id = %peer_id, "Signaling connection closed");
}
