//! `PeerActor` - per-connection actor that serves one signaling client.
//!
//! Each `PeerActor`:
//! - Processes the client's requests one at a time, in arrival order
//! - Remembers which room the client joined
//! - Forwards room pushes to the client's outbound channel
//! - Leaves the room when the connection closes or the server shuts down
//!
//! Provider calls made on behalf of the client run inside this actor's task,
//! so a slow media engine delays only this client.

use super::messages::{PeerMessage, PushEvent};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::RoomRegistryHandle;
use super::room::RoomActorHandle;
use crate::errors::RcError;
use crate::media::TransportDirection;
use crate::observability::metrics as prom;
use crate::signaling::protocol::{ClientRequest, ClientRequestBody, ResponseData, ServerMessage};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the peer mailbox.
const PEER_CHANNEL_BUFFER: usize = 64;

/// Handle to a `PeerActor`.
#[derive(Clone, Debug)]
pub struct PeerActorHandle {
    sender: mpsc::Sender<PeerMessage>,
    cancel_token: CancellationToken,
    peer_id: String,
}

impl PeerActorHandle {
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Queue a decoded client request.
    pub async fn submit(&self, request: ClientRequest) -> Result<(), RcError> {
        self.sender
            .send(PeerMessage::Request { request })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Queue the rejection of a frame that failed to decode.
    pub async fn reject(&self, id: u64, error: RcError) -> Result<(), RcError> {
        self.sender
            .send(PeerMessage::Malformed { id, error })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Report the connection closed. The request in progress completes;
    /// queued requests are dropped and the actor leaves its room.
    pub fn disconnect(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The peer actor implementation.
pub struct PeerActor {
    peer_id: String,
    receiver: mpsc::Receiver<PeerMessage>,
    cancel_token: CancellationToken,
    registry: RoomRegistryHandle,
    /// Frames for the client connection.
    outbound: mpsc::Sender<ServerMessage>,
    /// Sender handed to the room on join.
    events_tx: mpsc::UnboundedSender<PushEvent>,
    events_rx: mpsc::UnboundedReceiver<PushEvent>,
    room: Option<RoomActorHandle>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl PeerActor {
    /// Spawn a new peer actor.
    ///
    /// # Arguments
    ///
    /// * `peer_id` - Server-assigned connection id
    /// * `registry` - Room registry used for create/join
    /// * `outbound` - Frames written to the client
    /// * `cancel_token` - Cancellation token (child of the server's token)
    /// * `metrics` - Shared actor metrics
    pub fn spawn(
        peer_id: String,
        registry: RoomRegistryHandle,
        outbound: mpsc::Sender<ServerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (PeerActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PEER_CHANNEL_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let actor = Self {
            peer_id: peer_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            registry,
            outbound,
            events_tx,
            events_rx,
            room: None,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Peer, &peer_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerActorHandle {
            sender,
            cancel_token,
            peer_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.peer", fields(peer_id = %self.peer_id))]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.peer",
            peer_id = %self.peer_id,
            "PeerActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.peer",
                        peer_id = %self.peer_id,
                        "PeerActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(PeerMessage::Request { .. }) if self.cancel_token.is_cancelled() => {
                            break;
                        }
                        Some(PeerMessage::Request { request }) => {
                            self.handle_request(request).await;
                            self.mailbox.record_processed(self.receiver.len());
                            self.metrics.record_message_processed();
                        }
                        Some(PeerMessage::Malformed { id, error }) => {
                            prom::record_signaling_request("malformed", error.outcome_label());
                            self.send(ServerMessage::error(id, &error)).await;
                        }
                        None => {
                            debug!(
                                target: "rc.actor.peer",
                                peer_id = %self.peer_id,
                                "Client connection closed"
                            );
                            break;
                        }
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.send(ServerMessage::Event(event)).await;
                }
            }
        }

        self.leave_room().await;

        debug!(
            target: "rc.actor.peer",
            peer_id = %self.peer_id,
            messages_processed = self.mailbox.messages_processed(),
            "PeerActor stopped"
        );
    }

    /// Serve one request and write its response.
    async fn handle_request(&mut self, request: ClientRequest) {
        let started = Instant::now();
        let message_type = request.body.message_type();

        let result = self.dispatch(request.body).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        prom::record_signaling_request(message_type, outcome);
        prom::record_message_latency(message_type, started.elapsed());

        let reply = match result {
            Ok(data) => ServerMessage::ok(request.id, data),
            Err(e) => {
                match &e {
                    RcError::Internal(_) | RcError::ProviderFailure(_) => warn!(
                        target: "rc.actor.peer",
                        peer_id = %self.peer_id,
                        message_type,
                        error = %e,
                        "Request failed"
                    ),
                    _ => debug!(
                        target: "rc.actor.peer",
                        peer_id = %self.peer_id,
                        message_type,
                        error = %e,
                        "Request rejected"
                    ),
                }
                ServerMessage::error(request.id, &e)
            }
        };
        self.send(reply).await;
    }

    async fn dispatch(&mut self, body: ClientRequestBody) -> Result<ResponseData, RcError> {
        match body {
            ClientRequestBody::CreateRoom => {
                self.ensure_not_joined()?;
                let (room, joined) = self
                    .registry
                    .create_and_join_room(self.peer_id.clone(), self.events_tx.clone())
                    .await?;
                self.enter_room(room);
                Ok(ResponseData::RoomCreated {
                    room_id: joined.room_id,
                    rtp_capabilities: joined.capabilities,
                })
            }

            ClientRequestBody::JoinRoom { room_id } => {
                self.ensure_not_joined()?;
                if room_id.trim().is_empty() {
                    return Err(RcError::BadRequest("roomId must not be empty".to_string()));
                }
                let (room, joined) = self
                    .registry
                    .join_room(room_id, self.peer_id.clone(), self.events_tx.clone())
                    .await?;
                self.enter_room(room);
                Ok(ResponseData::Joined {
                    rtp_capabilities: joined.capabilities,
                })
            }

            ClientRequestBody::CreateSendTransport => {
                let options = self
                    .room()?
                    .create_transport(&self.peer_id, TransportDirection::Send)
                    .await?;
                Ok(ResponseData::Transport(options))
            }

            ClientRequestBody::ConnectSendTransport { dtls_parameters } => {
                self.room()?
                    .connect_transport(&self.peer_id, TransportDirection::Send, dtls_parameters)
                    .await?;
                Ok(ResponseData::Empty {})
            }

            ClientRequestBody::Produce {
                kind,
                rtp_parameters,
            } => {
                let id = self
                    .room()?
                    .produce(&self.peer_id, kind, rtp_parameters)
                    .await?;
                Ok(ResponseData::Produced { id })
            }

            ClientRequestBody::CreateRecvTransport => {
                let options = self
                    .room()?
                    .create_transport(&self.peer_id, TransportDirection::Recv)
                    .await?;
                Ok(ResponseData::Transport(options))
            }

            ClientRequestBody::ConnectRecvTransport { dtls_parameters } => {
                self.room()?
                    .connect_transport(&self.peer_id, TransportDirection::Recv, dtls_parameters)
                    .await?;
                Ok(ResponseData::Empty {})
            }

            ClientRequestBody::Consume {
                producer_id,
                rtp_capabilities,
            } => {
                let consumer = self
                    .room()?
                    .consume(&self.peer_id, &producer_id, rtp_capabilities)
                    .await?;
                Ok(ResponseData::Consumed(consumer))
            }

            ClientRequestBody::GetExistingProducers => {
                let producer_ids = self.room()?.existing_producers(&self.peer_id).await?;
                Ok(ResponseData::ExistingProducers { producer_ids })
            }
        }
    }

    fn room(&self) -> Result<&RoomActorHandle, RcError> {
        self.room
            .as_ref()
            .ok_or_else(|| RcError::PreconditionViolation("not joined to a room".to_string()))
    }

    fn ensure_not_joined(&self) -> Result<(), RcError> {
        if self.room.is_some() {
            return Err(RcError::PreconditionViolation(
                "already joined to a room".to_string(),
            ));
        }
        Ok(())
    }

    fn enter_room(&mut self, room: RoomActorHandle) {
        info!(
            target: "rc.actor.peer",
            peer_id = %self.peer_id,
            room_id = %room.room_id(),
            "Peer entered room"
        );
        self.room = Some(room);
    }

    async fn leave_room(&mut self) {
        if let Some(room) = self.room.take() {
            room.disconnect(self.peer_id.clone()).await;
        }
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!(
                target: "rc.actor.peer",
                peer_id = %self.peer_id,
                "Outbound channel closed, dropping frame"
            );
        }
    }
}
