//! `RoomActor` - per-room actor that owns all signaling state of one room.
//!
//! Each `RoomActor`:
//! - Owns the [`PeerSession`] of every member
//! - Owns the producer and consumer registries and the commit sequence
//! - Pushes `new-producer` / `consumer-closed` events to member channels
//! - Retires itself after staying empty for the grace period
//!
//! # Prepare / Commit
//!
//! Provider-backed operations never await the media engine inside the room
//! loop. [`RoomActorHandle`] runs them in three steps from the caller's task:
//!
//! 1. `Prepare*` validates the request against current state
//! 2. the provider call runs outside the actor
//! 3. `Commit*` revalidates and records the result
//!
//! If the commit is rejected (the peer left, the producer closed meanwhile),
//! the freshly created engine resource is closed in the background and the
//! caller gets the commit error.
//!
//! # Visibility
//!
//! Every committed producer gets the next commit sequence number. A joining
//! peer is stamped with the sequence at join time. `get-existing-producers`
//! returns producers with `seq <= joined_seq`; producers committed later
//! reach the peer as `new-producer` pushes. The two sets are disjoint and
//! together cover every producer of the room.

use super::messages::{
    ConsumeTicket, JoinResult, PeerInfo, PushEvent, RegistryMessage, RoomMessage, RoomState,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::RcError;
use crate::media::{
    ConsumerOptions, DtlsParameters, MediaHandle, MediaKind, RtpCapabilities, RtpParameters,
    TransportDirection, TransportOptions,
};
use crate::observability::metrics as prom;
use crate::provider::{close_detached, observe_call, CapabilityProvider, ProviderOperation};
use crate::session::PeerSession;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Per-room tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    /// How long a room may stay empty before it retires.
    pub grace_period: Duration,
    /// How often the room checks the grace deadline.
    pub grace_check_interval: Duration,
    /// Members allowed at once.
    pub max_peers: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            grace_check_interval: Duration::from_secs(1),
            max_peers: 50,
        }
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    generation: u64,
    capabilities: Arc<RtpCapabilities>,
    provider: Arc<dyn CapabilityProvider>,
}

impl fmt::Debug for RoomActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomActorHandle")
            .field("room_id", &self.room_id)
            .field("generation", &self.generation)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Incarnation of the room id. A room recreated after retirement gets a
    /// higher generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Routing capabilities fixed at room creation.
    #[must_use]
    pub fn capabilities(&self) -> &RtpCapabilities {
        &self.capabilities
    }

    async fn send(&self, message: RoomMessage) -> Result<(), RcError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| RcError::RoomClosed)
    }

    async fn receive<T>(rx: oneshot::Receiver<Result<T, RcError>>) -> Result<T, RcError> {
        rx.await.map_err(|_| RcError::RoomClosed)?
    }

    /// Admit a peer. Events for the peer are pushed into `events`.
    pub async fn join(
        &self,
        peer_id: String,
        events: mpsc::UnboundedSender<PushEvent>,
    ) -> Result<JoinResult, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            peer_id,
            events,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Tear down a peer. Fire-and-forget; a closed room is ignored.
    pub async fn disconnect(&self, peer_id: String) {
        if self
            .send(RoomMessage::Disconnect { peer_id })
            .await
            .is_err()
        {
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                "Disconnect sent to stopped room"
            );
        }
    }

    /// Create the peer's send or receive transport.
    pub async fn create_transport(
        &self,
        peer_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportOptions, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::PrepareCreateTransport {
            peer_id: peer_id.to_string(),
            direction,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await?;

        let options = observe_call(
            ProviderOperation::CreateTransport,
            self.provider.create_transport(&self.capabilities, direction),
        )
        .await?;

        let (tx, rx) = oneshot::channel();
        let committed = match self
            .send(RoomMessage::CommitCreateTransport {
                peer_id: peer_id.to_string(),
                direction,
                transport_id: options.id.clone(),
                respond_to: tx,
            })
            .await
        {
            Ok(()) => Self::receive(rx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            self.discard(MediaHandle::Transport(options.id));
            return Err(e);
        }

        Ok(options)
    }

    /// Complete the DTLS handshake of the peer's transport.
    pub async fn connect_transport(
        &self,
        peer_id: &str,
        direction: TransportDirection,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::PrepareConnectTransport {
            peer_id: peer_id.to_string(),
            direction,
            respond_to: tx,
        })
        .await?;
        let transport_id = Self::receive(rx).await?;

        observe_call(
            ProviderOperation::ConnectTransport,
            self.provider
                .connect_transport(&transport_id, dtls_parameters),
        )
        .await?;

        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::CommitConnectTransport {
            peer_id: peer_id.to_string(),
            direction,
            transport_id,
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Publish a track. Returns the producer id.
    pub async fn produce(
        &self,
        peer_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<String, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::PrepareProduce {
            peer_id: peer_id.to_string(),
            kind,
            respond_to: tx,
        })
        .await?;
        let transport_id = Self::receive(rx).await?;

        let producer_id = observe_call(
            ProviderOperation::Produce,
            self.provider.produce(&transport_id, kind, rtp_parameters),
        )
        .await?;

        let (tx, rx) = oneshot::channel();
        let committed = match self
            .send(RoomMessage::CommitProduce {
                peer_id: peer_id.to_string(),
                kind,
                producer_id: producer_id.clone(),
                respond_to: tx,
            })
            .await
        {
            Ok(()) => Self::receive(rx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            self.discard(MediaHandle::Producer(producer_id));
            return Err(e);
        }

        Ok(producer_id)
    }

    /// Subscribe to another peer's producer.
    pub async fn consume(
        &self,
        peer_id: &str,
        producer_id: &str,
        capabilities: RtpCapabilities,
    ) -> Result<ConsumerOptions, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::PrepareConsume {
            peer_id: peer_id.to_string(),
            producer_id: producer_id.to_string(),
            capabilities: capabilities.clone(),
            respond_to: tx,
        })
        .await?;
        let ticket = Self::receive(rx).await?;

        let consumer = observe_call(
            ProviderOperation::Consume,
            self.provider
                .consume(&ticket.transport_id, producer_id, &capabilities),
        )
        .await?;

        let (tx, rx) = oneshot::channel();
        let committed = match self
            .send(RoomMessage::CommitConsume {
                peer_id: peer_id.to_string(),
                consumer: consumer.clone(),
                respond_to: tx,
            })
            .await
        {
            Ok(()) => Self::receive(rx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            self.discard(MediaHandle::Consumer(consumer.id));
            return Err(e);
        }

        Ok(consumer)
    }

    /// Producers of other peers that existed when `peer_id` joined.
    pub async fn existing_producers(&self, peer_id: &str) -> Result<Vec<String>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetExistingProducers {
            peer_id: peer_id.to_string(),
            respond_to: tx,
        })
        .await?;
        Self::receive(rx).await
    }

    /// Retire the room if it is empty. Returns `true` if the room is retired.
    pub async fn try_retire(&self) -> Result<bool, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::TryRetire { respond_to: tx }).await?;
        rx.await.map_err(|_| RcError::RoomClosed)
    }

    /// Get current room state.
    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetState { respond_to: tx }).await?;
        rx.await.map_err(|_| RcError::RoomClosed)
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Release a resource whose commit was rejected.
    fn discard(&self, handle: MediaHandle) {
        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            handle = %handle,
            "Commit rejected, closing fresh media handle"
        );
        close_detached(Arc::clone(&self.provider), vec![handle]);
    }
}

struct Member {
    session: PeerSession,
    events: mpsc::UnboundedSender<PushEvent>,
}

struct ProducerEntry {
    owner: String,
    kind: MediaKind,
    seq: u64,
}

struct ConsumerEntry {
    owner: String,
    producer_id: String,
}

/// The room actor implementation.
pub struct RoomActor {
    room_id: String,
    generation: u64,
    capabilities: Arc<RtpCapabilities>,
    settings: RoomSettings,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    /// Registry mailbox, used to announce retirement.
    registry: mpsc::Sender<RegistryMessage>,
    provider: Arc<dyn CapabilityProvider>,
    members: HashMap<String, Member>,
    producers: HashMap<String, ProducerEntry>,
    /// Producer ids in commit order.
    producer_order: Vec<String>,
    consumers: HashMap<String, ConsumerEntry>,
    commit_seq: u64,
    /// Set while the room has no members.
    empty_since: Option<Instant>,
    retired: bool,
    created_at: i64,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// # Arguments
    ///
    /// * `room_id` - Room identifier
    /// * `generation` - Incarnation number assigned by the registry
    /// * `capabilities` - Result of `describe_capabilities` for this room
    /// * `settings` - Grace period and capacity
    /// * `provider` - Media engine, called from handles, never from the loop
    /// * `registry` - Registry mailbox for the retirement notice
    /// * `cancel_token` - Cancellation token (child of the registry's token)
    /// * `metrics` - Shared actor metrics
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        room_id: String,
        generation: u64,
        capabilities: RtpCapabilities,
        settings: RoomSettings,
        provider: Arc<dyn CapabilityProvider>,
        registry: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let capabilities = Arc::new(capabilities);

        let actor = Self {
            room_id: room_id.clone(),
            generation,
            capabilities: Arc::clone(&capabilities),
            settings,
            receiver,
            cancel_token: cancel_token.clone(),
            registry,
            provider: Arc::clone(&provider),
            members: HashMap::new(),
            producers: HashMap::new(),
            producer_order: Vec::new(),
            consumers: HashMap::new(),
            commit_seq: 0,
            // A room nobody joins retires like an emptied one.
            empty_since: Some(Instant::now()),
            retired: false,
            created_at: chrono::Utc::now().timestamp(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &room_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            generation,
            capabilities,
            provider,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            generation = self.generation,
            "RoomActor started"
        );

        let mut grace_check = tokio::time::interval(self.settings.grace_check_interval);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                _ = grace_check.tick() => {
                    self.check_grace_period().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_processed(self.receiver.len());
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.graceful_shutdown();
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            generation = self.generation,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                peer_id,
                events,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_join(peer_id, events));
            }

            RoomMessage::Disconnect { peer_id } => {
                self.handle_disconnect(&peer_id);
            }

            RoomMessage::PrepareCreateTransport {
                peer_id,
                direction,
                respond_to,
            } => {
                let result = self
                    .member(&peer_id)
                    .and_then(|member| member.session.check_create_transport(direction));
                let _ = respond_to.send(result);
            }

            RoomMessage::CommitCreateTransport {
                peer_id,
                direction,
                transport_id,
                respond_to,
            } => {
                let result = self.member_mut(&peer_id).and_then(|member| {
                    member.session.record_transport(direction, transport_id)?;
                    member.session.acknowledge_capabilities();
                    Ok(())
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::PrepareConnectTransport {
                peer_id,
                direction,
                respond_to,
            } => {
                let result = self.member(&peer_id).and_then(|member| {
                    member
                        .session
                        .check_connect_transport(direction)
                        .map(str::to_string)
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::CommitConnectTransport {
                peer_id,
                direction,
                transport_id,
                respond_to,
            } => {
                let result = self.member_mut(&peer_id).and_then(|member| {
                    member
                        .session
                        .record_transport_connected(direction, &transport_id)
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::PrepareProduce {
                peer_id,
                kind,
                respond_to,
            } => {
                let _ = respond_to.send(self.prepare_produce(&peer_id, kind));
            }

            RoomMessage::CommitProduce {
                peer_id,
                kind,
                producer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.commit_produce(&peer_id, kind, producer_id));
            }

            RoomMessage::PrepareConsume {
                peer_id,
                producer_id,
                capabilities,
                respond_to,
            } => {
                let result = self.prepare_consume(&peer_id, &producer_id, &capabilities);
                let _ = respond_to.send(result);
            }

            RoomMessage::CommitConsume {
                peer_id,
                consumer,
                respond_to,
            } => {
                let _ = respond_to.send(self.commit_consume(&peer_id, &consumer));
            }

            RoomMessage::GetExistingProducers {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.existing_producers(&peer_id));
            }

            RoomMessage::TryRetire { respond_to } => {
                let retired = if self.retired {
                    true
                } else if self.members.is_empty() {
                    self.retire().await;
                    true
                } else {
                    false
                };
                let _ = respond_to.send(retired);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn member(&self, peer_id: &str) -> Result<&Member, RcError> {
        self.members
            .get(peer_id)
            .ok_or_else(|| RcError::StaleReference("peer is not in the room".to_string()))
    }

    fn member_mut(&mut self, peer_id: &str) -> Result<&mut Member, RcError> {
        self.members
            .get_mut(peer_id)
            .ok_or_else(|| RcError::StaleReference("peer is not in the room".to_string()))
    }

    fn handle_join(
        &mut self,
        peer_id: String,
        events: mpsc::UnboundedSender<PushEvent>,
    ) -> Result<JoinResult, RcError> {
        if self.retired {
            return Err(RcError::RoomClosed);
        }
        if self.members.contains_key(&peer_id) {
            return Err(RcError::PreconditionViolation(
                "peer already joined".to_string(),
            ));
        }
        if self.members.len() >= self.settings.max_peers {
            return Err(RcError::CapacityExceeded(format!(
                "room is full ({} peers)",
                self.settings.max_peers
            )));
        }

        self.members.insert(
            peer_id.clone(),
            Member {
                session: PeerSession::new(peer_id.clone(), self.commit_seq),
                events,
            },
        );
        self.empty_since = None;
        self.metrics.peer_joined();

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            joined_seq = self.commit_seq,
            members = self.members.len(),
            "Peer joined"
        );

        Ok(JoinResult {
            room_id: self.room_id.clone(),
            peer_id,
            capabilities: (*self.capabilities).clone(),
        })
    }

    fn prepare_produce(&self, peer_id: &str, kind: MediaKind) -> Result<String, RcError> {
        let member = self.member(peer_id)?;
        let transport_id = member.session.check_produce(kind)?;
        if !self.capabilities.supports_kind(kind) {
            return Err(RcError::IncompatibleCapabilities(format!(
                "room does not route {kind}"
            )));
        }
        Ok(transport_id.to_string())
    }

    fn commit_produce(
        &mut self,
        peer_id: &str,
        kind: MediaKind,
        producer_id: String,
    ) -> Result<(), RcError> {
        self.member_mut(peer_id)?
            .session
            .record_producer(producer_id.clone(), kind)?;

        self.commit_seq += 1;
        self.producers.insert(
            producer_id.clone(),
            ProducerEntry {
                owner: peer_id.to_string(),
                kind,
                seq: self.commit_seq,
            },
        );
        self.producer_order.push(producer_id.clone());

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            kind = %kind,
            seq = self.commit_seq,
            "Producer committed"
        );

        let event = PushEvent::NewProducer { producer_id };
        for (member_id, member) in &self.members {
            if member_id != peer_id {
                push(&self.room_id, member_id, &member.events, event.clone());
            }
        }

        Ok(())
    }

    fn prepare_consume(
        &self,
        peer_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumeTicket, RcError> {
        let member = self.member(peer_id)?;
        let producer = self
            .producers
            .get(producer_id)
            .ok_or_else(|| RcError::StaleReference("producer does not exist".to_string()))?;
        let transport_id = member.session.check_consume(producer_id)?;
        self.ensure_not_consumed(peer_id, producer_id)?;
        if !capabilities.can_consume(&self.capabilities, producer.kind) {
            return Err(RcError::IncompatibleCapabilities(format!(
                "no common {} codec",
                producer.kind
            )));
        }

        Ok(ConsumeTicket {
            transport_id: transport_id.to_string(),
            kind: producer.kind,
        })
    }

    fn commit_consume(&mut self, peer_id: &str, consumer: &ConsumerOptions) -> Result<(), RcError> {
        if !self.producers.contains_key(&consumer.producer_id) {
            return Err(RcError::StaleReference(
                "producer closed before the consumer was committed".to_string(),
            ));
        }
        self.ensure_not_consumed(peer_id, &consumer.producer_id)?;

        let member = self.member_mut(peer_id)?;
        member.session.check_consume(&consumer.producer_id)?;
        member.session.record_consumer(consumer.id.clone())?;

        self.consumers.insert(
            consumer.id.clone(),
            ConsumerEntry {
                owner: peer_id.to_string(),
                producer_id: consumer.producer_id.clone(),
            },
        );

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            consumer_id = %consumer.id,
            producer_id = %consumer.producer_id,
            "Consumer committed"
        );
        Ok(())
    }

    fn ensure_not_consumed(&self, peer_id: &str, producer_id: &str) -> Result<(), RcError> {
        let duplicate = self
            .consumers
            .values()
            .any(|entry| entry.owner == peer_id && entry.producer_id == producer_id);
        if duplicate {
            return Err(RcError::PreconditionViolation(
                "producer already consumed".to_string(),
            ));
        }
        Ok(())
    }

    fn existing_producers(&self, peer_id: &str) -> Result<Vec<String>, RcError> {
        let joined_seq = self.member(peer_id)?.session.joined_seq();
        Ok(self
            .producer_order
            .iter()
            .filter(|id| {
                self.producers
                    .get(id.as_str())
                    .is_some_and(|entry| entry.owner != peer_id && entry.seq <= joined_seq)
            })
            .cloned()
            .collect())
    }

    /// Remove a peer and everything that depends on it.
    fn handle_disconnect(&mut self, peer_id: &str) {
        let Some(mut member) = self.members.remove(peer_id) else {
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Disconnect for unknown peer ignored"
            );
            return;
        };

        let owned_handles = member.session.close();
        self.consumers.retain(|_, entry| entry.owner != peer_id);

        let owned_producers: Vec<String> = self
            .producers
            .iter()
            .filter(|(_, entry)| entry.owner == peer_id)
            .map(|(id, _)| id.clone())
            .collect();
        self.producer_order
            .retain(|id| !owned_producers.contains(id));

        // Consumers of other peers go first, then the peer's own resources.
        let mut handles = Vec::new();
        for producer_id in &owned_producers {
            self.producers.remove(producer_id);

            let dependents: Vec<(String, String)> = self
                .consumers
                .iter()
                .filter(|(_, entry)| &entry.producer_id == producer_id)
                .map(|(id, entry)| (id.clone(), entry.owner.clone()))
                .collect();

            for (consumer_id, owner) in dependents {
                self.consumers.remove(&consumer_id);
                if let Some(subscriber) = self.members.get_mut(&owner) {
                    subscriber.session.remove_consumer(&consumer_id);
                    push(
                        &self.room_id,
                        &owner,
                        &subscriber.events,
                        PushEvent::ConsumerClosed {
                            consumer_id: consumer_id.clone(),
                            producer_id: producer_id.clone(),
                        },
                    );
                }
                handles.push(MediaHandle::Consumer(consumer_id));
            }
        }

        let cascaded = handles.len();
        if cascaded > 0 {
            prom::record_cascade_closes(cascaded as u64);
        }
        handles.extend(owned_handles);
        close_detached(Arc::clone(&self.provider), handles);

        self.metrics.peer_left();
        if self.members.is_empty() {
            self.empty_since = Some(Instant::now());
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producers_closed = owned_producers.len(),
            consumers_cascaded = cascaded,
            members = self.members.len(),
            "Peer left"
        );
    }

    /// Retire the room once it has been empty for the grace period.
    async fn check_grace_period(&mut self) {
        if self.retired {
            return;
        }
        let Some(since) = self.empty_since else {
            return;
        };
        if since.elapsed() >= self.settings.grace_period {
            info!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                grace_period_ms = self.settings.grace_period.as_millis(),
                "Room empty past grace period"
            );
            self.retire().await;
        }
    }

    /// Stop admitting peers and tell the registry to drop this room.
    ///
    /// The actor keeps running until the registry cancels it, answering late
    /// requests with `RoomClosed`.
    async fn retire(&mut self) {
        self.retired = true;
        let notice = RegistryMessage::RoomRetired {
            room_id: self.room_id.clone(),
            generation: self.generation,
        };
        if self.registry.send(notice).await.is_err() {
            warn!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                "Registry gone, room retiring on its own"
            );
            self.cancel_token.cancel();
        }
    }

    fn snapshot(&self) -> RoomState {
        let mut peers: Vec<PeerInfo> = self
            .members
            .values()
            .map(|member| PeerInfo {
                peer_id: member.session.peer_id().to_string(),
                state: member.session.state(),
                producer_ids: member
                    .session
                    .producer_ids()
                    .map(str::to_string)
                    .collect(),
                consumer_ids: member.session.consumer_ids().to_vec(),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        RoomState {
            room_id: self.room_id.clone(),
            generation: self.generation,
            peers,
            producer_count: self.producers.len(),
            consumer_count: self.consumers.len(),
            commit_seq: self.commit_seq,
            is_retired: self.retired,
            created_at: self.created_at,
        }
    }

    /// Release every engine resource the room still holds.
    fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            members = self.members.len(),
            producers = self.producers.len(),
            consumers = self.consumers.len(),
            "Performing graceful shutdown"
        );

        self.retired = true;
        let mut handles = Vec::new();
        for (_, mut member) in self.members.drain() {
            handles.extend(member.session.close());
            self.metrics.peer_left();
        }
        self.producers.clear();
        self.producer_order.clear();
        self.consumers.clear();
        close_detached(Arc::clone(&self.provider), handles);
    }
}

/// Push an event to one member. A closed channel means the peer is already
/// on its way out, so the event is dropped.
fn push(room_id: &str, peer_id: &str, events: &mpsc::UnboundedSender<PushEvent>, event: PushEvent) {
    let name = event.as_str();
    if events.send(event).is_ok() {
        prom::record_fanout_event(name);
    } else {
        debug!(
            target: "rc.actor.room",
            room_id = %room_id,
            peer_id = %peer_id,
            event = name,
            "Dropped push event for closed peer channel"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::RtpCodecCapability;
    use crate::provider::InMemoryProvider;
    use crate::session::PeerState;
    use serde_json::json;

    struct TestRoom {
        handle: RoomActorHandle,
        provider: Arc<InMemoryProvider>,
        registry_rx: mpsc::Receiver<RegistryMessage>,
        metrics: Arc<ActorMetrics>,
    }

    fn spawn_room(settings: RoomSettings) -> TestRoom {
        let provider = Arc::new(InMemoryProvider::new());
        let (registry_tx, registry_rx) = mpsc::channel(8);
        let metrics = ActorMetrics::new();
        let (handle, _task) = RoomActor::spawn(
            "room-test".to_string(),
            1,
            RtpCapabilities::default_room_codecs(),
            settings,
            Arc::clone(&provider) as Arc<dyn CapabilityProvider>,
            registry_tx,
            CancellationToken::new(),
            Arc::clone(&metrics),
        );
        TestRoom {
            handle,
            provider,
            registry_rx,
            metrics,
        }
    }

    async fn join(
        handle: &RoomActorHandle,
        peer_id: &str,
    ) -> mpsc::UnboundedReceiver<PushEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.join(peer_id.to_string(), tx).await.unwrap();
        rx
    }

    async fn open_transport(handle: &RoomActorHandle, peer_id: &str, direction: TransportDirection) {
        handle.create_transport(peer_id, direction).await.unwrap();
        handle
            .connect_transport(peer_id, direction, json!({ "role": "client" }))
            .await
            .unwrap();
    }

    async fn publish_video(handle: &RoomActorHandle, peer_id: &str) -> String {
        open_transport(handle, peer_id, TransportDirection::Send).await;
        handle
            .produce(peer_id, MediaKind::Video, json!({ "encodings": [] }))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_room_actor_spawn() {
        let room = spawn_room(RoomSettings::default());

        assert_eq!(room.handle.room_id(), "room-test");
        assert_eq!(room.handle.generation(), 1);
        assert!(!room.handle.is_cancelled());

        room.handle.cancel();
        assert!(room.handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_join_returns_capabilities() {
        let room = spawn_room(RoomSettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = room.handle.join("peer-a".to_string(), tx).await.unwrap();

        assert_eq!(result.room_id, "room-test");
        assert_eq!(result.peer_id, "peer-a");
        assert_eq!(result.capabilities, RtpCapabilities::default_room_codecs());
        assert_eq!(room.metrics.peer_count(), 1);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let room = spawn_room(RoomSettings::default());
        let _rx = join(&room.handle, "peer-a").await;

        let (tx, _rx2) = mpsc::unbounded_channel();
        let result = room.handle.join("peer-a".to_string(), tx).await;
        assert!(matches!(result, Err(RcError::PreconditionViolation(_))));

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_join_capacity() {
        let room = spawn_room(RoomSettings {
            max_peers: 1,
            ..RoomSettings::default()
        });
        let _rx = join(&room.handle, "peer-a").await;

        let (tx, _rx2) = mpsc::unbounded_channel();
        let result = room.handle.join("peer-b".to_string(), tx).await;
        assert!(matches!(result, Err(RcError::CapacityExceeded(_))));

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_first_transport_request_acknowledges_capabilities() {
        let room = spawn_room(RoomSettings::default());
        let _rx = join(&room.handle, "peer-a").await;

        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.peers[0].state, PeerState::Joining);

        room.handle
            .create_transport("peer-a", TransportDirection::Send)
            .await
            .unwrap();
        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.peers[0].state, PeerState::Ready);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_failed_transport_creation_keeps_peer_joining() {
        let room = spawn_room(RoomSettings::default());
        let _rx = join(&room.handle, "peer-a").await;
        room.provider
            .fail_next(ProviderOperation::CreateTransport, 1)
            .await;

        let result = room
            .handle
            .create_transport("peer-a", TransportDirection::Send)
            .await;
        assert!(matches!(result, Err(RcError::ProviderFailure(_))));

        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.peers[0].state, PeerState::Joining);

        // A retry succeeds and acknowledges the capabilities then
        room.handle
            .create_transport("peer-a", TransportDirection::Send)
            .await
            .unwrap();
        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.peers[0].state, PeerState::Ready);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_produce_before_connect_is_precondition_violation() {
        let room = spawn_room(RoomSettings::default());
        let _rx = join(&room.handle, "peer-a").await;
        room.handle
            .create_transport("peer-a", TransportDirection::Send)
            .await
            .unwrap();

        let result = room
            .handle
            .produce("peer-a", MediaKind::Video, json!({}))
            .await;
        assert!(matches!(result, Err(RcError::PreconditionViolation(_))));
        assert_eq!(room.provider.call_count(ProviderOperation::Produce).await, 0);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_produce_pushes_to_other_members_only() {
        let room = spawn_room(RoomSettings::default());
        let mut a_events = join(&room.handle, "peer-a").await;
        let mut b_events = join(&room.handle, "peer-b").await;

        let producer_id = publish_video(&room.handle, "peer-a").await;

        assert_eq!(
            b_events.recv().await.unwrap(),
            PushEvent::NewProducer {
                producer_id: producer_id.clone()
            }
        );
        assert!(a_events.try_recv().is_err());

        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.producer_count, 1);
        assert_eq!(state.commit_seq, 1);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_existing_producers_cover_only_earlier_commits() {
        let room = spawn_room(RoomSettings::default());
        let _a = join(&room.handle, "peer-a").await;
        let early = publish_video(&room.handle, "peer-a").await;

        let mut b_events = join(&room.handle, "peer-b").await;
        let late = room
            .handle
            .produce("peer-a", MediaKind::Audio, json!({}))
            .await
            .unwrap();

        let existing = room.handle.existing_producers("peer-b").await.unwrap();
        assert_eq!(existing, vec![early]);
        assert_eq!(
            b_events.recv().await.unwrap(),
            PushEvent::NewProducer { producer_id: late }
        );

        // Own producers are never listed
        assert!(room
            .handle
            .existing_producers("peer-a")
            .await
            .unwrap()
            .is_empty());

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_consume_unknown_producer_is_stale() {
        let room = spawn_room(RoomSettings::default());
        let _rx = join(&room.handle, "peer-b").await;
        open_transport(&room.handle, "peer-b", TransportDirection::Recv).await;

        let result = room
            .handle
            .consume(
                "peer-b",
                "never-produced",
                RtpCapabilities::default_room_codecs(),
            )
            .await;
        assert!(matches!(result, Err(RcError::StaleReference(_))));
        assert_eq!(room.provider.call_count(ProviderOperation::Consume).await, 0);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_consume_incompatible_skips_provider() {
        let room = spawn_room(RoomSettings::default());
        let _a = join(&room.handle, "peer-a").await;
        let _b = join(&room.handle, "peer-b").await;
        let producer_id = publish_video(&room.handle, "peer-a").await;
        open_transport(&room.handle, "peer-b", TransportDirection::Recv).await;

        let h264 = RtpCapabilities {
            codecs: vec![RtpCodecCapability::video("video/H264", 90000)],
            header_extensions: Vec::new(),
        };
        let result = room.handle.consume("peer-b", &producer_id, h264).await;

        assert!(matches!(result, Err(RcError::IncompatibleCapabilities(_))));
        assert_eq!(room.provider.call_count(ProviderOperation::Consume).await, 0);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_consume_own_and_duplicate_rejected() {
        let room = spawn_room(RoomSettings::default());
        let _a = join(&room.handle, "peer-a").await;
        let _b = join(&room.handle, "peer-b").await;
        let producer_id = publish_video(&room.handle, "peer-a").await;
        open_transport(&room.handle, "peer-a", TransportDirection::Recv).await;
        open_transport(&room.handle, "peer-b", TransportDirection::Recv).await;
        let caps = RtpCapabilities::default_room_codecs();

        let own = room
            .handle
            .consume("peer-a", &producer_id, caps.clone())
            .await;
        assert!(matches!(own, Err(RcError::PreconditionViolation(_))));

        room.handle
            .consume("peer-b", &producer_id, caps.clone())
            .await
            .unwrap();
        let again = room.handle.consume("peer-b", &producer_id, caps).await;
        assert!(matches!(again, Err(RcError::PreconditionViolation(_))));

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_cascades_consumer_closed() {
        let room = spawn_room(RoomSettings::default());
        let _a = join(&room.handle, "peer-a").await;
        let mut b_events = join(&room.handle, "peer-b").await;
        let producer_id = publish_video(&room.handle, "peer-a").await;
        let _ = b_events.recv().await;
        open_transport(&room.handle, "peer-b", TransportDirection::Recv).await;
        let consumer = room
            .handle
            .consume("peer-b", &producer_id, RtpCapabilities::default_room_codecs())
            .await
            .unwrap();

        room.handle.disconnect("peer-a".to_string()).await;

        assert_eq!(
            b_events.recv().await.unwrap(),
            PushEvent::ConsumerClosed {
                consumer_id: consumer.id.clone(),
                producer_id: producer_id.clone(),
            }
        );
        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.peers.len(), 1);
        assert_eq!(state.producer_count, 0);
        assert_eq!(state.consumer_count, 0);
        assert!(state.peers[0].consumer_ids.is_empty());

        // Engine resources are released in the background
        for _ in 0..100 {
            if !room
                .provider
                .is_open(&MediaHandle::Producer(producer_id.clone()))
                .await
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!room.provider.is_open(&MediaHandle::Producer(producer_id)).await);
        assert!(!room.provider.is_open(&MediaHandle::Consumer(consumer.id)).await);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let room = spawn_room(RoomSettings::default());
        let _a = join(&room.handle, "peer-a").await;

        room.handle.disconnect("peer-a".to_string()).await;
        room.handle.disconnect("peer-a".to_string()).await;

        let state = room.handle.get_state().await.unwrap();
        assert!(state.peers.is_empty());
        assert_eq!(room.metrics.peer_count(), 0);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_try_retire_only_when_empty() {
        let mut room = spawn_room(RoomSettings::default());
        let _a = join(&room.handle, "peer-a").await;

        assert!(!room.handle.try_retire().await.unwrap());

        room.handle.disconnect("peer-a".to_string()).await;
        assert!(room.handle.try_retire().await.unwrap());

        match room.registry_rx.recv().await.unwrap() {
            RegistryMessage::RoomRetired {
                room_id,
                generation,
            } => {
                assert_eq!(room_id, "room-test");
                assert_eq!(generation, 1);
            }
            other => panic!("unexpected registry message: {other:?}"),
        }

        // Retired rooms refuse new members
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = room.handle.join("peer-b".to_string(), tx).await;
        assert_eq!(result.unwrap_err(), RcError::RoomClosed);

        room.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_retires_after_grace() {
        let mut room = spawn_room(RoomSettings {
            grace_period: Duration::from_secs(5),
            grace_check_interval: Duration::from_millis(500),
            max_peers: 10,
        });
        let _a = join(&room.handle, "peer-a").await;
        room.handle.disconnect("peer-a".to_string()).await;

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(room.registry_rx.try_recv().is_err());

        let notice = tokio::time::timeout(Duration::from_secs(5), room.registry_rx.recv())
            .await
            .expect("room should retire")
            .unwrap();
        assert!(matches!(notice, RegistryMessage::RoomRetired { .. }));

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_releases_engine_resources() {
        let room = spawn_room(RoomSettings::default());
        let _a = join(&room.handle, "peer-a").await;
        publish_video(&room.handle, "peer-a").await;
        assert_eq!(room.provider.open_handle_count().await, 2);

        room.handle.cancel();

        for _ in 0..100 {
            if room.provider.open_handle_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(room.provider.open_handle_count().await, 0);
        assert_eq!(room.metrics.peer_count(), 0);
    }
}
