//! `RoomRegistryActor` - singleton supervisor for room actors.
//!
//! The `RoomRegistryActor` is the top-level actor of the room controller:
//!
//! - Singleton per process
//! - Maps room ids to running `RoomActor` instances
//! - Creates rooms lazily; concurrent requests for an unseen id share one
//!   `describe_capabilities` call
//! - Removes rooms that retire themselves after the grace period
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Room Creation
//!
//! The first request for an unseen id inserts a `Pending` slot and spawns a
//! task that asks the provider for the room's capabilities. Later requests
//! for the same id queue on the slot. When the task reports back, the room
//! actor is spawned and every queued request receives the same handle, or
//! every request receives the provider error. The registry loop itself never
//! awaits the provider or a room.
//!
//! # Generations
//!
//! Each incarnation of a room id gets a fresh generation number. Retirement
//! notices and creation results carry the generation so a late message from
//! a previous incarnation cannot remove its successor.

use super::messages::{JoinResult, PushEvent, RegistryMessage, RegistryStatus, RoomInfo};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomSettings};
use crate::errors::RcError;
use crate::media::RtpCapabilities;
use crate::observability::metrics as prom;
use crate::provider::{observe_call, CapabilityProvider, ProviderError, ProviderOperation};

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Length of generated room ids.
const ROOM_ID_LENGTH: usize = 6;

/// How long a removed room's task may take to finish before it is abandoned.
const ROOM_REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-room wait during shutdown when no deadline was given.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Registry tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Rooms allowed at once, pending ones included.
    pub max_rooms: usize,
    /// Settings handed to every room.
    pub room: RoomSettings,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_rooms: 1000,
            room: RoomSettings::default(),
        }
    }
}

type RoomWaiter = oneshot::Sender<Result<RoomActorHandle, RcError>>;

/// Handle to the `RoomRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    /// Cancelled by the actor once its loop has exited.
    stopped: CancellationToken,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    ///
    /// # Arguments
    ///
    /// * `registry_id` - Instance id used in logs
    /// * `provider` - Media engine shared by every room
    /// * `settings` - Room limit and per-room settings
    /// * `metrics` - Shared actor metrics
    #[must_use]
    pub fn new(
        registry_id: String,
        provider: Arc<dyn CapabilityProvider>,
        settings: RegistrySettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let stopped = CancellationToken::new();

        let actor = RoomRegistryActor::new(
            registry_id,
            receiver,
            sender.clone(),
            cancel_token.clone(),
            stopped.clone(),
            provider,
            settings,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            stopped,
        }
    }

    async fn request<T>(
        &self,
        message: RegistryMessage,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, RcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Return the room for `room_id`, creating it on first use.
    pub async fn get_or_create_room(&self, room_id: String) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::GetOrCreateRoom {
                room_id,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Create a room under a fresh random id.
    pub async fn create_room(&self) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(RegistryMessage::CreateRoom { respond_to: tx }, rx)
            .await?
    }

    /// Join `peer_id` to `room_id`, creating the room if needed.
    ///
    /// A room that retired between lookup and join is replaced by a fresh
    /// incarnation, once.
    pub async fn join_room(
        &self,
        room_id: String,
        peer_id: String,
        events: mpsc::UnboundedSender<PushEvent>,
    ) -> Result<(RoomActorHandle, JoinResult), RcError> {
        let room = self.get_or_create_room(room_id.clone()).await?;
        match room.join(peer_id.clone(), events.clone()).await {
            Err(RcError::RoomClosed) => {
                debug!(
                    target: "rc.actor.registry",
                    room_id = %room_id,
                    generation = room.generation(),
                    "Room retired during join, retrying"
                );
                let room = self.get_or_create_room(room_id).await?;
                let joined = room.join(peer_id, events).await?;
                Ok((room, joined))
            }
            result => Ok((room, result?)),
        }
    }

    /// Create a room under a fresh id and join `peer_id` to it.
    pub async fn create_and_join_room(
        &self,
        peer_id: String,
        events: mpsc::UnboundedSender<PushEvent>,
    ) -> Result<(RoomActorHandle, JoinResult), RcError> {
        let room = self.create_room().await?;
        let joined = room.join(peer_id, events).await?;
        Ok((room, joined))
    }

    /// Retire `room_id` now if it has no peers.
    ///
    /// Returns `true` if the room is gone or going, `false` if it still has
    /// members or does not exist.
    pub async fn remove_room_if_empty(&self, room_id: String) -> Result<bool, RcError> {
        let room = match self.lookup_room(room_id).await {
            Ok(room) => room,
            Err(RcError::RoomNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match room.try_retire().await {
            Ok(retired) => Ok(retired),
            Err(RcError::RoomClosed) => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn lookup_room(&self, room_id: String) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::LookupRoom {
                room_id,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Get information about an existing room.
    pub async fn get_room(&self, room_id: String) -> Result<RoomInfo, RcError> {
        let room = self.lookup_room(room_id.clone()).await?;
        let state = room
            .get_state()
            .await
            .map_err(|_| RcError::RoomNotFound(room_id))?;

        Ok(RoomInfo {
            room_id: state.room_id,
            peer_count: state.peers.len(),
            producer_count: state.producer_count,
            consumer_count: state.consumer_count,
            created_at: state.created_at,
            generation: state.generation,
        })
    }

    /// Get the current registry status.
    pub async fn get_status(&self) -> Result<RegistryStatus, RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(RegistryMessage::GetStatus { respond_to: tx }, rx)
            .await
    }

    /// Initiate graceful shutdown. Each room gets up to `deadline` to stop.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Shutdown {
                deadline,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Wait until the actor has drained its rooms and exited.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Get a child token for tasks that must stop with the registry.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a running room.
struct ManagedRoom {
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    created_at: i64,
    generation: u64,
}

enum RoomSlot {
    /// `describe_capabilities` in flight; requests queue here.
    Pending {
        generation: u64,
        waiters: Vec<RoomWaiter>,
    },
    Active(ManagedRoom),
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    registry_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Own mailbox, handed to creation tasks and rooms.
    self_sender: mpsc::Sender<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    stopped: CancellationToken,
    provider: Arc<dyn CapabilityProvider>,
    settings: RegistrySettings,
    rooms: HashMap<String, RoomSlot>,
    next_generation: u64,
    accepting_new: bool,
    shutdown_deadline: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    #[expect(clippy::too_many_arguments)] // Spawned only from RoomRegistryHandle::new
    fn new(
        registry_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        self_sender: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        stopped: CancellationToken,
        provider: Arc<dyn CapabilityProvider>,
        settings: RegistrySettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &registry_id);

        Self {
            registry_id,
            receiver,
            self_sender,
            cancel_token,
            stopped,
            provider,
            settings,
            rooms: HashMap::new(),
            next_generation: 1,
            accepting_new: true,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.registry", fields(registry_id = %self.registry_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            max_rooms = self.settings.max_rooms,
            "RoomRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.registry",
                        registry_id = %self.registry_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_processed(self.receiver.len());
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.registry",
                                registry_id = %self.registry_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
        self.stopped.cancel();
    }

    /// Handle a single message. Never awaits a room or the provider.
    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                self.get_or_create_room(room_id, respond_to);
            }

            RegistryMessage::CreateRoom { respond_to } => {
                if !self.accepting_new {
                    let _ = respond_to.send(Err(RcError::Draining));
                    return;
                }
                let room_id = self.fresh_room_id();
                self.begin_creation(room_id, respond_to);
            }

            RegistryMessage::RoomDescribed {
                room_id,
                generation,
                result,
            } => {
                self.finish_creation(room_id, generation, result);
            }

            RegistryMessage::LookupRoom {
                room_id,
                respond_to,
            } => {
                let result = match self.rooms.get(&room_id) {
                    Some(RoomSlot::Active(managed)) => Ok(managed.handle.clone()),
                    _ => Err(RcError::RoomNotFound(room_id)),
                };
                let _ = respond_to.send(result);
            }

            RegistryMessage::RoomRetired {
                room_id,
                generation,
            } => {
                self.remove_retired_room(&room_id, generation);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let _ = respond_to.send(self.initiate_shutdown(deadline));
            }
        }
    }

    fn get_or_create_room(&mut self, room_id: String, respond_to: RoomWaiter) {
        if !self.accepting_new {
            let _ = respond_to.send(Err(RcError::Draining));
            return;
        }

        match self.rooms.get_mut(&room_id) {
            Some(RoomSlot::Active(managed)) => {
                let _ = respond_to.send(Ok(managed.handle.clone()));
            }
            Some(RoomSlot::Pending { waiters, .. }) => {
                waiters.push(respond_to);
            }
            None => self.begin_creation(room_id, respond_to),
        }
    }

    /// Random lowercase alphanumeric id not currently in use.
    fn fresh_room_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ROOM_ID_LENGTH)
                .map(|byte| char::from(byte).to_ascii_lowercase())
                .collect();
            if !self.rooms.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Insert a pending slot and start the capability lookup.
    fn begin_creation(&mut self, room_id: String, respond_to: RoomWaiter) {
        if self.rooms.len() >= self.settings.max_rooms {
            warn!(
                target: "rc.actor.registry",
                registry_id = %self.registry_id,
                max_rooms = self.settings.max_rooms,
                "Room limit reached"
            );
            let _ = respond_to.send(Err(RcError::CapacityExceeded(format!(
                "room limit reached ({})",
                self.settings.max_rooms
            ))));
            return;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        debug!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            room_id = %room_id,
            generation,
            "Creating room"
        );

        self.rooms.insert(
            room_id.clone(),
            RoomSlot::Pending {
                generation,
                waiters: vec![respond_to],
            },
        );

        let provider = Arc::clone(&self.provider);
        let registry = self.self_sender.clone();
        tokio::spawn(async move {
            let result = observe_call(
                ProviderOperation::DescribeCapabilities,
                provider.describe_capabilities(&room_id),
            )
            .await;
            // A closed registry has nobody left to answer.
            let _ = registry
                .send(RegistryMessage::RoomDescribed {
                    room_id,
                    generation,
                    result,
                })
                .await;
        });
    }

    /// Resolve a pending slot with the provider's answer.
    fn finish_creation(
        &mut self,
        room_id: String,
        generation: u64,
        result: Result<RtpCapabilities, ProviderError>,
    ) {
        let is_current = matches!(
            self.rooms.get(&room_id),
            Some(RoomSlot::Pending { generation: pending, .. }) if *pending == generation
        );
        if !is_current {
            debug!(
                target: "rc.actor.registry",
                registry_id = %self.registry_id,
                room_id = %room_id,
                generation,
                "Ignoring stale room description"
            );
            return;
        }
        let Some(RoomSlot::Pending { waiters, .. }) = self.rooms.remove(&room_id) else {
            return;
        };

        let capabilities = match result {
            Ok(capabilities) => capabilities,
            Err(e) => {
                warn!(
                    target: "rc.actor.registry",
                    registry_id = %self.registry_id,
                    room_id = %room_id,
                    error = %e,
                    waiters = waiters.len(),
                    "Room creation failed"
                );
                prom::record_room_lifecycle("creation_failed");
                let error = RcError::from(e);
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                return;
            }
        };

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            generation,
            capabilities,
            self.settings.room,
            Arc::clone(&self.provider),
            self.self_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        for waiter in waiters {
            let _ = waiter.send(Ok(handle.clone()));
        }

        self.rooms.insert(
            room_id.clone(),
            RoomSlot::Active(ManagedRoom {
                handle,
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
                generation,
            }),
        );
        self.metrics.room_created();
        prom::record_room_lifecycle("created");

        info!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            room_id = %room_id,
            generation,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );
    }

    /// Drop a room that announced its retirement.
    ///
    /// Waiting for the task happens in the background so the message loop
    /// keeps serving other rooms.
    fn remove_retired_room(&mut self, room_id: &str, generation: u64) {
        let is_current = matches!(
            self.rooms.get(room_id),
            Some(RoomSlot::Active(managed)) if managed.generation == generation
        );
        if !is_current {
            debug!(
                target: "rc.actor.registry",
                registry_id = %self.registry_id,
                room_id = %room_id,
                generation,
                "Ignoring retirement of previous room incarnation"
            );
            return;
        }
        let Some(RoomSlot::Active(managed)) = self.rooms.remove(room_id) else {
            return;
        };

        managed.handle.cancel();

        let room_id_owned = room_id.to_string();
        let registry_id = self.registry_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_REMOVAL_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.registry",
                        registry_id = %registry_id,
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.registry",
                        registry_id = %registry_id,
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.registry",
                        registry_id = %registry_id,
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        self.metrics.room_removed();
        prom::record_room_lifecycle("retired");

        info!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            room_id = %room_id,
            generation,
            total_rooms = self.rooms.len(),
            "Room removed"
        );
    }

    fn get_status(&self) -> RegistryStatus {
        let pending_rooms = self
            .rooms
            .values()
            .filter(|slot| matches!(slot, RoomSlot::Pending { .. }))
            .count();

        RegistryStatus {
            room_count: self.rooms.len() - pending_rooms,
            pending_rooms,
            peer_count: self.metrics.peer_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.receiver.len(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), RcError> {
        info!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            room_count = self.rooms.len(),
            deadline_ms = deadline.as_millis(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;

        // Propagates to every room through child tokens
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        let mut active = Vec::new();
        for (room_id, slot) in self.rooms.drain() {
            match slot {
                RoomSlot::Pending { waiters, .. } => {
                    for waiter in waiters {
                        let _ = waiter.send(Err(RcError::Draining));
                    }
                }
                RoomSlot::Active(managed) => {
                    managed.handle.cancel();
                    active.push((room_id, managed));
                }
            }
        }

        for (room_id, managed) in active {
            match tokio::time::timeout(self.shutdown_deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.registry",
                        registry_id = %self.registry_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.registry",
                        registry_id = %self.registry_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.registry",
                        registry_id = %self.registry_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "rc.actor.registry",
            registry_id = %self.registry_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop rooms whose task ended without being removed.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter_map(|(room_id, slot)| match slot {
                RoomSlot::Active(managed) if managed.task_handle.is_finished() => {
                    Some(room_id.clone())
                }
                _ => None,
            })
            .collect();

        for room_id in finished {
            let Some(RoomSlot::Active(managed)) = self.rooms.remove(&room_id) else {
                continue;
            };
            warn!(
                target: "rc.actor.registry",
                registry_id = %self.registry_id,
                room_id = %room_id,
                "Room actor task finished unexpectedly"
            );

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "rc.actor.registry",
                        registry_id = %self.registry_id,
                        room_id = %room_id,
                        "Room actor exited cleanly"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "rc.actor.registry",
                            registry_id = %self.registry_id,
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::provider::InMemoryProvider;

    fn registry_with(
        provider: &Arc<InMemoryProvider>,
        settings: RegistrySettings,
    ) -> (RoomRegistryHandle, Arc<ActorMetrics>) {
        let metrics = ActorMetrics::new();
        let handle = RoomRegistryHandle::new(
            "rc-test".to_string(),
            Arc::clone(provider) as Arc<dyn CapabilityProvider>,
            settings,
            Arc::clone(&metrics),
        );
        (handle, metrics)
    }

    #[tokio::test]
    async fn test_registry_get_or_create_room() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, metrics) = registry_with(&provider, RegistrySettings::default());

        let room = handle
            .get_or_create_room("room-123".to_string())
            .await
            .unwrap();
        assert_eq!(room.room_id(), "room-123");
        assert_eq!(room.capabilities(), &RtpCapabilities::default_room_codecs());
        assert_eq!(metrics.room_count(), 1);

        let again = handle
            .get_or_create_room("room-123".to_string())
            .await
            .unwrap();
        assert_eq!(again.generation(), room.generation());
        assert_eq!(
            provider
                .call_count(ProviderOperation::DescribeCapabilities)
                .await,
            1
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_concurrent_creation_shares_describe() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.hold(ProviderOperation::DescribeCapabilities).await;
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());

        let first = tokio::spawn({
            let handle = handle.clone();
            async move { handle.get_or_create_room("shared".to_string()).await }
        });
        let second = tokio::spawn({
            let handle = handle.clone();
            async move { handle.get_or_create_room("shared".to_string()).await }
        });

        while provider
            .call_count(ProviderOperation::DescribeCapabilities)
            .await
            == 0
        {
            tokio::task::yield_now().await;
        }
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.pending_rooms, 1);
        assert_eq!(status.room_count, 0);

        provider.release(ProviderOperation::DescribeCapabilities).await;

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.generation(), second.generation());
        assert_eq!(
            provider
                .call_count(ProviderOperation::DescribeCapabilities)
                .await,
            1
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_describe_failure_reaches_caller() {
        let provider = Arc::new(InMemoryProvider::new());
        provider
            .fail_next(ProviderOperation::DescribeCapabilities, 1)
            .await;
        let (handle, metrics) = registry_with(&provider, RegistrySettings::default());

        let result = handle.get_or_create_room("doomed".to_string()).await;
        assert!(matches!(result, Err(RcError::ProviderFailure(_))));
        assert_eq!(metrics.room_count(), 0);

        // The id is free again; the next attempt succeeds
        let room = handle.get_or_create_room("doomed".to_string()).await;
        assert!(room.is_ok());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_create_room_generates_id() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());

        let room = handle.create_room().await.unwrap();
        assert_eq!(room.room_id().len(), ROOM_ID_LENGTH);
        assert!(room
            .room_id()
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_room_limit() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(
            &provider,
            RegistrySettings {
                max_rooms: 1,
                ..RegistrySettings::default()
            },
        );

        handle.get_or_create_room("one".to_string()).await.unwrap();
        let result = handle.get_or_create_room("two".to_string()).await;
        assert!(matches!(result, Err(RcError::CapacityExceeded(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_get_nonexistent_room() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());

        let result = handle.get_room("nonexistent".to_string()).await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_join_and_get_room() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let (room, joined) = handle
            .join_room("lobby".to_string(), "peer-a".to_string(), tx)
            .await
            .unwrap();
        assert_eq!(joined.room_id, "lobby");
        assert_eq!(room.room_id(), "lobby");

        let info = handle.get_room("lobby".to_string()).await.unwrap();
        assert_eq!(info.peer_count, 1);
        assert_eq!(info.generation, room.generation());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_remove_room_if_empty() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, metrics) = registry_with(&provider, RegistrySettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let (room, _) = handle
            .join_room("lobby".to_string(), "peer-a".to_string(), tx)
            .await
            .unwrap();

        assert!(!handle
            .remove_room_if_empty("lobby".to_string())
            .await
            .unwrap());

        room.disconnect("peer-a".to_string()).await;
        assert!(handle
            .remove_room_if_empty("lobby".to_string())
            .await
            .unwrap());

        // The retirement notice is processed before any later request
        let result = handle.get_room("lobby".to_string()).await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));
        assert_eq!(metrics.room_count(), 0);

        assert!(!handle
            .remove_room_if_empty("never-existed".to_string())
            .await
            .unwrap());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_join_after_retirement_gets_new_generation() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());

        let first = handle
            .get_or_create_room("lobby".to_string())
            .await
            .unwrap();
        assert!(first.try_retire().await.unwrap());

        let (tx, _rx) = mpsc::unbounded_channel();
        let (second, _) = handle
            .join_room("lobby".to_string(), "peer-a".to_string(), tx)
            .await
            .unwrap();
        assert!(second.generation() > first.generation());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_status() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());

        handle.get_or_create_room("a".to_string()).await.unwrap();
        handle.get_or_create_room("b".to_string()).await.unwrap();

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.room_count, 2);
        assert_eq!(status.pending_rooms, 0);
        assert!(!status.is_draining);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_shutdown() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());
        let room = handle.get_or_create_room("a".to_string()).await.unwrap();

        let result = handle.shutdown(Duration::from_secs(5)).await;
        assert!(result.is_ok());
        assert!(handle.is_cancelled());

        // Room tokens are children of the registry token
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(room.is_cancelled());
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_rooms_drain() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, metrics) = registry_with(&provider, RegistrySettings::default());
        handle.get_or_create_room("a".to_string()).await.unwrap();
        handle.get_or_create_room("b".to_string()).await.unwrap();

        let waiter = handle.clone();
        let stopped = tokio::spawn(async move { waiter.stopped().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!stopped.is_finished());

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), stopped)
            .await
            .expect("registry did not stop")
            .unwrap();
        assert_eq!(metrics.room_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_cancellation_token() {
        let provider = Arc::new(InMemoryProvider::new());
        let (handle, _metrics) = registry_with(&provider, RegistrySettings::default());

        let child = handle.child_token();
        assert!(!child.is_cancelled());

        handle.cancel();
        assert!(child.is_cancelled());
    }
}
