//! Actor metrics and mailbox monitoring.
//!
//! Provides mailbox depth monitoring with configurable thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Registry   | < 100  | 100-500 | > 500    |
//! | Room       | < 100  | 100-500 | > 500    |
//! | Peer       | < 16   | 16-48   | > 48     |
//!
//! Peer mailboxes are small because each connection processes its requests
//! sequentially and the client waits for every response.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for room and registry actors.
const ROOM_MAILBOX_NORMAL: usize = 100;
const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for peer actors.
const PEER_MAILBOX_NORMAL: usize = 16;
const PEER_MAILBOX_WARNING: usize = 48;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// RoomRegistryActor (singleton).
    Registry,
    /// RoomActor (one per room).
    Room,
    /// PeerActor (one per signaling connection).
    Peer,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
            ActorType::Peer => "peer",
        }
    }

    const fn thresholds(&self) -> (usize, usize) {
        match self {
            ActorType::Registry | ActorType::Room => (ROOM_MAILBOX_NORMAL, ROOM_MAILBOX_WARNING),
            ActorType::Peer => (PEER_MAILBOX_NORMAL, PEER_MAILBOX_WARNING),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks the backlog of an actor's receiver.
///
/// The run loop samples `receiver.len()` after every message; the sampled
/// value drives the depth gauge, the peak and the threshold logs.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Actor identifier (room_id, peer_id, etc.).
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Count one handled message and sample the messages still queued.
    pub fn record_processed(&self, queued: usize) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.observe_backlog(queued);
    }

    /// Sample the receiver's backlog.
    pub fn observe_backlog(&self, queued: usize) {
        let previous = self.depth.swap(queued, Ordering::Relaxed);
        self.peak_depth.fetch_max(queued, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), queued);

        let level = self.level_for_depth(queued);
        if level == self.level_for_depth(previous) {
            return;
        }
        match level {
            MailboxLevel::Critical => warn!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = queued,
                threshold = self.actor_type.thresholds().1,
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning => debug!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = queued,
                "Mailbox depth elevated"
            ),
            MailboxLevel::Normal => debug!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = queued,
                "Mailbox depth back to normal"
            ),
        }
    }

    /// Backlog at the last sample.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Largest backlog sampled so far.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        let (normal, warning) = self.actor_type.thresholds();
        if depth > warning {
            MailboxLevel::Critical
        } else if depth > normal {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the actor system.
///
/// Counters are kept as atomics for status queries and mirrored to the
/// Prometheus gauges on every change.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Rooms with a running actor.
    pub active_rooms: AtomicUsize,
    /// Peers currently joined to a room.
    pub active_peers: AtomicUsize,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let count = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_rooms_active(count);
    }

    pub fn room_removed(&self) {
        let previous = self
            .active_rooms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        prom::set_rooms_active(previous.saturating_sub(1));
    }

    pub fn peer_joined(&self) {
        let count = self.active_peers.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_peers_active(count);
    }

    pub fn peer_left(&self) {
        let previous = self
            .active_peers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        prom::set_peers_active(previous.saturating_sub(1));
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "rc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.active_peers.load(Ordering::Relaxed)
    }
}
