//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.
//! Room-to-peer pushes use unbounded per-peer channels so the room actor never
//! waits on a slow connection.

use super::room::RoomActorHandle;
use crate::errors::RcError;
use crate::media::{ConsumerOptions, MediaKind, RtpCapabilities, TransportDirection};
use crate::provider::ProviderError;
use crate::session::PeerState;
use crate::signaling::protocol::ClientRequest;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the room for `room_id`, creating it if unseen.
    GetOrCreateRoom {
        room_id: String,
        /// Response channel for the room handle or error.
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Create a room under a fresh random id.
    CreateRoom {
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Result of a room creation task's `describe_capabilities` call.
    RoomDescribed {
        room_id: String,
        generation: u64,
        result: Result<RtpCapabilities, ProviderError>,
    },

    /// Return the handle of an existing room without creating it.
    LookupRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Sent by a room actor once it has retired itself.
    RoomRetired { room_id: String, generation: u64 },

    /// Get registry status (for health checks).
    GetStatus {
        /// Response channel for registry status.
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Initiate graceful shutdown (SIGTERM received).
    Shutdown {
        /// Deadline for shutdown.
        deadline: Duration,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
}

/// Messages sent to `RoomActor`.
///
/// Provider-backed operations come in `Prepare*`/`Commit*` pairs. The peer
/// actor calls the media engine between the two, outside the room loop.
#[derive(Debug)]
pub enum RoomMessage {
    /// A peer joins the room.
    Join {
        peer_id: String,
        /// Channel the room pushes events for this peer into.
        events: mpsc::UnboundedSender<PushEvent>,
        respond_to: oneshot::Sender<Result<JoinResult, RcError>>,
    },

    /// The peer's connection closed. Fire-and-forget, idempotent.
    Disconnect { peer_id: String },

    PrepareCreateTransport {
        peer_id: String,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    CommitCreateTransport {
        peer_id: String,
        direction: TransportDirection,
        transport_id: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    PrepareConnectTransport {
        peer_id: String,
        direction: TransportDirection,
        /// Response channel for the transport id to connect.
        respond_to: oneshot::Sender<Result<String, RcError>>,
    },

    CommitConnectTransport {
        peer_id: String,
        direction: TransportDirection,
        transport_id: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    PrepareProduce {
        peer_id: String,
        kind: MediaKind,
        /// Response channel for the send transport id.
        respond_to: oneshot::Sender<Result<String, RcError>>,
    },

    CommitProduce {
        peer_id: String,
        kind: MediaKind,
        producer_id: String,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    PrepareConsume {
        peer_id: String,
        producer_id: String,
        capabilities: RtpCapabilities,
        respond_to: oneshot::Sender<Result<ConsumeTicket, RcError>>,
    },

    CommitConsume {
        peer_id: String,
        consumer: ConsumerOptions,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Producers of other peers committed before the caller joined.
    GetExistingProducers {
        peer_id: String,
        respond_to: oneshot::Sender<Result<Vec<String>, RcError>>,
    },

    /// Retire the room if it has no peers. Responds `true` if the room is
    /// (now or already) retired.
    TryRetire { respond_to: oneshot::Sender<bool> },

    /// Get current room state (for debugging/health).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Messages sent to `PeerActor`.
#[derive(Debug)]
pub enum PeerMessage {
    /// A decoded signaling request from the client.
    Request { request: ClientRequest },

    /// A frame that failed to decode. Answered in order with the requests
    /// around it.
    Malformed { id: u64, error: RcError },
}

/// Server-initiated notification pushed to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PushEvent {
    /// Another peer started publishing. Sent once per producer per peer.
    NewProducer { producer_id: String },

    /// A consumer of this peer was closed because its producer went away.
    ConsumerClosed {
        consumer_id: String,
        producer_id: String,
    },
}

impl PushEvent {
    /// Returns the event name for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PushEvent::NewProducer { .. } => "new-producer",
            PushEvent::ConsumerClosed { .. } => "consumer-closed",
        }
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResult {
    pub room_id: String,
    pub peer_id: String,
    /// Room routing capabilities the client must load before creating transports.
    pub capabilities: RtpCapabilities,
}

/// What a validated consume request needs for the provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeTicket {
    /// The caller's receive transport.
    pub transport_id: String,
    pub kind: MediaKind,
}

/// Room information returned by the registry.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: String,
    pub peer_count: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
    pub created_at: i64,
    pub generation: u64,
}

/// Registry status.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Rooms with a running actor.
    pub room_count: usize,
    /// Rooms waiting on `describe_capabilities`.
    pub pending_rooms: usize,
    pub peer_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Room state snapshot.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: String,
    pub generation: u64,
    pub peers: Vec<PeerInfo>,
    pub producer_count: usize,
    pub consumer_count: usize,
    /// Commit sequence of the most recent producer.
    pub commit_seq: u64,
    pub is_retired: bool,
    pub created_at: i64,
}

/// Peer information within a room snapshot.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: String,
    pub state: PeerState,
    pub producer_ids: Vec<String>,
    pub consumer_ids: Vec<String>,
}
