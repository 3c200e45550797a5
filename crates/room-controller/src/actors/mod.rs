//! Actor hierarchy of the room controller.
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         ├── owns PeerSessions, producer and consumer registries
//!         └── pushes events into each member's PeerActor
//!
//! PeerActor (one per signaling connection)
//! └── holds a RoomActorHandle once joined
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per room**: all state of a room is mutated by its actor only
//! - **Provider calls outside actor loops**: rooms validate and commit, peers call the engine
//! - **CancellationToken propagation**: the registry hands child tokens to rooms
//! - **Mailbox monitoring**: sampled receiver backlog against thresholds (Room: 100/500, Peer: 16/48)
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` that creates, finds and removes rooms
//! - [`room`] - `RoomActor` per room, owns all room state
//! - [`peer`] - `PeerActor` per signaling connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod peer;
pub mod registry;
pub mod room;

// Re-export primary types
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use peer::{PeerActor, PeerActorHandle};
pub use registry::{RegistrySettings, RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle, RoomSettings};
