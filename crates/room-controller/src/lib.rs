//! Room Controller Library
//!
//! Signaling orchestrator for an SFU. Clients connect over WebSocket, join
//! rooms, create WebRTC transports, publish tracks and subscribe to other
//! peers' tracks. Media never passes through this process; every
//! media-plane action is delegated to a [`provider::CapabilityProvider`].
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── RoomActor (one per room)
//!     └── PeerSession (one per member, owned by the room)
//!
//! PeerActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Actor per room**: concurrent requests to one room are serialized by its mailbox
//! - **Commit sequence**: existing-producer listings and `new-producer` pushes never overlap
//! - **Grace period**: an empty room lingers briefly before it retires
//! - **Cascade teardown**: a leaving peer closes its consumers everywhere
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and peer actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with signaling error codes
//! - [`media`] - Codec capabilities and engine handle types
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`provider`] - Media engine seam and the in-memory engine
//! - [`session`] - Per-peer publish/subscribe state machine
//! - [`signaling`] - WebSocket wire protocol

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod provider;
pub mod session;
pub mod signaling;
