//! Client-facing signaling over WebSocket.
//!
//! - [`protocol`] - JSON frame types
//! - [`ws`] - axum upgrade handler bridging a socket to a `PeerActor`

pub mod protocol;
pub mod ws;

pub use protocol::{ClientRequest, ClientRequestBody, ResponseData, ServerMessage};
pub use ws::{signaling_router, SignalingState};
