//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller (RC).
//!
//! ## Modules
//!
//! - `fixtures` - Capability sets, DTLS/RTP blobs and registry settings
//! - `harness` - In-process controller and signaling clients
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//! use room_controller::media::MediaKind;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let controller = TestRoomController::builder()
//!         .with_settings(TestSettings::new().with_max_peers(2).build())
//!         .build();
//!
//!     let mut alice = controller.connect("alice");
//!     let mut bob = controller.connect("bob");
//!     alice.join("lobby").await;
//!     bob.join("lobby").await;
//!
//!     let producer_id = alice.publish(MediaKind::Video).await;
//!     bob.subscribe(&producer_id).await;
//! }
//! ```
//!
//! ## Fault Injection
//!
//! The controller keeps the `InMemoryProvider` so tests can make engine calls
//! fail or stall:
//!
//! ```rust,ignore
//! controller.provider.fail_next(ProviderOperation::Consume, 1).await;
//! let error = bob.request_err(PeerHarness::consume_body(&producer_id)).await;
//! assert_eq!(error.code, "PROVIDER_FAILURE");
//! ```

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
