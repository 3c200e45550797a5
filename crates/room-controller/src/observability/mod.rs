//! Observability module for the Room Controller.
//!
//! # Privacy by Default
//!
//! Actor run loops use `#[instrument(skip_all)]` with explicit fields. Client
//! supplied payloads (SDP-derived parameters, capabilities) are never logged,
//! and metric labels never carry room or peer ids.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_rooms_active` | Gauge | none | Rooms with a running actor |
//! | `rc_peers_active` | Gauge | none | Peers joined to a room |
//! | `rc_signaling_requests_total` | Counter | `message_type`, `outcome` | Request results |
//! | `rc_message_latency_seconds` | Histogram | `message_type` | Request processing latency |
//! | `rc_provider_call_duration_seconds` | Histogram | `operation` | Media engine latency |
//! | `rc_fanout_events_total` | Counter | `event` | Push events delivered |
//! | `rc_cascade_closes_total` | Counter | none | Consumers closed by producer teardown |
//! | `rc_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::{health_router, HealthState, ReadinessReport};
pub use metrics::init_metrics_recorder;
