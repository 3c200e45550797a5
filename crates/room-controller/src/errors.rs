//! Room Controller error types.
//!
//! Error types map to the signaling error codes returned in response frames.
//! Internal details are logged server-side but not exposed to clients.

use crate::provider::ProviderError;
use thiserror::Error;

/// Room Controller error type.
///
/// Maps to signaling error codes:
/// - `PreconditionViolation`: `PRECONDITION_VIOLATION`
/// - `StaleReference`, `RoomNotFound`, `RoomClosed`: `STALE_REFERENCE`
/// - `IncompatibleCapabilities`: `INCOMPATIBLE_CAPABILITIES`
/// - `ProviderFailure`: `PROVIDER_FAILURE`
/// - `BadRequest`: `BAD_REQUEST`
/// - `CapacityExceeded`: `CAPACITY_EXCEEDED`
/// - `Draining`: `UNAVAILABLE`
/// - `Internal`: `INTERNAL_ERROR`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RcError {
    /// Operation issued before the session reached the required state
    /// (e.g. connecting a transport that was never created).
    #[error("Precondition violation: {0}")]
    PreconditionViolation(String),

    /// Referenced peer, producer or transport no longer exists.
    #[error("Stale reference: {0}")]
    StaleReference(String),

    /// Consumer capabilities cannot receive the producer's codec.
    #[error("Incompatible capabilities: {0}")]
    IncompatibleCapabilities(String),

    /// Media engine call failed.
    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    /// Malformed signaling frame.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Room or peer limit reached.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// No room registered under the id.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room actor retired or stopped before the request reached it.
    #[error("Room is closed")]
    RoomClosed,

    /// Controller is shutting down and rejects new work.
    #[error("Room controller is draining")]
    Draining,

    /// Actor channel failure or other internal fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the signaling error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            RcError::PreconditionViolation(_) => "PRECONDITION_VIOLATION",
            RcError::StaleReference(_) | RcError::RoomNotFound(_) | RcError::RoomClosed => {
                "STALE_REFERENCE"
            }
            RcError::IncompatibleCapabilities(_) => "INCOMPATIBLE_CAPABILITIES",
            RcError::ProviderFailure(_) => "PROVIDER_FAILURE",
            RcError::BadRequest(_) => "BAD_REQUEST",
            RcError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            RcError::Draining => "UNAVAILABLE",
            RcError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::PreconditionViolation(msg)
            | RcError::StaleReference(msg)
            | RcError::IncompatibleCapabilities(msg)
            | RcError::BadRequest(msg)
            | RcError::CapacityExceeded(msg) => msg.clone(),
            RcError::ProviderFailure(_) => "Media engine request failed".to_string(),
            RcError::RoomNotFound(_) => "Room not found".to_string(),
            RcError::RoomClosed => "Room is closed, please rejoin".to_string(),
            RcError::Draining => "Server is shutting down, please reconnect".to_string(),
            RcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Bounded label for the `outcome` dimension of request metrics.
    #[must_use]
    pub const fn outcome_label(&self) -> &'static str {
        match self {
            RcError::PreconditionViolation(_) => "precondition_violation",
            RcError::StaleReference(_) | RcError::RoomNotFound(_) | RcError::RoomClosed => {
                "stale_reference"
            }
            RcError::IncompatibleCapabilities(_) => "incompatible_capabilities",
            RcError::ProviderFailure(_) => "provider_failure",
            RcError::BadRequest(_) => "bad_request",
            RcError::CapacityExceeded(_) => "capacity_exceeded",
            RcError::Draining => "draining",
            RcError::Internal(_) => "internal_error",
        }
    }
}

impl From<ProviderError> for RcError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::IncompatibleCapabilities(msg) => RcError::IncompatibleCapabilities(msg),
            ProviderError::UnknownHandle(handle) => {
                RcError::StaleReference(format!("media handle no longer exists: {handle}"))
            }
            ProviderError::Failure(msg) => RcError::ProviderFailure(msg),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            RcError::PreconditionViolation("no transport".to_string()).error_code(),
            "PRECONDITION_VIOLATION"
        );

        // Everything that points at something gone maps to the same code
        assert_eq!(
            RcError::StaleReference("producer".to_string()).error_code(),
            "STALE_REFERENCE"
        );
        assert_eq!(
            RcError::RoomNotFound("abc123".to_string()).error_code(),
            "STALE_REFERENCE"
        );
        assert_eq!(RcError::RoomClosed.error_code(), "STALE_REFERENCE");

        assert_eq!(
            RcError::IncompatibleCapabilities("vp9".to_string()).error_code(),
            "INCOMPATIBLE_CAPABILITIES"
        );
        assert_eq!(
            RcError::ProviderFailure("worker died".to_string()).error_code(),
            "PROVIDER_FAILURE"
        );
        assert_eq!(
            RcError::BadRequest("bad json".to_string()).error_code(),
            "BAD_REQUEST"
        );
        assert_eq!(
            RcError::CapacityExceeded("max 50".to_string()).error_code(),
            "CAPACITY_EXCEEDED"
        );
        assert_eq!(RcError::Draining.error_code(), "UNAVAILABLE");
        assert_eq!(
            RcError::Internal("channel closed".to_string()).error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = RcError::Internal("channel send failed: receiver dropped".to_string());
        assert!(!internal.client_message().contains("receiver"));
        assert_eq!(internal.client_message(), "An internal error occurred");

        let provider = RcError::ProviderFailure("worker pid 4242 exited".to_string());
        assert!(!provider.client_message().contains("4242"));

        let room = RcError::RoomNotFound("secret-room".to_string());
        assert!(!room.client_message().contains("secret-room"));
    }

    #[test]
    fn test_client_messages_pass_through_protocol_errors() {
        let err = RcError::PreconditionViolation("send transport not created".to_string());
        assert_eq!(err.client_message(), "send transport not created");
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: RcError = ProviderError::IncompatibleCapabilities("no vp8".to_string()).into();
        assert!(matches!(err, RcError::IncompatibleCapabilities(_)));

        let err: RcError = ProviderError::UnknownHandle("tr-1".to_string()).into();
        assert!(matches!(err, RcError::StaleReference(_)));

        let err: RcError = ProviderError::Failure("boom".to_string()).into();
        assert_eq!(err, RcError::ProviderFailure("boom".to_string()));
    }

    #[test]
    fn test_outcome_labels_are_bounded() {
        assert_eq!(RcError::RoomClosed.outcome_label(), "stale_reference");
        assert_eq!(
            RcError::StaleReference(String::new()).outcome_label(),
            "stale_reference"
        );
        assert_eq!(RcError::Draining.outcome_label(), "draining");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RcError::StaleReference("producer p1".to_string())),
            "Stale reference: producer p1"
        );
        assert_eq!(format!("{}", RcError::RoomClosed), "Room is closed");
    }
}
