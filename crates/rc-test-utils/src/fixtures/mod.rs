//! Pre-configured test data for Room Controller tests.
//!
//! Provides:
//! - Client capability sets (compatible and incompatible with the default room)
//! - Opaque DTLS and RTP parameter blobs
//! - Registry settings with short grace periods

use room_controller::actors::{RegistrySettings, RoomSettings};
use room_controller::media::{MediaKind, RtpCapabilities, RtpCodecCapability};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// Random room id for tests that must not collide.
#[must_use]
pub fn random_room_id() -> String {
    format!("room-{}", Uuid::new_v4().simple())
}

/// Client capabilities that can receive everything the default room routes.
#[must_use]
pub fn client_capabilities() -> RtpCapabilities {
    RtpCapabilities::default_room_codecs()
}

/// Client that decodes VP8 only (no audio).
#[must_use]
pub fn vp8_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![RtpCodecCapability::video("video/VP8", 90000)],
        header_extensions: Vec::new(),
    }
}

/// Client that decodes H264 only, incompatible with the default room.
#[must_use]
pub fn h264_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![RtpCodecCapability::video("video/H264", 90000)],
        header_extensions: Vec::new(),
    }
}

/// DTLS parameters as a browser would send them.
#[must_use]
pub fn dtls_parameters() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{
            "algorithm": "sha-256",
            "value": "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89"
        }]
    })
}

/// RTP parameters of a single-encoding track of `kind`.
#[must_use]
pub fn rtp_parameters(kind: MediaKind) -> Value {
    let codec = match kind {
        MediaKind::Video => json!({ "mimeType": "video/VP8", "clockRate": 90000, "payloadType": 96 }),
        MediaKind::Audio => {
            json!({ "mimeType": "audio/opus", "clockRate": 48000, "channels": 2, "payloadType": 111 })
        }
    };
    json!({
        "mid": kind.as_str(),
        "codecs": [codec],
        "encodings": [{ "ssrc": 11_111_111 }],
    })
}

/// Builder for registry settings used in tests.
#[derive(Debug, Clone)]
pub struct TestSettings {
    max_rooms: usize,
    grace_period: Duration,
    grace_check_interval: Duration,
    max_peers: usize,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSettings {
    /// Defaults with a 5 s grace period checked every 100 ms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_rooms: 100,
            grace_period: Duration::from_secs(5),
            grace_check_interval: Duration::from_millis(100),
            max_peers: 50,
        }
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn with_grace_check_interval(mut self, interval: Duration) -> Self {
        self.grace_check_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_rooms(mut self, max_rooms: usize) -> Self {
        self.max_rooms = max_rooms;
        self
    }

    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    #[must_use]
    pub fn build(self) -> RegistrySettings {
        RegistrySettings {
            max_rooms: self.max_rooms,
            room: RoomSettings {
                grace_period: self.grace_period,
                grace_check_interval: self.grace_check_interval,
                max_peers: self.max_peers,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = TestSettings::new()
            .with_grace_period(Duration::from_secs(1))
            .with_max_peers(3)
            .build();

        assert_eq!(settings.room.grace_period, Duration::from_secs(1));
        assert_eq!(settings.room.max_peers, 3);
        assert_eq!(settings.max_rooms, 100);
    }

    #[test]
    fn test_capability_fixtures() {
        let room = RtpCapabilities::default_room_codecs();

        assert!(client_capabilities().can_consume(&room, MediaKind::Audio));
        assert!(vp8_only_capabilities().can_consume(&room, MediaKind::Video));
        assert!(!vp8_only_capabilities().can_consume(&room, MediaKind::Audio));
        assert!(!h264_only_capabilities().can_consume(&room, MediaKind::Video));
    }

    #[test]
    fn test_random_room_ids_differ() {
        assert_ne!(random_room_id(), random_room_id());
    }
}
