//! Media-plane value types exchanged with the capability provider.
//!
//! The orchestrator treats ICE, DTLS and RTP parameters as opaque JSON. The
//! only media detail it inspects is the codec list, to decide whether a
//! consumer can receive a producer before asking the engine to try.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// DTLS parameters supplied by the client when connecting a transport.
pub type DtlsParameters = Value;

/// RTP parameters of a producer or consumer.
pub type RtpParameters = Value;

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a WebRTC transport as seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// Client sends media (publishing).
    Send,
    /// Client receives media (subscribing).
    Recv,
}

impl TransportDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One codec entry of an RTP capability set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

impl RtpCodecCapability {
    /// Video codec entry.
    #[must_use]
    pub fn video(mime_type: &str, clock_rate: u32) -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: mime_type.to_string(),
            clock_rate,
            channels: None,
            preferred_payload_type: None,
            parameters: Value::Null,
        }
    }

    /// Audio codec entry.
    #[must_use]
    pub fn audio(mime_type: &str, clock_rate: u32, channels: u8) -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: mime_type.to_string(),
            clock_rate,
            channels: Some(channels),
            preferred_payload_type: None,
            parameters: Value::Null,
        }
    }

    /// Whether two entries describe the same codec.
    ///
    /// Mime types compare case-insensitively. A missing channel count on an
    /// audio codec means mono.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if self.kind != other.kind
            || self.clock_rate != other.clock_rate
            || !self.mime_type.eq_ignore_ascii_case(&other.mime_type)
        {
            return false;
        }
        match self.kind {
            MediaKind::Audio => self.channels.unwrap_or(1) == other.channels.unwrap_or(1),
            MediaKind::Video => true,
        }
    }
}

/// RTP capability set of a room or of a receiving client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_extensions: Vec<Value>,
}

impl RtpCapabilities {
    /// Codec set routed by new rooms: VP8 video and stereo opus audio.
    #[must_use]
    pub fn default_room_codecs() -> Self {
        Self {
            codecs: vec![
                RtpCodecCapability::video("video/VP8", 90000),
                RtpCodecCapability::audio("audio/opus", 48000, 2),
            ],
            header_extensions: Vec::new(),
        }
    }

    /// Whether the set contains any codec of `kind`.
    #[must_use]
    pub fn supports_kind(&self, kind: MediaKind) -> bool {
        self.codecs.iter().any(|codec| codec.kind == kind)
    }

    /// Whether a client advertising `self` can receive a `kind` track routed
    /// by a room whose capabilities are `room`.
    #[must_use]
    pub fn can_consume(&self, room: &RtpCapabilities, kind: MediaKind) -> bool {
        room.codecs
            .iter()
            .filter(|room_codec| room_codec.kind == kind)
            .any(|room_codec| self.codecs.iter().any(|codec| codec.matches(room_codec)))
    }
}

/// Transport parameters returned to the client after the engine created a
/// transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Consumer parameters returned to the client after a successful consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Engine-side resource that must be closed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaHandle {
    Transport(String),
    Producer(String),
    Consumer(String),
}

impl MediaHandle {
    /// Engine identifier of the resource.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            MediaHandle::Transport(id) | MediaHandle::Producer(id) | MediaHandle::Consumer(id) => {
                id
            }
        }
    }

    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            MediaHandle::Transport(_) => "transport",
            MediaHandle::Producer(_) => "producer",
            MediaHandle::Consumer(_) => "consumer",
        }
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_str(), self.id())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codec_match_ignores_mime_case() {
        let room = RtpCodecCapability::video("video/VP8", 90000);
        let client = RtpCodecCapability::video("video/vp8", 90000);
        assert!(client.matches(&room));
    }

    #[test]
    fn test_codec_match_requires_clock_rate() {
        let room = RtpCodecCapability::video("video/VP8", 90000);
        let client = RtpCodecCapability::video("video/VP8", 48000);
        assert!(!client.matches(&room));
    }

    #[test]
    fn test_audio_channels_default_to_mono() {
        let stereo = RtpCodecCapability::audio("audio/opus", 48000, 2);
        let mut unspecified = RtpCodecCapability::audio("audio/opus", 48000, 1);
        unspecified.channels = None;

        assert!(!unspecified.matches(&stereo));
        assert!(unspecified.matches(&RtpCodecCapability::audio("audio/opus", 48000, 1)));
    }

    #[test]
    fn test_can_consume() {
        let room = RtpCapabilities::default_room_codecs();

        let vp8_only = RtpCapabilities {
            codecs: vec![RtpCodecCapability::video("video/VP8", 90000)],
            header_extensions: Vec::new(),
        };
        assert!(vp8_only.can_consume(&room, MediaKind::Video));
        assert!(!vp8_only.can_consume(&room, MediaKind::Audio));

        let h264_only = RtpCapabilities {
            codecs: vec![RtpCodecCapability::video("video/H264", 90000)],
            header_extensions: Vec::new(),
        };
        assert!(!h264_only.can_consume(&room, MediaKind::Video));
        assert!(!RtpCapabilities::default().can_consume(&room, MediaKind::Video));
    }

    #[test]
    fn test_supports_kind() {
        let caps = RtpCapabilities::default_room_codecs();
        assert!(caps.supports_kind(MediaKind::Video));
        assert!(caps.supports_kind(MediaKind::Audio));
        assert!(!RtpCapabilities::default().supports_kind(MediaKind::Video));
    }

    #[test]
    fn test_capabilities_wire_shape() {
        let value = serde_json::to_value(RtpCapabilities::default_room_codecs()).unwrap();
        assert_eq!(
            value,
            json!({
                "codecs": [
                    { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 },
                    { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 }
                ]
            })
        );
    }

    #[test]
    fn test_client_capabilities_accept_unknown_fields() {
        let caps: RtpCapabilities = serde_json::from_value(json!({
            "codecs": [{
                "kind": "video",
                "mimeType": "video/VP8",
                "clockRate": 90000,
                "rtcpFeedback": [{ "type": "nack" }],
                "parameters": { "x-google-start-bitrate": 1000 }
            }],
            "headerExtensions": [{ "uri": "urn:ietf:params:rtp-hdrext:sdes:mid" }]
        }))
        .unwrap();

        assert_eq!(caps.codecs.len(), 1);
        assert_eq!(caps.header_extensions.len(), 1);
        assert!(caps.can_consume(&RtpCapabilities::default_room_codecs(), MediaKind::Video));
    }

    #[test]
    fn test_media_handle_display() {
        assert_eq!(
            MediaHandle::Producer("p-1".to_string()).to_string(),
            "producer:p-1"
        );
        assert_eq!(MediaHandle::Transport("t-1".to_string()).id(), "t-1");
    }
}
