//! Signaling wire format.
//!
//! Client frames are JSON objects carrying a numeric `id` and a kebab-case
//! `type`, with the payload fields inline:
//!
//! ```json
//! {"id": 7, "type": "consume", "producerId": "...", "rtpCapabilities": {...}}
//! ```
//!
//! Every request is answered with exactly one `response` frame echoing the
//! id. Room pushes arrive as `event` frames.

use crate::actors::PushEvent;
use crate::errors::RcError;
use crate::media::{
    ConsumerOptions, DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, TransportOptions,
};
use serde::{Deserialize, Serialize};

/// Decoded client request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientRequest {
    pub id: u64,
    #[serde(flatten)]
    pub body: ClientRequestBody,
}

/// Request payload, selected by the `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientRequestBody {
    CreateRoom,
    JoinRoom {
        room_id: String,
    },
    CreateSendTransport,
    ConnectSendTransport {
        dtls_parameters: DtlsParameters,
    },
    Produce {
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    CreateRecvTransport,
    ConnectRecvTransport {
        dtls_parameters: DtlsParameters,
    },
    Consume {
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    },
    GetExistingProducers,
}

impl ClientRequestBody {
    /// Wire name of the request, used as the `message_type` metric label.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            ClientRequestBody::CreateRoom => "create-room",
            ClientRequestBody::JoinRoom { .. } => "join-room",
            ClientRequestBody::CreateSendTransport => "create-send-transport",
            ClientRequestBody::ConnectSendTransport { .. } => "connect-send-transport",
            ClientRequestBody::Produce { .. } => "produce",
            ClientRequestBody::CreateRecvTransport => "create-recv-transport",
            ClientRequestBody::ConnectRecvTransport { .. } => "connect-recv-transport",
            ClientRequestBody::Consume { .. } => "consume",
            ClientRequestBody::GetExistingProducers => "get-existing-producers",
        }
    }
}

/// Frame sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Response(Response),
    Event(PushEvent),
}

impl ServerMessage {
    /// Successful response to request `id`.
    #[must_use]
    pub fn ok(id: u64, data: ResponseData) -> Self {
        ServerMessage::Response(Response {
            id,
            ok: true,
            data: Some(data),
            error: None,
        })
    }

    /// Failed response to request `id`. Only the client-safe message of
    /// `error` goes on the wire.
    #[must_use]
    pub fn error(id: u64, error: &RcError) -> Self {
        ServerMessage::Response(Response {
            id,
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: error.error_code().to_string(),
                message: error.client_message(),
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Success payloads. Serialized without a tag; the client knows which
/// request it sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ResponseData {
    RoomCreated {
        room_id: String,
        rtp_capabilities: RtpCapabilities,
    },
    Joined {
        rtp_capabilities: RtpCapabilities,
    },
    Transport(TransportOptions),
    Consumed(ConsumerOptions),
    Produced {
        id: String,
    },
    ExistingProducers {
        producer_ids: Vec<String>,
    },
    Empty {},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Decode a text frame.
///
/// On failure returns the request id (when it can be recovered, else 0)
/// together with a `BadRequest` error to answer with.
pub fn parse_request(text: &str) -> Result<ClientRequest, (u64, RcError)> {
    serde_json::from_str::<ClientRequest>(text).map_err(|e| {
        let id = serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64))
            .unwrap_or(0);
        (id, RcError::BadRequest(format!("malformed request: {e}")))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_unit_request() {
        let request = parse_request(r#"{"id": 1, "type": "create-send-transport"}"#).unwrap();
        assert_eq!(request.id, 1);
        assert_eq!(request.body, ClientRequestBody::CreateSendTransport);
        assert_eq!(request.body.message_type(), "create-send-transport");
    }

    #[test]
    fn test_parse_camel_case_payload() {
        let request = parse_request(
            r#"{"id": 9, "type": "consume", "producerId": "p-1",
                "rtpCapabilities": {"codecs": [{"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}]}}"#,
        )
        .unwrap();

        match request.body {
            ClientRequestBody::Consume {
                producer_id,
                rtp_capabilities,
            } => {
                assert_eq!(producer_id, "p-1");
                assert_eq!(rtp_capabilities.codecs.len(), 1);
                assert!(rtp_capabilities.supports_kind(MediaKind::Video));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_parse_join_room() {
        let request = parse_request(r#"{"id": 2, "type": "join-room", "roomId": "lobby"}"#).unwrap();
        assert_eq!(
            request.body,
            ClientRequestBody::JoinRoom {
                room_id: "lobby".to_string()
            }
        );
    }

    #[test]
    fn test_parse_failure_keeps_id() {
        let (id, error) =
            parse_request(r#"{"id": 42, "type": "teleport"}"#).unwrap_err();
        assert_eq!(id, 42);
        assert_eq!(error.error_code(), "BAD_REQUEST");

        let (id, _) = parse_request(r#"{"id": 5, "type": "join-room"}"#).unwrap_err();
        assert_eq!(id, 5, "missing field still answers the request");
    }

    #[test]
    fn test_parse_failure_without_id() {
        let (id, error) = parse_request("not json").unwrap_err();
        assert_eq!(id, 0);
        assert!(matches!(error, RcError::BadRequest(_)));
    }

    #[test]
    fn test_ok_response_shape() {
        let message = ServerMessage::ok(
            3,
            ResponseData::Produced {
                id: "p-1".to_string(),
            },
        );
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "type": "response", "id": 3, "ok": true, "data": { "id": "p-1" } })
        );
    }

    #[test]
    fn test_empty_and_list_payloads() {
        let empty = ServerMessage::ok(4, ResponseData::Empty {});
        assert_eq!(
            serde_json::to_value(&empty).unwrap(),
            json!({ "type": "response", "id": 4, "ok": true, "data": {} })
        );

        let list = ServerMessage::ok(
            5,
            ResponseData::ExistingProducers {
                producer_ids: vec!["a".to_string(), "b".to_string()],
            },
        );
        assert_eq!(
            serde_json::to_value(&list).unwrap()["data"],
            json!({ "producerIds": ["a", "b"] })
        );
    }

    #[test]
    fn test_error_response_shape() {
        let message = ServerMessage::error(
            6,
            &RcError::StaleReference("producer does not exist".to_string()),
        );
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "response",
                "id": 6,
                "ok": false,
                "error": { "code": "STALE_REFERENCE", "message": "producer does not exist" }
            })
        );
    }

    #[test]
    fn test_error_response_hides_provider_details() {
        let message = ServerMessage::error(
            7,
            &RcError::ProviderFailure("worker 3 crashed at 0xdeadbeef".to_string()),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["error"]["code"], json!("PROVIDER_FAILURE"));
        assert!(!value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("0xdeadbeef"));
    }

    #[test]
    fn test_event_shape() {
        let message = ServerMessage::Event(PushEvent::NewProducer {
            producer_id: "p-9".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "type": "event", "event": "new-producer", "producerId": "p-9" })
        );
    }

    #[test]
    fn test_room_created_shape() {
        let message = ServerMessage::ok(
            1,
            ResponseData::RoomCreated {
                room_id: "abc123".to_string(),
                rtp_capabilities: RtpCapabilities::default_room_codecs(),
            },
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["data"]["roomId"], json!("abc123"));
        assert!(value["data"]["rtpCapabilities"]["codecs"].is_array());
    }
}
