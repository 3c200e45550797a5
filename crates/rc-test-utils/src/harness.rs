//! In-process signaling clients.
//!
//! [`TestRoomController`] wires a registry to an [`InMemoryProvider`] that
//! the test keeps a reference to, so it can inject faults and count calls.
//! [`PeerHarness`] drives one `PeerActor` the way a WebSocket client would,
//! without a socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! let controller = TestRoomController::builder().build();
//! let mut alice = controller.connect("alice");
//! alice.join("lobby").await;
//! let producer_id = alice.publish(MediaKind::Video).await;
//! ```

use crate::fixtures::{client_capabilities, dtls_parameters, rtp_parameters};
use room_controller::actors::{ActorMetrics, PeerActor, PeerActorHandle, PushEvent, RegistrySettings, RoomRegistryHandle};
use room_controller::media::{ConsumerOptions, MediaKind, RtpCapabilities, TransportOptions};
use room_controller::provider::{CapabilityProvider, InMemoryProvider};
use room_controller::signaling::protocol::{
    ClientRequest, ClientRequestBody, ErrorBody, Response, ResponseData, ServerMessage,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long harness calls wait for a frame before failing the test.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry plus engine, ready for peers.
pub struct TestRoomController {
    pub registry: RoomRegistryHandle,
    pub provider: Arc<InMemoryProvider>,
    pub metrics: Arc<ActorMetrics>,
}

/// Builder for [`TestRoomController`].
#[derive(Default)]
pub struct TestRoomControllerBuilder {
    provider: Option<InMemoryProvider>,
    settings: Option<RegistrySettings>,
}

impl TestRoomControllerBuilder {
    /// Use a preconfigured engine.
    #[must_use]
    pub fn with_provider(mut self, provider: InMemoryProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = Some(settings);
        self
    }

    #[must_use]
    pub fn build(self) -> TestRoomController {
        let provider = Arc::new(self.provider.unwrap_or_default());
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            "rc-test".to_string(),
            Arc::clone(&provider) as Arc<dyn CapabilityProvider>,
            self.settings
                .unwrap_or_else(|| crate::fixtures::TestSettings::new().build()),
            Arc::clone(&metrics),
        );

        TestRoomController {
            registry,
            provider,
            metrics,
        }
    }
}

impl TestRoomController {
    #[must_use]
    pub fn builder() -> TestRoomControllerBuilder {
        TestRoomControllerBuilder::default()
    }

    /// Open an in-process connection for `peer_id`.
    #[must_use]
    pub fn connect(&self, peer_id: &str) -> PeerHarness {
        let (outbound_tx, outbound) = mpsc::channel(256);
        let (handle, _task) = PeerActor::spawn(
            peer_id.to_string(),
            self.registry.clone(),
            outbound_tx,
            self.registry.child_token(),
            Arc::clone(&self.metrics),
        );

        PeerHarness {
            handle,
            outbound,
            events: VecDeque::new(),
            next_id: 1,
            send_ready: false,
            recv_ready: false,
        }
    }

    /// Stop every actor.
    pub fn shutdown(&self) {
        self.registry.cancel();
    }
}

/// One simulated signaling client.
pub struct PeerHarness {
    handle: PeerActorHandle,
    outbound: mpsc::Receiver<ServerMessage>,
    /// Events received while waiting for a response.
    events: VecDeque<PushEvent>,
    next_id: u64,
    send_ready: bool,
    recv_ready: bool,
}

impl PeerHarness {
    #[must_use]
    pub fn peer_id(&self) -> &str {
        self.handle.peer_id()
    }

    async fn next_frame(&mut self) -> ServerMessage {
        tokio::time::timeout(FRAME_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("peer actor stopped")
    }

    /// Send a request and wait for its response. Events that arrive first
    /// are kept for [`Self::next_event`].
    pub async fn request(&mut self, body: ClientRequestBody) -> Response {
        let id = self.next_id;
        self.next_id += 1;
        self.handle
            .submit(ClientRequest { id, body })
            .await
            .expect("peer actor stopped");

        loop {
            match self.next_frame().await {
                ServerMessage::Response(response) => {
                    assert_eq!(response.id, id, "responses must arrive in request order");
                    return response;
                }
                ServerMessage::Event(event) => self.events.push_back(event),
            }
        }
    }

    /// Send a request that must succeed and return its payload.
    pub async fn request_ok(&mut self, body: ClientRequestBody) -> ResponseData {
        let response = self.request(body).await;
        assert!(response.ok, "request failed: {:?}", response.error);
        response.data.expect("successful response without data")
    }

    /// Send a request that must fail and return its error.
    pub async fn request_err(&mut self, body: ClientRequestBody) -> ErrorBody {
        let response = self.request(body).await;
        assert!(!response.ok, "request unexpectedly succeeded: {:?}", response.data);
        response.error.expect("failed response without error")
    }

    /// Join `room_id` and return the room capabilities.
    pub async fn join(&mut self, room_id: &str) -> RtpCapabilities {
        match self
            .request_ok(ClientRequestBody::JoinRoom {
                room_id: room_id.to_string(),
            })
            .await
        {
            ResponseData::Joined { rtp_capabilities } => rtp_capabilities,
            other => panic!("unexpected join payload: {other:?}"),
        }
    }

    /// Create a room and return its id.
    pub async fn create_room(&mut self) -> String {
        match self.request_ok(ClientRequestBody::CreateRoom).await {
            ResponseData::RoomCreated { room_id, .. } => room_id,
            other => panic!("unexpected create-room payload: {other:?}"),
        }
    }

    /// Create and connect the send transport.
    pub async fn open_send(&mut self) -> TransportOptions {
        let transport = match self.request_ok(ClientRequestBody::CreateSendTransport).await {
            ResponseData::Transport(options) => options,
            other => panic!("unexpected transport payload: {other:?}"),
        };
        self.request_ok(ClientRequestBody::ConnectSendTransport {
            dtls_parameters: dtls_parameters(),
        })
        .await;
        self.send_ready = true;
        transport
    }

    /// Create and connect the receive transport.
    pub async fn open_recv(&mut self) -> TransportOptions {
        let transport = match self.request_ok(ClientRequestBody::CreateRecvTransport).await {
            ResponseData::Transport(options) => options,
            other => panic!("unexpected transport payload: {other:?}"),
        };
        self.request_ok(ClientRequestBody::ConnectRecvTransport {
            dtls_parameters: dtls_parameters(),
        })
        .await;
        self.recv_ready = true;
        transport
    }

    /// Publish a `kind` track, opening the send transport on first use.
    pub async fn publish(&mut self, kind: MediaKind) -> String {
        if !self.send_ready {
            self.open_send().await;
        }
        match self
            .request_ok(ClientRequestBody::Produce {
                kind,
                rtp_parameters: rtp_parameters(kind),
            })
            .await
        {
            ResponseData::Produced { id } => id,
            other => panic!("unexpected produce payload: {other:?}"),
        }
    }

    /// Consume request body with full client capabilities.
    #[must_use]
    pub fn consume_body(producer_id: &str) -> ClientRequestBody {
        ClientRequestBody::Consume {
            producer_id: producer_id.to_string(),
            rtp_capabilities: client_capabilities(),
        }
    }

    /// Subscribe to `producer_id`, opening the receive transport on first use.
    pub async fn subscribe(&mut self, producer_id: &str) -> ConsumerOptions {
        if !self.recv_ready {
            self.open_recv().await;
        }
        match self.request_ok(Self::consume_body(producer_id)).await {
            ResponseData::Consumed(consumer) => consumer,
            other => panic!("unexpected consume payload: {other:?}"),
        }
    }

    pub async fn existing_producers(&mut self) -> Vec<String> {
        match self
            .request_ok(ClientRequestBody::GetExistingProducers)
            .await
        {
            ResponseData::ExistingProducers { producer_ids } => producer_ids,
            other => panic!("unexpected existing-producers payload: {other:?}"),
        }
    }

    /// Wait for the next push event.
    pub async fn next_event(&mut self) -> PushEvent {
        if let Some(event) = self.events.pop_front() {
            return event;
        }
        loop {
            match self.next_frame().await {
                ServerMessage::Event(event) => return event,
                ServerMessage::Response(response) => {
                    panic!("unsolicited response: {response:?}")
                }
            }
        }
    }

    /// Every push event delivered so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<PushEvent> {
        while let Ok(frame) = self.outbound.try_recv() {
            match frame {
                ServerMessage::Event(event) => self.events.push_back(event),
                ServerMessage::Response(response) => {
                    panic!("unsolicited response: {response:?}")
                }
            }
        }
        self.events.drain(..).collect()
    }

    /// Close the connection.
    pub async fn disconnect(&self) {
        self.handle.disconnect();
    }
}
