//! In-memory media engine.
//!
//! Synthesizes engine handles and parameters without touching the network.
//! Tracks which transports, producers and consumers are live so callers can
//! check that teardown released everything. Failures, latency and
//! hold/release gates can be injected per operation.

use super::{CapabilityProvider, ProviderError, ProviderOperation};
use crate::media::{
    ConsumerOptions, DtlsParameters, MediaHandle, MediaKind, RtpCapabilities, RtpParameters,
    TransportDirection, TransportOptions,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;
use uuid::Uuid;

struct EngineTransport {
    direction: TransportDirection,
    capabilities: RtpCapabilities,
    connected: bool,
}

struct EngineProducer {
    transport_id: String,
    kind: MediaKind,
}

struct EngineConsumer {
    transport_id: String,
    producer_id: String,
}

#[derive(Default)]
struct EngineState {
    transports: HashMap<String, EngineTransport>,
    producers: HashMap<String, EngineProducer>,
    consumers: HashMap<String, EngineConsumer>,
    calls: HashMap<ProviderOperation, usize>,
    failures: HashMap<ProviderOperation, usize>,
    latencies: HashMap<ProviderOperation, Duration>,
    gates: HashMap<ProviderOperation, Arc<Semaphore>>,
    next_port: u16,
}

impl EngineState {
    fn close_consumer(&mut self, consumer_id: &str) {
        self.consumers.remove(consumer_id);
    }

    fn close_producer(&mut self, producer_id: &str) {
        if self.producers.remove(producer_id).is_some() {
            self.consumers
                .retain(|_, consumer| consumer.producer_id != producer_id);
        }
    }

    fn close_transport(&mut self, transport_id: &str) {
        if self.transports.remove(transport_id).is_none() {
            return;
        }
        let producers: Vec<String> = self
            .producers
            .iter()
            .filter(|(_, producer)| producer.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in producers {
            self.close_producer(&producer_id);
        }
        self.consumers
            .retain(|_, consumer| consumer.transport_id != transport_id);
    }
}

/// Engine stand-in holding all media state in process memory.
pub struct InMemoryProvider {
    capabilities: RtpCapabilities,
    latency: Duration,
    state: Mutex<EngineState>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Engine routing the default VP8/opus codec set with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: RtpCapabilities::default_room_codecs(),
            latency: Duration::ZERO,
            state: Mutex::new(EngineState {
                next_port: 40000,
                ..EngineState::default()
            }),
        }
    }

    /// Replace the codec set returned by `describe_capabilities`.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: RtpCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Add a fixed latency to every operation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next `times` calls of `operation` fail with `ProviderError::Failure`.
    pub async fn fail_next(&self, operation: ProviderOperation, times: usize) {
        let mut state = self.state.lock().await;
        *state.failures.entry(operation).or_insert(0) += times;
    }

    /// Override the latency of a single operation.
    pub async fn set_latency(&self, operation: ProviderOperation, latency: Duration) {
        self.state.lock().await.latencies.insert(operation, latency);
    }

    /// Block calls of `operation` (after they are counted) until [`Self::release`].
    pub async fn hold(&self, operation: ProviderOperation) {
        self.state
            .lock()
            .await
            .gates
            .entry(operation)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Let every held and future call of `operation` proceed.
    pub async fn release(&self, operation: ProviderOperation) {
        if let Some(gate) = self.state.lock().await.gates.remove(&operation) {
            gate.close();
        }
    }

    /// Number of calls made to `operation`, including failed and held ones.
    pub async fn call_count(&self, operation: ProviderOperation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Whether the engine still holds the resource.
    pub async fn is_open(&self, handle: &MediaHandle) -> bool {
        let state = self.state.lock().await;
        match handle {
            MediaHandle::Transport(id) => state.transports.contains_key(id),
            MediaHandle::Producer(id) => state.producers.contains_key(id),
            MediaHandle::Consumer(id) => state.consumers.contains_key(id),
        }
    }

    /// Total number of live transports, producers and consumers.
    pub async fn open_handle_count(&self) -> usize {
        let state = self.state.lock().await;
        state.transports.len() + state.producers.len() + state.consumers.len()
    }

    /// Count the call, apply injected failure, gate and latency.
    async fn enter(&self, operation: ProviderOperation) -> Result<(), ProviderError> {
        let (gate, latency) = {
            let mut state = self.state.lock().await;
            *state.calls.entry(operation).or_insert(0) += 1;

            if let Some(remaining) = state.failures.get_mut(&operation) {
                if *remaining > 0 {
                    *remaining -= 1;
                    debug!(
                        target: "rc.provider",
                        operation = operation.as_str(),
                        "Injected provider failure"
                    );
                    return Err(ProviderError::Failure(format!(
                        "injected {} failure",
                        operation.as_str()
                    )));
                }
            }

            let latency = state
                .latencies
                .get(&operation)
                .copied()
                .unwrap_or(self.latency);
            (state.gates.get(&operation).cloned(), latency)
        };

        if let Some(gate) = gate {
            // A closed gate means the operation was released.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl CapabilityProvider for InMemoryProvider {
    async fn describe_capabilities(&self, room_id: &str) -> Result<RtpCapabilities, ProviderError> {
        self.enter(ProviderOperation::DescribeCapabilities).await?;
        debug!(target: "rc.provider", room_id = %room_id, "Router created");
        Ok(self.capabilities.clone())
    }

    async fn create_transport(
        &self,
        capabilities: &RtpCapabilities,
        direction: TransportDirection,
    ) -> Result<TransportOptions, ProviderError> {
        self.enter(ProviderOperation::CreateTransport).await?;

        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        let port = state.next_port;
        state.next_port = state.next_port.wrapping_add(1).max(40000);
        state.transports.insert(
            id.clone(),
            EngineTransport {
                direction,
                capabilities: capabilities.clone(),
                connected: false,
            },
        );

        let fragment = Uuid::new_v4().simple().to_string();
        Ok(TransportOptions {
            id,
            ice_parameters: json!({
                "usernameFragment": fragment.get(..16).unwrap_or(fragment.as_str()),
                "password": Uuid::new_v4().simple().to_string(),
                "iceLite": true,
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "ip": "127.0.0.1",
                "port": port,
                "priority": 1_076_302_079_u32,
                "protocol": "udp",
                "type": "host",
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": Uuid::new_v4().simple().to_string(),
                }],
            }),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        _dtls_parameters: DtlsParameters,
    ) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::ConnectTransport).await?;

        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| ProviderError::UnknownHandle(transport_id.to_string()))?;
        if transport.connected {
            return Err(ProviderError::Failure(
                "transport already connected".to_string(),
            ));
        }
        transport.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        _rtp_parameters: RtpParameters,
    ) -> Result<String, ProviderError> {
        self.enter(ProviderOperation::Produce).await?;

        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| ProviderError::UnknownHandle(transport_id.to_string()))?;
        if transport.direction != TransportDirection::Send {
            return Err(ProviderError::Failure(
                "cannot produce on a receive transport".to_string(),
            ));
        }
        if !transport.capabilities.supports_kind(kind) {
            return Err(ProviderError::IncompatibleCapabilities(format!(
                "room does not route {kind}"
            )));
        }

        let id = Uuid::new_v4().to_string();
        state.producers.insert(
            id.clone(),
            EngineProducer {
                transport_id: transport_id.to_string(),
                kind,
            },
        );
        Ok(id)
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumerOptions, ProviderError> {
        self.enter(ProviderOperation::Consume).await?;

        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| ProviderError::UnknownHandle(transport_id.to_string()))?;
        if transport.direction != TransportDirection::Recv {
            return Err(ProviderError::Failure(
                "cannot consume on a send transport".to_string(),
            ));
        }
        let kind = state
            .producers
            .get(producer_id)
            .map(|producer| producer.kind)
            .ok_or_else(|| ProviderError::UnknownHandle(producer_id.to_string()))?;
        if !capabilities.can_consume(&transport.capabilities, kind) {
            return Err(ProviderError::IncompatibleCapabilities(format!(
                "no common {kind} codec"
            )));
        }

        let codecs: Vec<_> = transport
            .capabilities
            .codecs
            .iter()
            .filter(|codec| codec.kind == kind)
            .cloned()
            .collect();
        let id = Uuid::new_v4().to_string();
        state.consumers.insert(
            id.clone(),
            EngineConsumer {
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
            },
        );

        Ok(ConsumerOptions {
            id,
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters: json!({
                "codecs": codecs,
                "encodings": [{ "ssrc": rand::random::<u32>() }],
            }),
        })
    }

    async fn close(&self, handle: MediaHandle) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::Close).await?;

        let mut state = self.state.lock().await;
        match &handle {
            MediaHandle::Transport(id) => state.close_transport(id),
            MediaHandle::Producer(id) => state.close_producer(id),
            MediaHandle::Consumer(id) => state.close_consumer(id),
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::RtpCodecCapability;

    async fn connected_transport(
        provider: &InMemoryProvider,
        direction: TransportDirection,
    ) -> String {
        let caps = RtpCapabilities::default_room_codecs();
        let transport = provider.create_transport(&caps, direction).await.unwrap();
        provider
            .connect_transport(&transport.id, json!({ "role": "client" }))
            .await
            .unwrap();
        transport.id
    }

    #[tokio::test]
    async fn test_describe_returns_default_codecs() {
        let provider = InMemoryProvider::new();
        let caps = provider.describe_capabilities("room-1").await.unwrap();

        assert_eq!(caps, RtpCapabilities::default_room_codecs());
        assert_eq!(
            provider
                .call_count(ProviderOperation::DescribeCapabilities)
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_transport_options_shape() {
        let provider = InMemoryProvider::new();
        let transport = provider
            .create_transport(
                &RtpCapabilities::default_room_codecs(),
                TransportDirection::Send,
            )
            .await
            .unwrap();

        assert!(transport.ice_parameters.get("usernameFragment").is_some());
        assert!(transport.ice_candidates.is_array());
        assert!(transport.dtls_parameters.get("fingerprints").is_some());
        assert!(
            provider
                .is_open(&MediaHandle::Transport(transport.id.clone()))
                .await
        );
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let provider = InMemoryProvider::new();
        let transport_id = connected_transport(&provider, TransportDirection::Send).await;

        let result = provider.connect_transport(&transport_id, json!({})).await;
        assert!(matches!(result, Err(ProviderError::Failure(_))));
    }

    #[tokio::test]
    async fn test_connect_unknown_transport() {
        let provider = InMemoryProvider::new();
        let result = provider.connect_transport("missing", json!({})).await;
        assert_eq!(
            result,
            Err(ProviderError::UnknownHandle("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_produce_and_consume() {
        let provider = InMemoryProvider::new();
        let send = connected_transport(&provider, TransportDirection::Send).await;
        let recv = connected_transport(&provider, TransportDirection::Recv).await;

        let producer_id = provider
            .produce(&send, MediaKind::Video, json!({ "encodings": [] }))
            .await
            .unwrap();
        let consumer = provider
            .consume(&recv, &producer_id, &RtpCapabilities::default_room_codecs())
            .await
            .unwrap();

        assert_eq!(consumer.producer_id, producer_id);
        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(
            consumer.rtp_parameters["codecs"][0]["mimeType"],
            json!("video/VP8")
        );
    }

    #[tokio::test]
    async fn test_consume_incompatible_capabilities() {
        let provider = InMemoryProvider::new();
        let send = connected_transport(&provider, TransportDirection::Send).await;
        let recv = connected_transport(&provider, TransportDirection::Recv).await;
        let producer_id = provider
            .produce(&send, MediaKind::Video, json!({}))
            .await
            .unwrap();

        let h264 = RtpCapabilities {
            codecs: vec![RtpCodecCapability::video("video/H264", 90000)],
            header_extensions: Vec::new(),
        };
        let result = provider.consume(&recv, &producer_id, &h264).await;
        assert!(matches!(
            result,
            Err(ProviderError::IncompatibleCapabilities(_))
        ));
    }

    #[tokio::test]
    async fn test_close_producer_closes_its_consumers() {
        let provider = InMemoryProvider::new();
        let send = connected_transport(&provider, TransportDirection::Send).await;
        let recv = connected_transport(&provider, TransportDirection::Recv).await;
        let producer_id = provider
            .produce(&send, MediaKind::Video, json!({}))
            .await
            .unwrap();
        let consumer = provider
            .consume(&recv, &producer_id, &RtpCapabilities::default_room_codecs())
            .await
            .unwrap();

        provider
            .close(MediaHandle::Producer(producer_id.clone()))
            .await
            .unwrap();

        assert!(!provider.is_open(&MediaHandle::Producer(producer_id)).await);
        assert!(!provider.is_open(&MediaHandle::Consumer(consumer.id)).await);
        // Transports stay open
        assert_eq!(provider.open_handle_count().await, 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let provider = InMemoryProvider::new();
        provider
            .close(MediaHandle::Consumer("never-existed".to_string()))
            .await
            .unwrap();
        assert_eq!(provider.call_count(ProviderOperation::Close).await, 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let provider = InMemoryProvider::new();
        provider
            .fail_next(ProviderOperation::DescribeCapabilities, 1)
            .await;

        assert!(provider.describe_capabilities("r").await.is_err());
        assert!(provider.describe_capabilities("r").await.is_ok());
        assert_eq!(
            provider
                .call_count(ProviderOperation::DescribeCapabilities)
                .await,
            2
        );
    }

    #[tokio::test]
    async fn test_hold_and_release() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.hold(ProviderOperation::DescribeCapabilities).await;

        let task_provider = Arc::clone(&provider);
        let task = tokio::spawn(async move { task_provider.describe_capabilities("r").await });

        while provider
            .call_count(ProviderOperation::DescribeCapabilities)
            .await
            == 0
        {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        provider
            .release(ProviderOperation::DescribeCapabilities)
            .await;
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let provider = InMemoryProvider::new().with_latency(Duration::from_millis(200));
        let started = tokio::time::Instant::now();

        provider.describe_capabilities("r").await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
