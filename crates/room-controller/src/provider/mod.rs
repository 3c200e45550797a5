//! Capability provider seam.
//!
//! The orchestrator never touches media packets. Every media-plane action
//! (routing capabilities, transports, producers, consumers) is delegated to
//! an engine behind [`CapabilityProvider`]. Calls are issued from the peer
//! actor that owns the request (or from the registry's room creation task),
//! never from inside a room or registry loop, so a slow engine only stalls
//! the peer waiting on it.
//!
//! [`InMemoryProvider`] is a self-contained engine used by the binary and by
//! tests.

pub mod in_memory;

pub use in_memory::InMemoryProvider;

use crate::media::{
    ConsumerOptions, DtlsParameters, MediaHandle, MediaKind, RtpCapabilities, RtpParameters,
    TransportDirection, TransportOptions,
};
use crate::observability::metrics as prom;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Operations of [`CapabilityProvider`], used as metric labels and as keys
/// for fault injection in [`InMemoryProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOperation {
    DescribeCapabilities,
    CreateTransport,
    ConnectTransport,
    Produce,
    Consume,
    Close,
}

impl ProviderOperation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DescribeCapabilities => "describe_capabilities",
            Self::CreateTransport => "create_transport",
            Self::ConnectTransport => "connect_transport",
            Self::Produce => "produce",
            Self::Consume => "consume",
            Self::Close => "close",
        }
    }
}

/// Errors returned by a capability provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Receiver capabilities cannot decode the producer's codec.
    #[error("incompatible capabilities: {0}")]
    IncompatibleCapabilities(String),

    /// Referenced transport or producer does not exist in the engine.
    #[error("unknown media handle: {0}")]
    UnknownHandle(String),

    /// Any other engine failure.
    #[error("provider failure: {0}")]
    Failure(String),
}

/// Media engine operations needed by the orchestrator.
#[async_trait::async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Codec set the engine routes for a new room.
    async fn describe_capabilities(&self, room_id: &str) -> Result<RtpCapabilities, ProviderError>;

    /// Create a WebRTC transport for one direction of a peer.
    async fn create_transport(
        &self,
        capabilities: &RtpCapabilities,
        direction: TransportDirection,
    ) -> Result<TransportOptions, ProviderError>;

    /// Complete the DTLS handshake of a transport.
    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), ProviderError>;

    /// Start receiving a track on a send transport. Returns the producer id.
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<String, ProviderError>;

    /// Start forwarding a producer's track over a receive transport.
    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumerOptions, ProviderError>;

    /// Release an engine resource. Closing an unknown handle is a no-op.
    async fn close(&self, handle: MediaHandle) -> Result<(), ProviderError>;
}

/// Await a provider call, recording its duration and status.
pub async fn observe_call<T, F>(operation: ProviderOperation, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let started = Instant::now();
    let result = call.await;
    let status = if result.is_ok() { "success" } else { "error" };
    prom::record_provider_call(operation.as_str(), status, started.elapsed());
    result
}

/// Close engine resources in order on a background task.
///
/// Close failures are logged and otherwise ignored; the resource owner has
/// already forgotten the handles.
pub fn close_detached(provider: Arc<dyn CapabilityProvider>, handles: Vec<MediaHandle>) {
    if handles.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for handle in handles {
            let result = observe_call(ProviderOperation::Close, provider.close(handle.clone())).await;
            if let Err(e) = result {
                debug!(
                    target: "rc.provider",
                    handle = %handle,
                    error = %e,
                    "Failed to close media handle"
                );
            }
        }
    });
}
