//! Per-peer session state machine.
//!
//! A [`PeerSession`] is owned by the room actor and never shared. It tracks the
//! publish and subscribe handshakes as two independent tracks so a peer can
//! subscribe before it publishes:
//!
//! ```text
//! publish:   Idle -> TransportCreated -> Connected -> Producing
//! subscribe: Idle -> TransportCreated -> Connected -> Consuming
//! ```
//!
//! The `check_*` methods validate a transition without mutating anything and
//! are used by the room actor both when preparing a provider call and again
//! when committing its result. The `record_*` methods apply the transition.

use crate::errors::RcError;
use crate::media::{MediaHandle, MediaKind, TransportDirection};
use serde::Serialize;

/// Publish-side handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    Idle,
    TransportCreated,
    Connected,
    Producing,
}

/// Subscribe-side handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeState {
    Idle,
    TransportCreated,
    Connected,
    Consuming,
}

/// Collapsed view of a peer's progress.
///
/// When a peer both publishes and subscribes it reports `Subscribing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Joining,
    Ready,
    Publishing,
    Subscribing,
    Closed,
}

#[derive(Debug, Clone)]
struct Transport {
    id: String,
    connected: bool,
}

/// Session state of one peer inside a room.
#[derive(Debug, Clone)]
pub struct PeerSession {
    peer_id: String,
    joined_seq: u64,
    capabilities_acked: bool,
    closed: bool,
    send_transport: Option<Transport>,
    recv_transport: Option<Transport>,
    producers: Vec<(String, MediaKind)>,
    consumers: Vec<String>,
}

impl PeerSession {
    /// New session in `Joining`, stamped with the room's commit sequence.
    #[must_use]
    pub fn new(peer_id: impl Into<String>, joined_seq: u64) -> Self {
        Self {
            peer_id: peer_id.into(),
            joined_seq,
            capabilities_acked: false,
            closed: false,
            send_transport: None,
            recv_transport: None,
            producers: Vec::new(),
            consumers: Vec::new(),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Room commit sequence at the moment the peer joined.
    #[must_use]
    pub fn joined_seq(&self) -> u64 {
        self.joined_seq
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Producer ids in commit order.
    pub fn producer_ids(&self) -> impl Iterator<Item = &str> {
        self.producers.iter().map(|(id, _)| id.as_str())
    }

    #[must_use]
    pub fn consumer_ids(&self) -> &[String] {
        &self.consumers
    }

    #[must_use]
    pub fn owns_producer(&self, producer_id: &str) -> bool {
        self.producers.iter().any(|(id, _)| id == producer_id)
    }

    #[must_use]
    pub fn publish_state(&self) -> PublishState {
        match &self.send_transport {
            None => PublishState::Idle,
            Some(_) if !self.producers.is_empty() => PublishState::Producing,
            Some(transport) if transport.connected => PublishState::Connected,
            Some(_) => PublishState::TransportCreated,
        }
    }

    #[must_use]
    pub fn subscribe_state(&self) -> SubscribeState {
        match &self.recv_transport {
            None => SubscribeState::Idle,
            Some(_) if !self.consumers.is_empty() => SubscribeState::Consuming,
            Some(transport) if transport.connected => SubscribeState::Connected,
            Some(_) => SubscribeState::TransportCreated,
        }
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        if self.closed {
            PeerState::Closed
        } else if !self.capabilities_acked {
            PeerState::Joining
        } else if self.subscribe_state() == SubscribeState::Consuming {
            PeerState::Subscribing
        } else if self.publish_state() == PublishState::Producing {
            PeerState::Publishing
        } else {
            PeerState::Ready
        }
    }

    /// `Joining -> Ready`. The client acknowledges the room capabilities
    /// implicitly by issuing its first transport request.
    pub fn acknowledge_capabilities(&mut self) {
        if !self.closed {
            self.capabilities_acked = true;
        }
    }

    fn transport(&self, direction: TransportDirection) -> Option<&Transport> {
        match direction {
            TransportDirection::Send => self.send_transport.as_ref(),
            TransportDirection::Recv => self.recv_transport.as_ref(),
        }
    }

    fn transport_mut(&mut self, direction: TransportDirection) -> &mut Option<Transport> {
        match direction {
            TransportDirection::Send => &mut self.send_transport,
            TransportDirection::Recv => &mut self.recv_transport,
        }
    }

    fn ensure_open(&self) -> Result<(), RcError> {
        if self.closed {
            return Err(RcError::StaleReference("peer session is closed".to_string()));
        }
        Ok(())
    }

    /// Validate creating the `direction` transport.
    pub fn check_create_transport(&self, direction: TransportDirection) -> Result<(), RcError> {
        self.ensure_open()?;
        if self.transport(direction).is_some() {
            return Err(RcError::PreconditionViolation(format!(
                "{direction} transport already exists"
            )));
        }
        Ok(())
    }

    /// Store the id of a newly created transport.
    pub fn record_transport(
        &mut self,
        direction: TransportDirection,
        transport_id: impl Into<String>,
    ) -> Result<(), RcError> {
        self.check_create_transport(direction)?;
        *self.transport_mut(direction) = Some(Transport {
            id: transport_id.into(),
            connected: false,
        });
        Ok(())
    }

    /// Validate connecting the `direction` transport. Returns its id.
    pub fn check_connect_transport(&self, direction: TransportDirection) -> Result<&str, RcError> {
        self.ensure_open()?;
        match self.transport(direction) {
            None => Err(RcError::PreconditionViolation(format!(
                "{direction} transport not created"
            ))),
            Some(transport) if transport.connected => Err(RcError::PreconditionViolation(
                format!("{direction} transport already connected"),
            )),
            Some(transport) => Ok(&transport.id),
        }
    }

    /// Mark the transport connected, provided it is still the same transport.
    pub fn record_transport_connected(
        &mut self,
        direction: TransportDirection,
        transport_id: &str,
    ) -> Result<(), RcError> {
        if self.check_connect_transport(direction)? != transport_id {
            return Err(RcError::StaleReference(format!(
                "{direction} transport was replaced"
            )));
        }
        if let Some(transport) = self.transport_mut(direction) {
            transport.connected = true;
        }
        Ok(())
    }

    fn connected_transport(&self, direction: TransportDirection) -> Result<&str, RcError> {
        self.ensure_open()?;
        match self.transport(direction) {
            Some(transport) if transport.connected => Ok(&transport.id),
            Some(_) => Err(RcError::PreconditionViolation(format!(
                "{direction} transport not connected"
            ))),
            None => Err(RcError::PreconditionViolation(format!(
                "{direction} transport not created"
            ))),
        }
    }

    /// Validate producing a `kind` track. Returns the send transport id.
    pub fn check_produce(&self, kind: MediaKind) -> Result<&str, RcError> {
        let transport_id = self.connected_transport(TransportDirection::Send)?;
        if self.producers.iter().any(|(_, produced)| *produced == kind) {
            return Err(RcError::PreconditionViolation(format!(
                "{kind} already produced"
            )));
        }
        Ok(transport_id)
    }

    pub fn record_producer(
        &mut self,
        producer_id: impl Into<String>,
        kind: MediaKind,
    ) -> Result<(), RcError> {
        self.check_produce(kind)?;
        self.producers.push((producer_id.into(), kind));
        Ok(())
    }

    /// Validate consuming a producer. Returns the receive transport id.
    pub fn check_consume(&self, producer_id: &str) -> Result<&str, RcError> {
        let transport_id = self.connected_transport(TransportDirection::Recv)?;
        if self.owns_producer(producer_id) {
            return Err(RcError::PreconditionViolation(
                "cannot consume own producer".to_string(),
            ));
        }
        Ok(transport_id)
    }

    pub fn record_consumer(&mut self, consumer_id: impl Into<String>) -> Result<(), RcError> {
        self.ensure_open()?;
        self.consumers.push(consumer_id.into());
        Ok(())
    }

    /// Forget a consumer closed by a cascade. Returns whether it was present.
    pub fn remove_consumer(&mut self, consumer_id: &str) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|id| id != consumer_id);
        before != self.consumers.len()
    }

    /// `any -> Closed`. Returns every engine resource the peer owned, in the
    /// order they must be released: consumers, producers, then transports.
    pub fn close(&mut self) -> Vec<MediaHandle> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let mut handles: Vec<MediaHandle> = self
            .consumers
            .drain(..)
            .map(MediaHandle::Consumer)
            .collect();
        handles.extend(
            self.producers
                .drain(..)
                .map(|(id, _)| MediaHandle::Producer(id)),
        );
        handles.extend(
            [self.send_transport.take(), self.recv_transport.take()]
                .into_iter()
                .flatten()
                .map(|transport| MediaHandle::Transport(transport.id)),
        );
        handles
    }
}
