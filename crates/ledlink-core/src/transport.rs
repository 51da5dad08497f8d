//! Transport adapter abstraction
//!
//! The controller drives the radio only through [`GattTransport`]. Each call
//! is a single attempt; timeouts and connection retries are applied by the
//! controller. Unsolicited traffic (indications, link drops) arrives on a
//! [`TransportEventReceiver`] handed to the controller at spawn time.
//!
//! The controller's own operation completions are queued on that same
//! channel, so a transport event and a completion are always seen in the
//! order they were sent.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::gatt::{CharacteristicHandle, GattService};
use crate::logic::state::{CompletionSender, Inbound, InboundReceiver};
use crate::types::PeripheralIdentity;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Failure reported by a transport primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peripheral not found: {0}")]
    PeripheralNotFound(PeripheralIdentity),

    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("transport operation timed out")]
    Timeout,

    #[error("ATT error: {0}")]
    Att(String),

    #[error("peripheral not connected")]
    NotConnected,

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Unsolicited event from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Server-initiated value push on a subscribed characteristic
    Indication {
        peer: PeripheralIdentity,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// The link dropped without the controller asking for it
    LinkLost {
        peer: PeripheralIdentity,
        reason: String,
    },
}

/// Sending half used by transport implementations
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl TransportEventSender {
    /// Queue `event` for the controller; fails once the controller is gone
    pub fn send(&self, event: TransportEvent) -> Result<(), TransportError> {
        self.tx
            .send(Inbound::Transport(event))
            .map_err(|_| TransportError::Unavailable("controller stopped".to_string()))
    }
}

/// Receiving half consumed by the controller
#[derive(Debug)]
pub struct TransportEventReceiver {
    rx: mpsc::UnboundedReceiver<Inbound>,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl TransportEventReceiver {
    /// Take a queued transport event without waiting
    pub fn try_recv(&mut self) -> Result<TransportEvent, mpsc::error::TryRecvError> {
        loop {
            match self.rx.try_recv()? {
                Inbound::Transport(event) => return Ok(event),
                // Only queued once the controller owns the channel
                Inbound::Completion(_) => continue,
            }
        }
    }

    /// Split into the controller's completion sender and its single inbound queue
    pub(crate) fn into_queue(self) -> (CompletionSender, InboundReceiver) {
        (CompletionSender::new(self.tx), self.rx)
    }
}

/// Create the channel a transport uses to deliver events to the controller
pub fn transport_event_channel() -> (TransportEventSender, TransportEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TransportEventSender { tx: tx.clone() },
        TransportEventReceiver { rx, tx },
    )
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Primitive GATT central operations provided by the host Bluetooth stack
#[async_trait]
pub trait GattTransport: Send + Sync + 'static {
    /// Establish a link to `peer` (single attempt, no timeout of its own)
    async fn link_connect(&self, peer: &PeripheralIdentity) -> Result<(), TransportError>;

    /// Tear down the link to `peer`
    async fn link_disconnect(&self, peer: &PeripheralIdentity) -> Result<(), TransportError>;

    /// Discover the services and characteristics exposed by `peer`
    async fn discover_services(
        &self,
        peer: &PeripheralIdentity,
    ) -> Result<Vec<GattService>, TransportError>;

    /// Read the characteristic value
    async fn read_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, TransportError>;

    /// Write the characteristic value (with response)
    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Enable indications; values then arrive as [`TransportEvent::Indication`]
    async fn enable_indications(&self, handle: &CharacteristicHandle)
        -> Result<(), TransportError>;
}
