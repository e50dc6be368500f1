//! The transport contract the pipeline requires from a message broker.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use offerpipe_core::config::{BusBackend, BusConfig};

use crate::amqp::AmqpTransport;
use crate::error::BusError;
use crate::memory::{MemoryBroker, MemoryTransport};

/// Lazy, unbounded sequence of deliveries from a consumed queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Backend hook for acknowledging a single delivery.
#[async_trait]
pub trait DeliveryAck: Send + Sync {
    async fn ack(&self) -> Result<(), BusError>;
}

/// One message handed to a consumer.
///
/// The payload is the verbatim published content. Dropping a delivery
/// without acknowledging it returns the message to the broker for
/// redelivery — at-least-once semantics.
pub struct Delivery {
    pub payload: String,
    acker: Box<dyn DeliveryAck>,
}

impl Delivery {
    pub fn new(payload: String, acker: Box<dyn DeliveryAck>) -> Self {
        Self { payload, acker }
    }

    /// Acknowledge after successful local processing.
    ///
    /// Consumes the delivery, so a message can be acknowledged at most once.
    pub async fn ack(self) -> Result<(), BusError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stateful client over a broker connection.
///
/// `send`, `consume`, and `declare_queue` are only valid between a
/// successful [`connect`](BusTransport::connect) and a
/// [`close`](BusTransport::close); outside that window they fail with
/// [`BusError::NotConnected`]. Each instance has exactly one logical owner.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Establish the connection. Idempotent: connecting an already
    /// connected transport is a no-op.
    async fn connect(&self) -> Result<(), BusError>;

    /// Declare a named durable queue. Re-declaring an existing queue with
    /// the same properties is a no-op.
    async fn declare_queue(&self, name: &str) -> Result<(), BusError>;

    /// Publish a payload to a queue with persistent delivery, so the broker
    /// does not drop it on its own restart.
    async fn send(&self, queue: &str, payload: &str) -> Result<(), BusError>;

    /// Start consuming a queue. Each delivery must be acknowledged exactly
    /// once after successful local processing.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BusError>;

    /// Release the channel and connection. Safe to call more than once.
    async fn close(&self) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;
}

/// Build the transport the config selects. No I/O happens here; the caller
/// owns the connect call and its failure.
pub fn build_transport(config: &BusConfig) -> Box<dyn BusTransport> {
    match config.backend {
        BusBackend::Amqp => Box::new(AmqpTransport::new(config)),
        BusBackend::Memory => Box::new(MemoryTransport::new(MemoryBroker::shared(
            &config.endpoint(),
        ))),
    }
}
