//! Message-bus transport for the offer pipeline.
//!
//! One contract, two backends: [`AmqpTransport`] speaks AMQP to a RabbitMQ
//! broker, [`MemoryTransport`] runs against a process-local broker so a
//! single process (or a test) can exercise both ends of a queue. Backend
//! selection happens once at wiring time via [`build_transport`].

pub mod amqp;
pub mod error;
pub mod memory;
pub mod transport;

pub use amqp::AmqpTransport;
pub use error::BusError;
pub use memory::{MemoryBroker, MemoryTransport};
pub use transport::{build_transport, BusTransport, Delivery, DeliveryAck, DeliveryStream};

/// Well-known queue names.
pub mod queues {
    /// Queue carrying raw offer documents from the importer to persistence.
    pub const OFFER_INPUT: &str = "OfferInput";
}
