//! Offer document ingestion.
//!
//! Documents enter as raw strings and leave through an [`OfferStrategy`]:
//! either logged (diagnostics/dev) or published to the message bus for the
//! persistence service to pick up. The [`DocumentProcessor`] sits between
//! producers and the strategy with a bounded channel, so producers feel
//! backpressure instead of queueing without limit.

pub mod processor;
pub mod strategy;

pub use processor::DocumentProcessor;
pub use strategy::{build_strategy, BusStrategy, DeliveryError, LoggingStrategy, OfferStrategy};
