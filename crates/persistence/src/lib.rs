//! Durable persistence for offer documents.
//!
//! Consumes the `OfferInput` queue and writes each payload verbatim to an
//! `offer_<uuid>` file under the configured directory. Deliveries are
//! acknowledged only after the file has been flushed to stable storage, so
//! a crash mid-write loses nothing the broker cannot redeliver.

pub mod error;
pub mod service;
pub mod writer;

pub use error::PersistenceError;
pub use service::{start, ConsumerState, ShutdownHandle};
pub use writer::ArtifactWriter;
