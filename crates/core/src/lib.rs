pub mod config;
pub mod entity;
pub mod error;
pub mod store;

pub use config::{
    BusBackend, BusConfig, Config, EnvSource, ImporterConfig, PersistenceConfig, ProcessEnv,
    StrategyKind,
};
pub use entity::{Customer, Invoice, InvoiceItem, InvoiceItemId, Offer, OfferItem, OfferItemId};
pub use error::ConfigError;
pub use store::{ReconciliationStore, StoreError};
