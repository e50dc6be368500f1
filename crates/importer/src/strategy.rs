//! Delivery strategies for ingested offer documents.
//!
//! One strategy instance is wired per process, selected by `OFFER_STRATEGY`.
//! `handle` dispatches delivery on a spawned task, so the caller never
//! blocks on network I/O; it may await the returned handle for the outcome
//! or ignore it.

use std::sync::Arc;

use async_trait::async_trait;
use offerpipe_bus::{build_transport, queues, BusError, BusTransport};
use offerpipe_core::config::{BusConfig, ImporterConfig, StrategyKind};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors surfaced by strategy dispatch.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Publish or connection failure on the bus path.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Submitted to a processor whose worker has already stopped.
    #[error("document processor is stopped")]
    ProcessorStopped,
}

/// Interchangeable delivery mechanism for ingested document content.
#[async_trait]
pub trait OfferStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Accept raw document content for delivery. Returns immediately; the
    /// handle resolves when the delivery attempt does.
    fn handle(&self, content: String) -> JoinHandle<Result<(), DeliveryError>>;

    /// Best-effort release of held resources. Idempotent; errors are
    /// logged, never propagated — the caller is already tearing down.
    async fn close(&self);
}

// ── Logging ───────────────────────────────────────────────────

/// Terminal sink: records the content and succeeds, for any input.
pub struct LoggingStrategy;

#[async_trait]
impl OfferStrategy for LoggingStrategy {
    fn name(&self) -> &'static str {
        "LoggingStrategy"
    }

    fn handle(&self, content: String) -> JoinHandle<Result<(), DeliveryError>> {
        tokio::spawn(async move {
            tracing::info!(bytes = content.len(), "offer document handled: {content}");
            Ok(())
        })
    }

    async fn close(&self) {}
}

// ── Bus delivery ──────────────────────────────────────────────

/// Publishes each document to the `OfferInput` queue.
pub struct BusStrategy {
    transport: Arc<dyn BusTransport>,
}

impl std::fmt::Debug for BusStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusStrategy").finish_non_exhaustive()
    }
}

impl BusStrategy {
    /// Connect the transport and declare the input queue.
    ///
    /// Fails fast: any connection or declaration error aborts construction,
    /// so the strategy never exists in a half-initialized state.
    pub async fn connect(transport: Box<dyn BusTransport>) -> Result<Self, DeliveryError> {
        transport.connect().await?;
        transport.declare_queue(queues::OFFER_INPUT).await?;
        Ok(Self {
            transport: Arc::from(transport),
        })
    }
}

#[async_trait]
impl OfferStrategy for BusStrategy {
    fn name(&self) -> &'static str {
        "MessageBusStrategy"
    }

    fn handle(&self, content: String) -> JoinHandle<Result<(), DeliveryError>> {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            transport.send(queues::OFFER_INPUT, &content).await?;
            tracing::debug!(bytes = content.len(), "offer document published");
            Ok(())
        })
    }

    async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            tracing::warn!(error = %e, "error while releasing bus connection");
        }
    }
}

// ── Wiring ────────────────────────────────────────────────────

/// Build the configured strategy. The bus config is only consulted for the
/// bus-delivery variant.
pub async fn build_strategy(
    importer: &ImporterConfig,
    bus: &BusConfig,
) -> Result<Box<dyn OfferStrategy>, DeliveryError> {
    match importer.strategy {
        StrategyKind::Logging => Ok(Box::new(LoggingStrategy)),
        StrategyKind::MessageBus => {
            let strategy = BusStrategy::connect(build_transport(bus)).await?;
            Ok(Box::new(strategy))
        }
    }
}
