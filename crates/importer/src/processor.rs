//! Bounded intake loop between document producers and the strategy.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::strategy::{DeliveryError, OfferStrategy};

/// Drains a bounded channel of documents and dispatches each through the
/// configured strategy.
///
/// `submit` applies backpressure: when the channel is full the producer
/// waits until the worker catches up. A failed delivery is logged with
/// context and never tears down the loop. [`stop`](DocumentProcessor::stop)
/// consumes the processor, so a second stop is impossible by construction.
pub struct DocumentProcessor {
    tx: mpsc::Sender<String>,
    worker: JoinHandle<u64>,
}

impl DocumentProcessor {
    /// Spawn the worker loop. The strategy is owned by the worker and
    /// released when the loop ends.
    pub fn start(strategy: Box<dyn OfferStrategy>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(capacity);
        let worker = tokio::spawn(async move {
            tracing::info!(strategy = strategy.name(), capacity, "document processor running");
            let mut delivered = 0u64;
            while let Some(content) = rx.recv().await {
                match strategy.handle(content).await {
                    Ok(Ok(())) => delivered += 1,
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "document delivery failed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "delivery task aborted");
                    }
                }
            }
            strategy.close().await;
            tracing::info!(delivered, "document processor stopped");
            delivered
        });
        Self { tx, worker }
    }

    /// Queue a document for delivery, waiting when the channel is full.
    pub async fn submit(&self, content: String) -> Result<(), DeliveryError> {
        self.tx
            .send(content)
            .await
            .map_err(|_| DeliveryError::ProcessorStopped)
    }

    /// Stop intake and wait for the worker to drain everything already
    /// queued. Returns the number of successfully delivered documents.
    pub async fn stop(self) -> u64 {
        drop(self.tx);
        match self.worker.await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::warn!(error = %e, "processor worker ended abnormally");
                0
            }
        }
    }
}
