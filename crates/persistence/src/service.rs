//! The persistence service: bus consumer, bounded buffer, file-writing
//! worker, and the start/shutdown lifecycle around them.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use offerpipe_bus::{build_transport, queues, BusTransport, Delivery};
use offerpipe_core::Config;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::error::PersistenceError;
use crate::writer::ArtifactWriter;

/// Consumer worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

struct ServiceParts {
    intake: JoinHandle<()>,
    worker: JoinHandle<()>,
    transport: Arc<dyn BusTransport>,
    stop_intake: Arc<Notify>,
    grace: Duration,
}

/// Start the persistence service.
///
/// Connects the transport, declares `OfferInput`, then spawns two tasks:
/// an intake task moving bus deliveries into a bounded buffer, and a
/// consumer worker draining the buffer into `offer_<uuid>` artifacts. The
/// buffer is the flow-control point: when it fills, intake stops pulling
/// deliveries and the broker retains the backlog unacknowledged.
///
/// Any connection or declaration failure aborts startup; the service never
/// runs half-initialized.
pub async fn start(config: &Config) -> Result<ShutdownHandle, PersistenceError> {
    let transport: Arc<dyn BusTransport> = Arc::from(build_transport(&config.bus));
    transport.connect().await?;
    transport.declare_queue(queues::OFFER_INPUT).await?;
    let mut stream = transport.consume(queues::OFFER_INPUT).await?;

    tracing::info!("Persistence service starting...");

    let (buffer_tx, mut buffer_rx) =
        mpsc::channel::<Delivery>(config.persistence.buffer_capacity);
    let (state_tx, state_rx) = watch::channel(ConsumerState::Idle);
    let state_tx = Arc::new(state_tx);
    let stop_intake = Arc::new(Notify::new());

    let intake = {
        let stop = Arc::clone(&stop_intake);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    item = stream.next() => match item {
                        Some(Ok(delivery)) => {
                            // Buffer before acknowledging; a full buffer
                            // parks intake here, which is the backpressure.
                            if buffer_tx.send(delivery).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "consume error, stopping intake");
                            break;
                        }
                        None => {
                            tracing::warn!("delivery stream ended");
                            break;
                        }
                    },
                }
            }
        })
    };

    let worker = {
        let state = Arc::clone(&state_tx);
        let writer = ArtifactWriter::new(config.persistence.path.clone());
        tokio::spawn(async move {
            state.send_replace(ConsumerState::Running);
            while let Some(delivery) = buffer_rx.recv().await {
                match writer.write(&delivery.payload).await {
                    Ok(path) => {
                        tracing::debug!(path = %path.display(), "artifact persisted");
                        // Ack only after the durable write: a crash before
                        // this point leaves the message with the broker.
                        if let Err(e) = delivery.ack().await {
                            tracing::warn!(error = %e, "failed to acknowledge delivery");
                        }
                    }
                    Err(e) => {
                        // No ack: the broker redelivers later. Duplicate
                        // artifacts are the accepted cost.
                        tracing::error!(
                            error = %e,
                            "artifact write failed, delivery left unacknowledged"
                        );
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            }
            state.send_replace(ConsumerState::Stopped);
        })
    };

    Ok(ShutdownHandle {
        parts: Arc::new(Mutex::new(Some(ServiceParts {
            intake,
            worker,
            transport,
            stop_intake,
            grace: config.persistence.shutdown_grace(),
        }))),
        state_tx,
        state_rx,
    })
}

/// Cloneable handle that owns the running service's teardown.
#[derive(Clone)]
pub struct ShutdownHandle {
    parts: Arc<Mutex<Option<ServiceParts>>>,
    state_tx: Arc<watch::Sender<ConsumerState>>,
    state_rx: watch::Receiver<ConsumerState>,
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ShutdownHandle {
    /// Current consumer state.
    pub fn state(&self) -> ConsumerState {
        *self.state_rx.borrow()
    }

    /// Suspend until the consumer reaches the given state. Returns
    /// immediately if it is already there.
    pub async fn wait_for(&self, target: ConsumerState) {
        let mut rx = self.state_rx.clone();
        while *rx.borrow_and_update() != target {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the service: halt intake, drain buffered work within the grace
    /// window, then close the transport.
    ///
    /// Idempotent. The first call performs the teardown; later calls (and
    /// concurrent callers on clones) return once it has completed.
    pub async fn shutdown(&self) {
        let mut guard = self.parts.lock().await;
        let Some(parts) = guard.take() else {
            return;
        };

        tracing::info!("Shutting down PersistenceService...");

        parts.stop_intake.notify_one();
        if let Err(e) = parts.intake.await {
            tracing::warn!(error = %e, "intake task ended abnormally");
        }

        // Intake is gone, so the buffer is closed; the worker exits once
        // it has written what is already queued.
        self.state_tx.send_replace(ConsumerState::Draining);
        let mut worker = parts.worker;
        match tokio::time::timeout(parts.grace, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "consumer worker ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    grace_secs = parts.grace.as_secs(),
                    "drain grace elapsed, force-stopping consumer"
                );
                worker.abort();
            }
        }
        self.state_tx.send_replace(ConsumerState::Stopped);

        if let Err(e) = parts.transport.close().await {
            tracing::warn!(error = %e, "error while closing transport");
        }
    }
}
