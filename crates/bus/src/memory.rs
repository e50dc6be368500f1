//! In-process transport backend.
//!
//! Carries the same at-least-once contract as the AMQP backend without a
//! broker process: unacknowledged deliveries return to the front of their
//! queue when dropped. Brokers are shared per endpoint within one process,
//! so a producer and a consumer configured for the same host:port exchange
//! messages through the same queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::BusError;
use crate::transport::{BusTransport, Delivery, DeliveryAck, DeliveryStream};

// ── Queue ─────────────────────────────────────────────────────

struct QueueInner {
    pending: VecDeque<String>,
    unacked: HashMap<u64, String>,
    next_tag: u64,
}

struct QueueState {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl QueueState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                unacked: HashMap::new(),
                next_tag: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn publish(&self, payload: String) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.pending.push_back(payload);
        drop(inner);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<(u64, String)> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let payload = inner.pending.pop_front()?;
        let tag = inner.next_tag;
        inner.next_tag += 1;
        inner.unacked.insert(tag, payload.clone());
        Some((tag, payload))
    }

    fn ack_tag(&self, tag: u64) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.unacked.remove(&tag);
    }

    fn requeue(&self, tag: u64) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(payload) = inner.unacked.remove(&tag) {
            inner.pending.push_front(payload);
            drop(inner);
            self.notify.notify_one();
        }
    }

    fn depth(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.pending.len()
    }

    fn unacked_count(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.unacked.len()
    }
}

async fn recv_from(queue: &Arc<QueueState>) -> Delivery {
    loop {
        // Register for a wakeup before checking, otherwise a publish that
        // lands between the check and the await is lost.
        let notified = queue.notify.notified();
        if let Some((tag, payload)) = queue.try_pop() {
            let acker: Box<dyn DeliveryAck> = Box::new(MemoryAck {
                queue: Arc::clone(queue),
                tag,
                acked: AtomicBool::new(false),
            });
            return Delivery::new(payload, acker);
        }
        notified.await;
    }
}

struct MemoryAck {
    queue: Arc<QueueState>,
    tag: u64,
    acked: AtomicBool,
}

#[async_trait]
impl DeliveryAck for MemoryAck {
    async fn ack(&self) -> Result<(), BusError> {
        self.acked.store(true, Ordering::SeqCst);
        self.queue.ack_tag(self.tag);
        Ok(())
    }
}

impl Drop for MemoryAck {
    fn drop(&mut self) {
        if !self.acked.load(Ordering::SeqCst) {
            self.queue.requeue(self.tag);
        }
    }
}

// ── Broker ────────────────────────────────────────────────────

/// Process-local set of named queues.
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve the shared broker registered under an endpoint, creating it
    /// on first use. Two transports built for the same endpoint see the
    /// same queues.
    pub fn shared(endpoint: &str) -> Arc<Self> {
        static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MemoryBroker>>>> = OnceLock::new();
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = registry.lock().expect("broker registry lock poisoned");
        Arc::clone(
            map.entry(endpoint.to_string())
                .or_insert_with(MemoryBroker::new),
        )
    }

    fn queue(&self, name: &str) -> Arc<QueueState> {
        let mut queues = self.queues.lock().expect("broker lock poisoned");
        Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(QueueState::new())),
        )
    }

    fn existing_queue(&self, name: &str) -> Option<Arc<QueueState>> {
        let queues = self.queues.lock().expect("broker lock poisoned");
        queues.get(name).map(Arc::clone)
    }

    /// Pending message count, for test assertions.
    pub fn queue_depth(&self, name: &str) -> usize {
        self.existing_queue(name).map(|q| q.depth()).unwrap_or(0)
    }

    /// Delivered-but-unacknowledged count, for test assertions.
    pub fn unacked_count(&self, name: &str) -> usize {
        self.existing_queue(name)
            .map(|q| q.unacked_count())
            .unwrap_or(0)
    }
}

// ── Transport ─────────────────────────────────────────────────

struct MemoryState {
    connected: bool,
    declared: HashSet<String>,
}

/// [`BusTransport`] over a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            state: Mutex::new(MemoryState {
                connected: false,
                declared: HashSet::new(),
            }),
        }
    }

    fn require_connected(&self) -> Result<(), BusError> {
        let state = self.state.lock().expect("memory state lock poisoned");
        if state.connected {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().expect("memory state lock poisoned");
        state.connected = true;
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BusError> {
        self.require_connected()?;
        self.broker.queue(name);
        let mut state = self.state.lock().expect("memory state lock poisoned");
        state.declared.insert(name.to_string());
        Ok(())
    }

    async fn send(&self, queue: &str, payload: &str) -> Result<(), BusError> {
        self.require_connected()?;
        let queue = self
            .broker
            .existing_queue(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;
        queue.publish(payload.to_string());
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BusError> {
        self.require_connected()?;
        let queue = self
            .broker
            .existing_queue(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;
        let stream = futures::stream::unfold(queue, |queue| async move {
            let delivery = recv_from(&queue).await;
            Some((Ok::<_, BusError>(delivery), queue))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().expect("memory state lock poisoned");
        state.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state
            .lock()
            .expect("memory state lock poisoned")
            .connected
    }
}
