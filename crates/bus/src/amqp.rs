//! AMQP (RabbitMQ) transport backend.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use offerpipe_core::config::BusConfig;
use uuid::Uuid;

use crate::error::BusError;
use crate::transport::{BusTransport, Delivery, DeliveryAck, DeliveryStream};

struct AmqpState {
    connection: Connection,
    channel: Channel,
    declared: HashSet<String>,
}

/// Broker client over a single connection with one channel.
///
/// Publisher confirms are enabled so `send` only returns once the broker
/// has taken responsibility for the message. The consumer side runs with a
/// bounded prefetch, so an overwhelmed consumer pushes back on the broker
/// instead of buffering without limit.
pub struct AmqpTransport {
    uri: String,
    host: String,
    port: u16,
    prefetch: u16,
    state: Mutex<Option<AmqpState>>,
}

impl AmqpTransport {
    /// Capture connection settings. No I/O until [`BusTransport::connect`].
    pub fn new(config: &BusConfig) -> Self {
        Self {
            uri: config.amqp_uri(),
            host: config.host.clone(),
            port: config.port,
            prefetch: config.prefetch,
            state: Mutex::new(None),
        }
    }

    fn channel(&self) -> Result<Channel, BusError> {
        let guard = self.state.lock().expect("amqp state lock poisoned");
        match guard.as_ref() {
            Some(state) => Ok(state.channel.clone()),
            None => Err(BusError::NotConnected),
        }
    }
}

#[async_trait]
impl BusTransport for AmqpTransport {
    async fn connect(&self) -> Result<(), BusError> {
        if self.is_connected() {
            return Ok(());
        }

        tracing::debug!(host = %self.host, port = self.port, "connecting to broker");
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| {
                BusError::Connection(format!(
                    "failed to connect to {}:{}: {e}",
                    self.host, self.port
                ))
            })?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;
        tracing::info!(host = %self.host, port = self.port, "broker connection established");

        let mut guard = self.state.lock().expect("amqp state lock poisoned");
        *guard = Some(AmqpState {
            connection,
            channel,
            declared: HashSet::new(),
        });
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BusError> {
        {
            let guard = self.state.lock().expect("amqp state lock poisoned");
            match guard.as_ref() {
                Some(state) if state.declared.contains(name) => return Ok(()),
                Some(_) => {}
                None => return Err(BusError::NotConnected),
            }
        }

        let channel = self.channel()?;
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        tracing::debug!(queue = name, "queue declared");

        let mut guard = self.state.lock().expect("amqp state lock poisoned");
        if let Some(state) = guard.as_mut() {
            state.declared.insert(name.to_string());
        }
        Ok(())
    }

    async fn send(&self, queue: &str, payload: &str) -> Result<(), BusError> {
        let channel = self.channel()?;
        // delivery_mode 2 marks the message persistent on disk-backed queues.
        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?;
        confirm.await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BusError> {
        let channel = self.channel()?;
        let tag = format!("offerpipe-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        tracing::debug!(queue, consumer_tag = %tag, "consumer registered");

        let stream = consumer.map(|item| -> Result<Delivery, BusError> {
            let delivery = item?;
            let payload = String::from_utf8_lossy(&delivery.data).into_owned();
            let acker: Box<dyn DeliveryAck> = Box::new(AmqpAck {
                acker: delivery.acker,
            });
            Ok(Delivery::new(payload, acker))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), BusError> {
        let state = self
            .state
            .lock()
            .expect("amqp state lock poisoned")
            .take();
        match state {
            Some(state) => {
                state.connection.close(200, "shutting down").await?;
                tracing::info!(host = %self.host, port = self.port, "broker connection closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.state
            .lock()
            .expect("amqp state lock poisoned")
            .as_ref()
            .map(|state| state.connection.status().connected())
            .unwrap_or(false)
    }
}

struct AmqpAck {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl DeliveryAck for AmqpAck {
    async fn ack(&self) -> Result<(), BusError> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}
