//! AMQP 0-9-1 broker transport, backed by `lapin`.

use std::sync::Arc;
use std::time::Duration;

use lapin::{
    options::{BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};

use crate::contracts::{Task, TaskResult, RESULTS_ROUTING_KEY};
use crate::error::MessagingError;
use crate::messaging::delivery::{AckHandle, Delivery};
use crate::messaging::topology::{self, TASKS_EXCHANGE};
use crate::retry::next_retry_headers;

/// An open AMQP connection and channel, with topology already declared.
///
/// Cheap to clone: both `Connection` and `Channel` are `Arc`-backed inside
/// `lapin`, so every clone shares the same underlying socket.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    _connection: Arc<Connection>,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect, open a channel, declare the full topology, and set
    /// single-message prefetch (every consumer in this system reads one
    /// message at a time).
    pub async fn connect(broker_url: &str) -> Result<Self, MessagingError> {
        let connection = Connection::connect(broker_url, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;

        topology::declare_topology(&channel).await?;

        Ok(Self {
            _connection: Arc::new(connection),
            channel,
        })
    }

    async fn publish(
        &self,
        routing_key: &str,
        body: &[u8],
        headers: FieldTable,
        priority: Option<u8>,
    ) -> Result<(), MessagingError> {
        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_headers(headers);
        if let Some(priority) = priority {
            properties = properties.with_priority(priority);
        }

        self.channel
            .basic_publish(
                TASKS_EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| MessagingError::publish(routing_key, e.to_string()))?
            .await
            .map_err(|e| MessagingError::publish(routing_key, e.to_string()))?;

        Ok(())
    }

    pub async fn publish_task(&self, task: &Task) -> Result<(), MessagingError> {
        let body = serde_json::to_vec(task)
            .map_err(|e| MessagingError::publish(task.entity_type.routing_key(), e.to_string()))?;
        self.publish(
            task.entity_type.routing_key(),
            &body,
            FieldTable::default(),
            Some(task.priority as u8),
        )
        .await
    }

    pub async fn publish_result(&self, result: &TaskResult) -> Result<(), MessagingError> {
        let body = serde_json::to_vec(result)
            .map_err(|e| MessagingError::publish(RESULTS_ROUTING_KEY, e.to_string()))?;
        self.publish(RESULTS_ROUTING_KEY, &body, FieldTable::default(), None)
            .await
    }

    pub async fn consume_one(&self, queue: &str, _timeout: Duration) -> Result<Option<Delivery>, MessagingError> {
        let got = self
            .channel
            .basic_get(queue, BasicGetOptions::default())
            .await
            .map_err(|e| MessagingError::consume(queue, e.to_string()))?;

        Ok(got.map(|delivery| Delivery {
            body: delivery.data.clone(),
            headers: delivery.properties.headers().clone(),
            routing_key: delivery.routing_key.to_string(),
            priority: *delivery.properties.priority(),
            ack_handle: AckHandle::Amqp(Box::new(delivery)),
        }))
    }

    pub async fn ack(&self, delivery: Delivery) -> Result<(), MessagingError> {
        match delivery.ack_handle {
            AckHandle::Amqp(inner) => inner
                .acker
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| MessagingError::Ack { reason: e.to_string() }),
            AckHandle::InMemory { .. } => Err(MessagingError::Ack {
                reason: "in-memory delivery acked against the amqp broker".to_string(),
            }),
        }
    }

    pub async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), MessagingError> {
        match delivery.ack_handle {
            AckHandle::Amqp(inner) => inner
                .acker
                .nack(BasicNackOptions {
                    requeue,
                    ..Default::default()
                })
                .await
                .map_err(|e| MessagingError::Ack { reason: e.to_string() }),
            AckHandle::InMemory { .. } => Err(MessagingError::Ack {
                reason: "in-memory delivery nacked against the amqp broker".to_string(),
            }),
        }
    }

    /// Republish the original body under the same routing key with an
    /// incremented `x-retry-count` header. The caller acks the original
    /// delivery separately once this succeeds.
    pub async fn republish_with_retry(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        let headers = next_retry_headers(delivery.headers.as_ref());
        self.publish(&delivery.routing_key, &delivery.body, headers, delivery.priority).await
    }

    pub async fn health_check(&self) -> Result<(), MessagingError> {
        if self.channel.status().connected() {
            Ok(())
        } else {
            Err(MessagingError::connection("channel is not connected"))
        }
    }

    /// A passive queue declaration, which fails instead of creating the
    /// queue if it doesn't already exist, returning the broker's own count
    /// of ready messages.
    pub async fn queue_depth(&self, queue: &str) -> Result<u32, MessagingError> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                lapin::options::QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology_declaration(queue, e.to_string()))?;
        Ok(declared.message_count())
    }
}
