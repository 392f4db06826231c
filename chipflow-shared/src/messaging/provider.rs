//! # Messaging Provider
//!
//! `MessagingProvider` is the seam between the worker loop / orchestrator
//! and the transport actually moving bytes. Like the upstream messaging
//! client this is modeled on, dispatch across providers is an enum match
//! rather than `Arc<dyn MessagingProvider>` — there are exactly two
//! implementations (AMQP, in-memory for tests) and neither needs vtable
//! indirection.

use std::time::Duration;

use async_trait::async_trait;

use crate::contracts::{Task, TaskResult};
use crate::error::MessagingError;
use crate::messaging::amqp::AmqpBroker;
use crate::messaging::delivery::Delivery;
use crate::messaging::in_memory::InMemoryBroker;

/// Operations every broker transport must support. Kept as a trait (rather
/// than inherent methods on the enum alone) so tests and call sites can
/// write generic helpers against it even though production code only ever
/// holds a [`BrokerProvider`].
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn publish_task(&self, task: &Task) -> Result<(), MessagingError>;
    async fn publish_result(&self, result: &TaskResult) -> Result<(), MessagingError>;
    async fn consume_one(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, MessagingError>;
    async fn ack(&self, delivery: Delivery) -> Result<(), MessagingError>;
    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), MessagingError>;
    async fn republish_with_retry(&self, delivery: &Delivery) -> Result<(), MessagingError>;
    async fn health_check(&self) -> Result<(), MessagingError>;
    /// Current message count of `queue`, via a passive queue declaration.
    /// Used by operational tooling (DLQ listing/draining) that needs a
    /// bound on how many messages to pull without racing a live producer.
    async fn queue_depth(&self, queue: &str) -> Result<u32, MessagingError>;
}

/// Enum dispatch over the two transports chipflow ships: a real AMQP broker
/// and an in-process double used by tests and by tooling that doesn't want
/// a live RabbitMQ.
#[derive(Debug, Clone)]
pub enum BrokerProvider {
    Amqp(AmqpBroker),
    InMemory(InMemoryBroker),
}

impl BrokerProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryBroker::new())
    }

    /// Borrow the in-memory transport, for tests that need to peek at
    /// queue depths. Returns `None` against a real AMQP broker.
    pub fn as_in_memory(&self) -> Option<&InMemoryBroker> {
        match self {
            Self::InMemory(broker) => Some(broker),
            Self::Amqp(_) => None,
        }
    }
}

#[async_trait]
impl MessagingProvider for BrokerProvider {
    async fn publish_task(&self, task: &Task) -> Result<(), MessagingError> {
        match self {
            Self::Amqp(broker) => broker.publish_task(task).await,
            Self::InMemory(broker) => broker.publish_task(task).await,
        }
    }

    async fn publish_result(&self, result: &TaskResult) -> Result<(), MessagingError> {
        match self {
            Self::Amqp(broker) => broker.publish_result(result).await,
            Self::InMemory(broker) => broker.publish_result(result).await,
        }
    }

    async fn consume_one(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, MessagingError> {
        match self {
            Self::Amqp(broker) => broker.consume_one(queue, timeout).await,
            Self::InMemory(broker) => broker.consume_one(queue, timeout).await,
        }
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), MessagingError> {
        match self {
            Self::Amqp(broker) => broker.ack(delivery).await,
            Self::InMemory(broker) => broker.ack(delivery).await,
        }
    }

    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), MessagingError> {
        match self {
            Self::Amqp(broker) => broker.nack(delivery, requeue).await,
            Self::InMemory(broker) => broker.nack(delivery, requeue).await,
        }
    }

    async fn republish_with_retry(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        match self {
            Self::Amqp(broker) => broker.republish_with_retry(delivery).await,
            Self::InMemory(broker) => broker.republish_with_retry(delivery).await,
        }
    }

    async fn health_check(&self) -> Result<(), MessagingError> {
        match self {
            Self::Amqp(broker) => broker.health_check().await,
            Self::InMemory(broker) => broker.health_check().await,
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<u32, MessagingError> {
        match self {
            Self::Amqp(broker) => broker.queue_depth(queue).await,
            Self::InMemory(broker) => Ok(broker.queue_len(queue) as u32),
        }
    }
}
