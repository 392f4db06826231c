//! In-process broker double. Mirrors the fixed topology's routing rules
//! without a socket, so worker-loop and orchestrator tests run without a
//! live RabbitMQ — the same role the upstream stack's in-memory messaging
//! provider plays for its own test suite.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lapin::types::FieldTable;

use crate::contracts::{EntityClass, Task, TaskResult, RESULTS_ROUTING_KEY};
use crate::error::MessagingError;
use crate::messaging::delivery::{AckHandle, Delivery};
use crate::messaging::topology::{
    queue_for_entity_class, AGENT_TASKS_QUEUE, DEAD_LETTER_QUEUE, PROCESS_TASKS_QUEUE, RESULTS_QUEUE,
    SIMULATION_TASKS_QUEUE,
};
use crate::retry::next_retry_headers;

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    headers: Option<FieldTable>,
    routing_key: String,
    priority: Option<u8>,
}

#[derive(Debug, Default)]
struct Queues {
    by_name: HashMap<String, VecDeque<StoredMessage>>,
}

/// In-memory stand-in for [`super::amqp::AmqpBroker`]. Shares its state
/// across clones via an `Arc<Mutex<_>>`, matching the single-logical-broker
/// semantics a real connection provides.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    queues: Arc<Mutex<Queues>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(Queues::default())),
        }
    }

    fn queue_for_routing_key(routing_key: &str) -> &'static str {
        match routing_key {
            "REASONING" => AGENT_TASKS_QUEUE,
            "LIGHT_DETERMINISTIC" => PROCESS_TASKS_QUEUE,
            "HEAVY_DETERMINISTIC" => SIMULATION_TASKS_QUEUE,
            RESULTS_ROUTING_KEY => RESULTS_QUEUE,
            _ => DEAD_LETTER_QUEUE,
        }
    }

    fn push(&self, queue: &str, message: StoredMessage) {
        let mut queues = self.queues.lock().expect("in-memory broker mutex poisoned");
        queues.by_name.entry(queue.to_string()).or_default().push_back(message);
    }

    /// Number of messages currently sitting in `queue`. Test-only helper,
    /// not part of the [`MessagingProvider`](super::provider::MessagingProvider) contract.
    pub fn queue_len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().expect("in-memory broker mutex poisoned");
        queues.by_name.get(queue).map_or(0, VecDeque::len)
    }

    pub async fn publish_task(&self, task: &Task) -> Result<(), MessagingError> {
        let body = serde_json::to_vec(task)
            .map_err(|e| MessagingError::publish(task.entity_type.routing_key(), e.to_string()))?;
        self.push(
            queue_for_entity_class(task.entity_type),
            StoredMessage {
                body,
                headers: None,
                routing_key: task.entity_type.routing_key().to_string(),
                priority: Some(task.priority as u8),
            },
        );
        Ok(())
    }

    pub async fn publish_result(&self, result: &TaskResult) -> Result<(), MessagingError> {
        let body = serde_json::to_vec(result)
            .map_err(|e| MessagingError::publish(RESULTS_ROUTING_KEY, e.to_string()))?;
        self.push(
            RESULTS_QUEUE,
            StoredMessage {
                body,
                headers: None,
                routing_key: RESULTS_ROUTING_KEY.to_string(),
                priority: None,
            },
        );
        Ok(())
    }

    pub async fn consume_one(&self, queue: &str, _timeout: Duration) -> Result<Option<Delivery>, MessagingError> {
        let popped = {
            let mut queues = self.queues.lock().expect("in-memory broker mutex poisoned");
            queues.by_name.entry(queue.to_string()).or_default().pop_front()
        };

        Ok(popped.map(|message| Delivery {
            body: message.body,
            headers: message.headers,
            routing_key: message.routing_key,
            priority: message.priority,
            ack_handle: AckHandle::InMemory {
                queue: queue.to_string(),
                id: 0,
            },
        }))
    }

    pub async fn ack(&self, _delivery: Delivery) -> Result<(), MessagingError> {
        // The message was already removed from its queue in `consume_one`;
        // acking an in-memory delivery is a no-op.
        Ok(())
    }

    pub async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), MessagingError> {
        let target = if requeue {
            match &delivery.ack_handle {
                AckHandle::InMemory { queue, .. } => queue.clone(),
                AckHandle::Amqp(_) => {
                    return Err(MessagingError::Ack {
                        reason: "amqp delivery nacked against the in-memory broker".to_string(),
                    })
                }
            }
        } else {
            DEAD_LETTER_QUEUE.to_string()
        };

        self.push(
            &target,
            StoredMessage {
                body: delivery.body,
                headers: delivery.headers,
                routing_key: delivery.routing_key,
                priority: delivery.priority,
            },
        );
        Ok(())
    }

    pub async fn republish_with_retry(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        let headers = next_retry_headers(delivery.headers.as_ref());
        self.push(
            Self::queue_for_routing_key(&delivery.routing_key),
            StoredMessage {
                body: delivery.body.clone(),
                headers: Some(headers),
                routing_key: delivery.routing_key.clone(),
                priority: delivery.priority,
            },
        );
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), MessagingError> {
        Ok(())
    }
}
