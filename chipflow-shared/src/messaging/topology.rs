//! # Broker Topology
//!
//! The fixed exchange/queue/binding layout every chipflow deployment uses.
//! Unlike the upstream router this is modeled on, topology here is not
//! namespace-parameterized — there is exactly one set of names, shared by
//! every job.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};

use crate::contracts::{EntityClass, RESULTS_ROUTING_KEY};
use crate::error::MessagingError;

pub const TASKS_EXCHANGE: &str = "tasks_exchange";
pub const TASKS_DLX: &str = "tasks_dlx";

pub const AGENT_TASKS_QUEUE: &str = "agent_tasks";
pub const PROCESS_TASKS_QUEUE: &str = "process_tasks";
pub const SIMULATION_TASKS_QUEUE: &str = "simulation_tasks";
pub const RESULTS_QUEUE: &str = "results";
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";

/// The queue an [`EntityClass`] routes to.
pub fn queue_for_entity_class(entity_class: EntityClass) -> &'static str {
    match entity_class {
        EntityClass::Reasoning => AGENT_TASKS_QUEUE,
        EntityClass::LightDeterministic => PROCESS_TASKS_QUEUE,
        EntityClass::HeavyDeterministic => SIMULATION_TASKS_QUEUE,
    }
}

/// Declare the full exchange/queue/binding topology on an already-open
/// channel. Idempotent: safe to call on every process startup.
pub async fn declare_topology(channel: &Channel) -> Result<(), MessagingError> {
    channel
        .exchange_declare(
            TASKS_EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::topology_declaration(TASKS_EXCHANGE, e.to_string()))?;

    channel
        .exchange_declare(
            TASKS_DLX,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::topology_declaration(TASKS_DLX, e.to_string()))?;

    let mut dlx_args = FieldTable::default();
    dlx_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(TASKS_DLX.into()));

    for (queue, routing_key) in [
        (AGENT_TASKS_QUEUE, EntityClass::Reasoning.routing_key()),
        (PROCESS_TASKS_QUEUE, EntityClass::LightDeterministic.routing_key()),
        (SIMULATION_TASKS_QUEUE, EntityClass::HeavyDeterministic.routing_key()),
    ] {
        let mut args = dlx_args.clone();
        args.insert("x-max-priority".into(), AMQPValue::ShortShortUInt(3));

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| MessagingError::topology_declaration(queue, e.to_string()))?;

        channel
            .queue_bind(
                queue,
                TASKS_EXCHANGE,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::topology_declaration(queue, e.to_string()))?;
    }

    channel
        .queue_declare(
            RESULTS_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::topology_declaration(RESULTS_QUEUE, e.to_string()))?;

    channel
        .queue_bind(
            RESULTS_QUEUE,
            TASKS_EXCHANGE,
            RESULTS_ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::topology_declaration(RESULTS_QUEUE, e.to_string()))?;

    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            dlx_args,
        )
        .await
        .map_err(|e| MessagingError::topology_declaration(DEAD_LETTER_QUEUE, e.to_string()))?;

    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            TASKS_DLX,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::topology_declaration(DEAD_LETTER_QUEUE, e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_routing_matches_entity_class() {
        assert_eq!(queue_for_entity_class(EntityClass::Reasoning), AGENT_TASKS_QUEUE);
        assert_eq!(
            queue_for_entity_class(EntityClass::LightDeterministic),
            PROCESS_TASKS_QUEUE
        );
        assert_eq!(
            queue_for_entity_class(EntityClass::HeavyDeterministic),
            SIMULATION_TASKS_QUEUE
        );
    }
}
