//! # Error Types
//!
//! Domain errors a handler or broker provider can raise. Mirrors the split
//! the rest of the messaging stack uses: `thiserror` enums with named
//! constructors for the library surface, `anyhow` only at binary edges.

use thiserror::Error;

/// Raised by a handler (or detected post hoc from an exception message) when
/// a failure is believed transient and worth a bounded retry: network
/// blips, subprocess timeouts, momentary resource exhaustion.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RetryableError(pub String);

impl RetryableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Raised by a handler when the task's own input is unworkable: malformed
/// context, a missing required field, a path that cannot exist. Never
/// retried — goes straight to the dead letter queue.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskInputError(pub String);

impl TaskInputError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors surfaced by the broker/messaging layer (topology setup, publish,
/// consume, (n)ack). Named constructors mirror the upstream messaging
/// error's `connection`/`queue_creation`-style helpers.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("broker connection failed: {reason}")]
    Connection { reason: String },

    #[error("failed to declare topology ({what}): {reason}")]
    TopologyDeclaration { what: String, reason: String },

    #[error("failed to publish to {routing_key}: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("failed to consume from {queue}: {reason}")]
    Consume { queue: String, reason: String },

    #[error("failed to acknowledge delivery: {reason}")]
    Ack { reason: String },

    #[error("message payload could not be decoded: {reason}")]
    Decode { reason: String },

    #[error("invalid queue name {name:?}: {reason}")]
    InvalidQueueName { name: String, reason: String },
}

impl MessagingError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    pub fn topology_declaration(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TopologyDeclaration {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn publish(routing_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Publish {
            routing_key: routing_key.into(),
            reason: reason.into(),
        }
    }

    pub fn consume(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Consume {
            queue: queue.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the orchestrator's own bookkeeping (DAG loading,
/// state-machine transitions, task memory I/O).
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("dag is malformed: {reason}")]
    MalformedDag { reason: String },

    #[error(
        "illegal transition for node {node_id:?}: {from:?} has no edge to {to:?}"
    )]
    IllegalTransition {
        node_id: String,
        from: String,
        to: String,
    },

    #[error("design context missing entry for node {node_id:?}")]
    MissingDesignContext { node_id: String },

    #[error("task memory write failed for {node_id}/{stage}: {reason}")]
    TaskMemory {
        node_id: String,
        stage: String,
        reason: String,
    },

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}
