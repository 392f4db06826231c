//! # Message Contracts
//!
//! Wire types exchanged between the orchestrator and worker fleet: the
//! [`Task`] published to a worker-class queue and the [`TaskResult`]
//! published back to the shared results queue. Both are plain serde types;
//! nothing here talks to a broker or a filesystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Routing dimension for a [`Task`]. Determines which worker-class queue a
/// task lands on (`agent_tasks`, `process_tasks`, `simulation_tasks`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    /// Language-model-backed executors: planner, implementation, testbench,
    /// reflection, debug, spec-helper.
    #[serde(rename = "REASONING")]
    Reasoning,
    /// Cheap deterministic executors: lint, log-distillation.
    #[serde(rename = "LIGHT_DETERMINISTIC")]
    LightDeterministic,
    /// Expensive deterministic executors: simulation.
    #[serde(rename = "HEAVY_DETERMINISTIC")]
    HeavyDeterministic,
}

impl EntityClass {
    /// The AMQP routing key this class is published under.
    pub fn routing_key(self) -> &'static str {
        match self {
            Self::Reasoning => "REASONING",
            Self::LightDeterministic => "LIGHT_DETERMINISTIC",
            Self::HeavyDeterministic => "HEAVY_DETERMINISTIC",
        }
    }
}

/// Reserved routing key for the shared results queue. Not a variant of
/// [`EntityClass`] because it never selects a worker-class queue.
pub const RESULTS_ROUTING_KEY: &str = "RESULTS";

/// Handler-selection dimension within an [`EntityClass`].
///
/// New handlers are added here, not by subclassing a handler trait at
/// runtime — dispatch stays an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Planner,
    Implementation,
    Linter,
    Testbench,
    Simulator,
    Distillation,
    Reflection,
    Debug,
    SpecHelper,
}

impl TaskKind {
    /// The stage name this task kind corresponds to in the node lifecycle.
    pub fn stage(self) -> &'static str {
        match self {
            Self::Planner => "plan",
            Self::Implementation => "impl",
            Self::Linter => "lint",
            Self::Testbench => "tb",
            Self::Simulator => "sim",
            Self::Distillation => "distill",
            Self::Reflection => "reflect",
            Self::Debug => "debug",
            Self::SpecHelper => "spec_helper",
        }
    }

    /// The entity class this kind is dispatched through.
    pub fn entity_class(self) -> EntityClass {
        match self {
            Self::Planner
            | Self::Implementation
            | Self::Testbench
            | Self::Reflection
            | Self::Debug
            | Self::SpecHelper => EntityClass::Reasoning,
            Self::Linter | Self::Distillation => EntityClass::LightDeterministic,
            Self::Simulator => EntityClass::HeavyDeterministic,
        }
    }
}

/// Priority tier carried by a [`Task`]. Serializes as its declared integer
/// value (1/2/3), matching the AMQP message `priority` property range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Serialize for Priority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            other => Err(serde::de::Error::custom(format!(
                "priority must be 1, 2 or 3, got {other}"
            ))),
        }
    }
}

/// Outcome reported by a [`TaskResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "ESCALATED_TO_HUMAN")]
    EscalatedToHuman,
}

impl ResultStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Token/cost accounting for a single task invocation, when the handler
/// reports it. Optional on the wire; absent for deterministic handlers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// A unit of work published by the orchestrator (or a bootstrap caller) and
/// consumed by exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    pub entity_type: EntityClass,
    pub task_type: TaskKind,
    /// Free-form payload: node-id, artifact paths, interface signals,
    /// coverage goals, and on failure-continuation stages the preceding
    /// failure's log excerpt/path and reflection insights.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl Task {
    /// Build a task for a fresh stage, deriving the entity class from the
    /// task kind and stamping the creation time.
    pub fn new(
        correlation_id: Uuid,
        priority: Priority,
        task_type: TaskKind,
        context: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            correlation_id,
            created_at: now,
            priority,
            entity_type: task_type.entity_class(),
            task_type,
            context,
        }
    }
}

/// The outcome of running a [`Task`], published back to the results queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub correlation_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_path: Option<String>,
    #[serde(default)]
    pub log_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflections: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_insights: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distilled_dataset: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl TaskResult {
    /// Build a `FAILURE` result carrying only a log message, used when a
    /// worker loop catches an otherwise-unclassified handler exception.
    pub fn failure(task_id: Uuid, correlation_id: Uuid, log_output: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            correlation_id,
            completed_at: now,
            status: ResultStatus::Failure,
            artifacts_path: None,
            log_output: log_output.into(),
            reflections: None,
            reflection_insights: None,
            distilled_dataset: None,
            metrics: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_class_routing_key_matches_wire_contract() {
        assert_eq!(EntityClass::Reasoning.routing_key(), "REASONING");
        assert_eq!(
            EntityClass::LightDeterministic.routing_key(),
            "LIGHT_DETERMINISTIC"
        );
        assert_eq!(
            EntityClass::HeavyDeterministic.routing_key(),
            "HEAVY_DETERMINISTIC"
        );
    }

    #[test]
    fn task_kind_entity_class_mapping() {
        assert_eq!(TaskKind::Simulator.entity_class(), EntityClass::HeavyDeterministic);
        assert_eq!(TaskKind::Linter.entity_class(), EntityClass::LightDeterministic);
        assert_eq!(TaskKind::Distillation.entity_class(), EntityClass::LightDeterministic);
        assert_eq!(TaskKind::Debug.entity_class(), EntityClass::Reasoning);
    }

    #[test]
    fn priority_serializes_as_integer() {
        let json = serde_json::to_value(Priority::High).unwrap();
        assert_eq!(json, serde_json::json!(3));
        let back: Priority = serde_json::from_value(serde_json::json!(1)).unwrap();
        assert_eq!(back, Priority::Low);
    }

    #[test]
    fn task_round_trips_through_json() {
        let task = Task::new(
            Uuid::new_v4(),
            Priority::Medium,
            TaskKind::Linter,
            serde_json::json!({"node_id": "and2"}),
            Utc::now(),
        );
        let encoded = serde_json::to_vec(&task).unwrap();
        let decoded: Task = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.task_id, task.task_id);
        assert_eq!(decoded.entity_type, EntityClass::LightDeterministic);
    }

    #[test]
    fn task_decode_tolerates_unknown_fields() {
        let raw = serde_json::json!({
            "task_id": Uuid::new_v4(),
            "correlation_id": Uuid::new_v4(),
            "created_at": Utc::now(),
            "priority": 2,
            "entity_type": "REASONING",
            "task_type": "planner",
            "context": {},
            "future_field_from_a_newer_producer": "ignored",
        });
        let decoded: Task = serde_json::from_value(raw).unwrap();
        assert_eq!(decoded.task_type, TaskKind::Planner);
    }

    #[test]
    fn result_status_serializes_as_upper_snake() {
        let json = serde_json::to_value(ResultStatus::EscalatedToHuman).unwrap();
        assert_eq!(json, serde_json::json!("ESCALATED_TO_HUMAN"));
    }

    #[test]
    fn failure_result_omits_optional_fields_on_wire() {
        let result = TaskResult::failure(Uuid::new_v4(), Uuid::new_v4(), "boom", Utc::now());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("artifacts_path").is_none());
        assert!(json.get("metrics").is_none());
    }
}
