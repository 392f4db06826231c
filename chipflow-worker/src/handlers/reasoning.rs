//! Reasoning-class handler stand-ins.
//!
//! The concrete LLM gateway adapters behind `planner`, `implementation`,
//! `testbench`, `reflection`, `debug` and `spec_helper` are an out-of-scope
//! external collaborator. `MockReasoningHandler` implements the same
//! [`TaskHandler`] seam a real gateway-backed handler would, returning a
//! deterministic SUCCESS so the orchestrator's state machine and the rest
//! of the pipeline can be exercised end to end without one.

use async_trait::async_trait;
use chipflow_shared::contracts::{ResultStatus, Task, TaskKind, TaskResult};
use chrono::Utc;

use crate::handler::TaskHandler;

/// A reasoning-class handler that always succeeds, with a log line naming
/// which task kind it stood in for. One instance handles every reasoning
/// kind it's configured with; a real gateway-backed handler would likely
/// split these apart per kind.
#[derive(Debug)]
pub struct MockReasoningHandler {
    kinds: &'static [TaskKind],
}

impl MockReasoningHandler {
    /// A handler covering the full reasoning-class task set: planner,
    /// implementation, testbench, reflection, debug, spec-helper.
    pub fn full() -> Self {
        Self {
            kinds: &[
                TaskKind::Planner,
                TaskKind::Implementation,
                TaskKind::Testbench,
                TaskKind::Reflection,
                TaskKind::Debug,
                TaskKind::SpecHelper,
            ],
        }
    }

    pub fn for_kinds(kinds: &'static [TaskKind]) -> Self {
        Self { kinds }
    }
}

#[async_trait]
impl TaskHandler for MockReasoningHandler {
    fn handles(&self) -> &'static [TaskKind] {
        self.kinds
    }

    async fn handle(&self, task: &Task) -> anyhow::Result<TaskResult> {
        let node_id = task.context.get("node_id").and_then(|v| v.as_str()).unwrap_or("unknown");

        let mut result = TaskResult {
            task_id: task.task_id,
            correlation_id: task.correlation_id,
            completed_at: Utc::now(),
            status: ResultStatus::Success,
            artifacts_path: Some(format!("artifacts/{node_id}/{}.sv", task.task_type.stage())),
            log_output: format!("{:?} completed for {node_id}", task.task_type),
            reflections: None,
            reflection_insights: None,
            distilled_dataset: None,
            metrics: None,
        };

        if task.task_type == TaskKind::Reflection {
            result.reflection_insights = Some(serde_json::json!({
                "root_cause": "unspecified in mock reasoning handler",
                "suggested_fix": "none",
            }));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipflow_shared::contracts::Priority;
    use uuid::Uuid;

    #[tokio::test]
    async fn full_handler_covers_every_reasoning_kind() {
        let handler = MockReasoningHandler::full();
        for kind in [
            TaskKind::Planner,
            TaskKind::Implementation,
            TaskKind::Testbench,
            TaskKind::Reflection,
            TaskKind::Debug,
            TaskKind::SpecHelper,
        ] {
            assert!(crate::handler::handles(&handler, kind));
        }
    }

    #[tokio::test]
    async fn reflection_result_carries_insights() {
        let handler = MockReasoningHandler::full();
        let task = Task::new(
            Uuid::new_v4(),
            Priority::Medium,
            TaskKind::Reflection,
            serde_json::json!({"node_id": "and2"}),
            Utc::now(),
        );
        let result = handler.handle(&task).await.unwrap();
        assert!(result.reflection_insights.is_some());
    }
}
