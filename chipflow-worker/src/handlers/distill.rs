//! Deterministic log-distillation handler.
//!
//! Runs after a simulation failure. Turns the raw failure log excerpt the
//! orchestrator's context builder attached into a small structured dataset
//! a reflection stage can reason over.

use async_trait::async_trait;
use chipflow_shared::contracts::{ResultStatus, Task, TaskKind, TaskResult};
use chipflow_shared::error::TaskInputError;
use chrono::Utc;

use crate::handler::TaskHandler;

#[derive(Debug, Default)]
pub struct DistillHandler;

#[async_trait]
impl TaskHandler for DistillHandler {
    fn handles(&self) -> &'static [TaskKind] {
        &[TaskKind::Distillation]
    }

    async fn handle(&self, task: &Task) -> anyhow::Result<TaskResult> {
        let excerpt = task
            .context
            .get("failure_log_excerpt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskInputError::new("context missing failure_log_excerpt"))?;

        let distilled = serde_json::json!({
            "failure_summary": excerpt.lines().next().unwrap_or(excerpt),
            "line_count": excerpt.lines().count(),
        });

        Ok(TaskResult {
            task_id: task.task_id,
            correlation_id: task.correlation_id,
            completed_at: Utc::now(),
            status: ResultStatus::Success,
            artifacts_path: None,
            log_output: format!("distilled {} log line(s)", excerpt.lines().count()),
            reflections: None,
            reflection_insights: None,
            distilled_dataset: Some(distilled),
            metrics: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipflow_shared::contracts::Priority;
    use uuid::Uuid;

    #[tokio::test]
    async fn distills_failure_log_into_summary() {
        let task = Task::new(
            Uuid::new_v4(),
            Priority::Medium,
            TaskKind::Distillation,
            serde_json::json!({"failure_log_excerpt": "assertion failed at t=40ns\nexpected 1 got 0"}),
            Utc::now(),
        );

        let handler = DistillHandler;
        let result = handler.handle(&task).await.unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        let dataset = result.distilled_dataset.unwrap();
        assert_eq!(dataset["failure_summary"], "assertion failed at t=40ns");
        assert_eq!(dataset["line_count"], 2);
    }
}
