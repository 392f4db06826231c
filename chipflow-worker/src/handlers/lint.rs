//! Deterministic lint handler.
//!
//! The real toolchain invocation (verilator or equivalent) is an external
//! collaborator this core doesn't own; grounded in the upstream lint
//! worker's own fallback, this handler does a cheap structural check of the
//! RTL source (presence of a `module`/`endmodule` pair) so the rest of the
//! pipeline has a real SUCCESS/FAILURE signal to drive off of without a
//! toolchain dependency.

use async_trait::async_trait;
use chipflow_shared::contracts::{ResultStatus, Task, TaskKind, TaskResult};
use chipflow_shared::error::TaskInputError;
use chrono::Utc;

use crate::handler::TaskHandler;

#[derive(Debug, Default)]
pub struct LintHandler;

#[async_trait]
impl TaskHandler for LintHandler {
    fn handles(&self) -> &'static [TaskKind] {
        &[TaskKind::Linter]
    }

    async fn handle(&self, task: &Task) -> anyhow::Result<TaskResult> {
        let rtl_path = task
            .context
            .get("rtl_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskInputError::new("context missing rtl_path"))?;

        let source = tokio::fs::read_to_string(rtl_path)
            .await
            .map_err(|e| TaskInputError::new(format!("cannot read {rtl_path}: {e}")))?;

        let well_formed = source.contains("module") && source.contains("endmodule");

        Ok(TaskResult {
            task_id: task.task_id,
            correlation_id: task.correlation_id,
            completed_at: Utc::now(),
            status: if well_formed {
                ResultStatus::Success
            } else {
                ResultStatus::Failure
            },
            artifacts_path: Some(rtl_path.to_string()),
            log_output: if well_formed {
                format!("lint: {rtl_path} contains a complete module definition")
            } else {
                format!("lint: {rtl_path} is missing a module/endmodule pair")
            },
            reflections: None,
            reflection_insights: None,
            distilled_dataset: None,
            metrics: None,
        })
    }
}
