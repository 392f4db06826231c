//! # Task Memory
//!
//! Append-only filesystem record of what happened at each (node, stage):
//! `<root>/<node-id>/<stage>/{log.txt, artifact_path.txt,
//! reflection_insights.json, reflections.json}`. Written only by the
//! orchestrator; never read back on the transport path.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::OrchestrationError;

/// Owns the task-memory root and writes stage records beneath it,
/// auto-creating directories as needed.
#[derive(Debug, Clone)]
pub struct TaskMemory {
    root: PathBuf,
}

impl TaskMemory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn stage_dir(&self, node_id: &str, stage: &str) -> PathBuf {
        self.root.join(node_id).join(stage)
    }

    async fn ensure_stage_dir(&self, node_id: &str, stage: &str) -> Result<PathBuf, OrchestrationError> {
        let dir = self.stage_dir(node_id, stage);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(node_id, stage, e))?;
        Ok(dir)
    }

    /// Append `log` to `<node-id>/<stage>/log.txt`.
    pub async fn record_log(&self, node_id: &str, stage: &str, log: &str) -> Result<(), OrchestrationError> {
        let dir = self.ensure_stage_dir(node_id, stage).await?;
        append(&dir.join("log.txt"), log)
            .await
            .map_err(|e| io_err(node_id, stage, e))
    }

    /// Write `<node-id>/<stage>/artifact_path.txt`.
    pub async fn record_artifact_path(
        &self,
        node_id: &str,
        stage: &str,
        artifact_path: &str,
    ) -> Result<(), OrchestrationError> {
        let dir = self.ensure_stage_dir(node_id, stage).await?;
        fs::write(dir.join("artifact_path.txt"), artifact_path)
            .await
            .map_err(|e| io_err(node_id, stage, e))
    }

    /// Serialize `payload` to `<node-id>/<stage>/<filename>`, used for both
    /// `reflection_insights.json` and `reflections.json`.
    pub async fn record_json<T: Serialize + Sync>(
        &self,
        node_id: &str,
        stage: &str,
        filename: &str,
        payload: &T,
    ) -> Result<(), OrchestrationError> {
        let dir = self.ensure_stage_dir(node_id, stage).await?;
        let body = serde_json::to_vec_pretty(payload).map_err(|e| OrchestrationError::TaskMemory {
            node_id: node_id.to_string(),
            stage: stage.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(dir.join(filename), body)
            .await
            .map_err(|e| io_err(node_id, stage, e))
    }

    /// Path the orchestrator hands to downstream handlers as
    /// `failure_log_path` — a path into task memory, not into the
    /// artifact root.
    pub fn log_path(&self, node_id: &str, stage: &str) -> PathBuf {
        self.stage_dir(node_id, stage).join("log.txt")
    }
}

async fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        file.write_all(b"\n").await?;
    }
    Ok(())
}

fn io_err(node_id: &str, stage: &str, err: std::io::Error) -> OrchestrationError {
    OrchestrationError::TaskMemory {
        node_id: node_id.to_string(),
        stage: stage.to_string(),
        reason: err.to_string(),
    }
}
