//! # Design Context & Context Builder
//!
//! [`DesignContext`] is the job-scoped, immutable per-node record the
//! planner produces once; [`ContextBuilder`] assembles the `context` field
//! of each [`Task`](crate::contracts::Task) the orchestrator publishes from
//! it, adding stage-specific material (a prior failure's log excerpt, prior
//! reflection insights) where the stage calls for it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::OrchestrationError;

/// One node's immutable design record, produced once by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDesignContext {
    pub rtl_path: String,
    pub tb_path: String,
    #[serde(default)]
    pub interface: Vec<String>,
    pub clocking: String,
    #[serde(default)]
    pub coverage_goals: Vec<String>,
    #[serde(default)]
    pub library_refs: Vec<String>,
    #[serde(default)]
    pub behavior_note: String,
    #[serde(default)]
    pub verification: String,
    #[serde(default)]
    pub acceptance: String,
}

/// Job-scoped map from node-id to its design record, loaded once at
/// startup from the design-context document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesignContext {
    #[serde(flatten)]
    pub nodes: HashMap<String, NodeDesignContext>,
}

impl DesignContext {
    pub fn get(&self, node_id: &str) -> Result<&NodeDesignContext, OrchestrationError> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| OrchestrationError::MissingDesignContext {
                node_id: node_id.to_string(),
            })
    }
}

/// Extra material folded into a task's context on top of the node's base
/// design record, depending on which stage is being published.
#[derive(Debug, Clone, Default)]
pub struct StageAddendum {
    pub failure_log_excerpt: Option<String>,
    pub failure_log_path: Option<String>,
    pub reflection_insights: Option<Value>,
}

/// Builds per-task context payloads from a [`DesignContext`]. Read-only:
/// never mutates the design context it was built with.
#[derive(Debug)]
pub struct ContextBuilder {
    design_context: DesignContext,
}

impl ContextBuilder {
    pub fn new(design_context: DesignContext) -> Self {
        Self { design_context }
    }

    /// Assemble the JSON context for `node_id` at `stage`, folding in
    /// `addendum` when the stage calls for it (distill gets the failure
    /// log, debug gets reflection insights).
    pub fn build(
        &self,
        node_id: &str,
        stage: &str,
        addendum: &StageAddendum,
    ) -> Result<Value, OrchestrationError> {
        let record = self.design_context.get(node_id)?;

        let mut context = json!({
            "node_id": node_id,
            "stage": stage,
            "interface": record.interface,
            "rtl_path": record.rtl_path,
            "tb_path": record.tb_path,
            "design_context_hash": design_context_hash(record),
            "coverage_goals": record.coverage_goals,
            "clocking": record.clocking,
            "library_refs": record.library_refs,
            "behavior_note": record.behavior_note,
            "verification": record.verification,
            "acceptance": record.acceptance,
        });

        let object = context
            .as_object_mut()
            .expect("context is constructed as a JSON object above");

        if let Some(excerpt) = &addendum.failure_log_excerpt {
            object.insert("failure_log_excerpt".to_string(), json!(excerpt));
        }
        if let Some(path) = &addendum.failure_log_path {
            object.insert("failure_log_path".to_string(), json!(path));
        }
        if let Some(insights) = &addendum.reflection_insights {
            object.insert("reflection_insights".to_string(), insights.clone());
        }

        Ok(context)
    }
}

/// A stable, cheap fingerprint of a node's design record, so downstream
/// handlers can detect whether the context they were given drifted from a
/// prior stage's.
fn design_context_hash(record: &NodeDesignContext) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    record.rtl_path.hash(&mut hasher);
    record.tb_path.hash(&mut hasher);
    record.clocking.hash(&mut hasher);
    record.interface.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> DesignContext {
        let mut nodes = HashMap::new();
        nodes.insert(
            "and2".to_string(),
            NodeDesignContext {
                rtl_path: "rtl/and2.sv".to_string(),
                tb_path: "tb/and2_tb.sv".to_string(),
                interface: vec!["a".to_string(), "b".to_string(), "y".to_string()],
                clocking: "combinational".to_string(),
                coverage_goals: vec!["all input combinations".to_string()],
                library_refs: vec![],
                behavior_note: "two-input AND gate".to_string(),
                verification: "exhaustive truth table".to_string(),
                acceptance: "100% toggle coverage".to_string(),
            },
        );
        DesignContext { nodes }
    }

    #[test]
    fn builds_base_context_without_addendum() {
        let builder = ContextBuilder::new(sample_context());
        let context = builder.build("and2", "impl", &StageAddendum::default()).unwrap();
        assert_eq!(context["node_id"], "and2");
        assert_eq!(context["rtl_path"], "rtl/and2.sv");
        assert!(context.get("failure_log_excerpt").is_none());
    }

    #[test]
    fn distill_stage_carries_failure_log() {
        let builder = ContextBuilder::new(sample_context());
        let addendum = StageAddendum {
            failure_log_excerpt: Some("assertion failed at t=40ns".to_string()),
            failure_log_path: Some("and2/sim/log.txt".to_string()),
            reflection_insights: None,
        };
        let context = builder.build("and2", "distill", &addendum).unwrap();
        assert_eq!(context["failure_log_excerpt"], "assertion failed at t=40ns");
        assert_eq!(context["failure_log_path"], "and2/sim/log.txt");
    }

    #[test]
    fn missing_node_is_an_error() {
        let builder = ContextBuilder::new(DesignContext::default());
        let result = builder.build("missing", "impl", &StageAddendum::default());
        assert!(result.is_err());
    }
}
