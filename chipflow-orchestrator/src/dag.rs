//! # DAG
//!
//! The node graph a job runs against: dependency edges, readiness
//! detection, and failure cascade to dependents.

use std::collections::{HashMap, HashSet};

use chipflow_shared::error::OrchestrationError;
use serde::{Deserialize, Serialize};

use crate::state::NodeState;

/// One node in the job DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub deps: HashSet<String>,
    #[serde(skip, default = "default_state")]
    pub state: NodeState,
    #[serde(skip, default)]
    pub artifacts: HashMap<String, String>,
    #[serde(skip, default)]
    pub metrics: HashMap<String, serde_json::Value>,
}

fn default_state() -> NodeState {
    NodeState::Pending
}

/// The document shape a DAG is loaded from: a flat list of nodes.
#[derive(Debug, Clone, Deserialize)]
pub struct DagDocument {
    pub nodes: Vec<Node>,
}

/// A job's full node graph, plus the bookkeeping the scheduler needs:
/// which nodes are terminal, and which entered the failure chain via a
/// simulation failure specifically (the `REFLECTING`-success branch point).
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: HashMap<String, Node>,
    done_nodes: HashSet<String>,
    sim_failed_nodes: HashSet<String>,
}

impl Dag {
    pub fn from_document(document: DagDocument) -> Result<Self, OrchestrationError> {
        let mut nodes = HashMap::new();
        for node in document.nodes {
            nodes.insert(node.id.clone(), node);
        }

        for node in nodes.values() {
            for dep in &node.deps {
                if !nodes.contains_key(dep) {
                    return Err(OrchestrationError::MalformedDag {
                        reason: format!("node {:?} depends on unknown node {:?}", node.id, dep),
                    });
                }
            }
        }

        Ok(Self {
            nodes,
            done_nodes: HashSet::new(),
            sim_failed_nodes: HashSet::new(),
        })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn done_nodes(&self) -> &HashSet<String> {
        &self.done_nodes
    }

    pub fn is_sim_failed(&self, node_id: &str) -> bool {
        self.sim_failed_nodes.contains(node_id)
    }

    pub fn mark_sim_failed(&mut self, node_id: &str) {
        self.sim_failed_nodes.insert(node_id.to_string());
    }

    /// Whether every node has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.nodes.len() == self.done_nodes.len()
    }

    /// PENDING nodes whose dependencies are all already terminal, in a
    /// stable (sorted by id) order.
    pub fn ready_nodes(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .nodes
            .values()
            .filter(|node| node.state == NodeState::Pending && node.deps.is_subset(&self.done_nodes))
            .map(|node| node.id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Transition `node_id` to `to`, updating `done_nodes` when the new
    /// state is terminal.
    pub fn set_state(&mut self, node_id: &str, to: NodeState) -> Result<(), OrchestrationError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| OrchestrationError::MalformedDag {
                reason: format!("unknown node {node_id:?}"),
            })?;
        let from = node.state;
        crate::state::transition(node_id, from, to)?;
        node.state = to;
        if to.is_terminal() {
            self.done_nodes.insert(node_id.to_string());
        }
        Ok(())
    }

    /// Fail `node_id` and recursively fail every still-PENDING dependent,
    /// without publishing a task for any of them. Returns the ids that were
    /// cascaded (not including `node_id` itself).
    pub fn cascade_failure(&mut self, node_id: &str) -> Vec<String> {
        let mut cascaded = Vec::new();
        let mut frontier = vec![node_id.to_string()];

        while let Some(failed) = frontier.pop() {
            let dependents: Vec<String> = self
                .nodes
                .values()
                .filter(|node| node.state == NodeState::Pending && node.deps.contains(&failed))
                .map(|node| node.id.clone())
                .collect();

            for dependent in dependents {
                if let Some(node) = self.nodes.get_mut(&dependent) {
                    node.state = NodeState::Failed;
                }
                self.done_nodes.insert(dependent.clone());
                cascaded.push(dependent.clone());
                frontier.push(dependent);
            }
        }

        cascaded
    }
}
