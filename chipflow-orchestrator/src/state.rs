//! # Node Lifecycle
//!
//! The ten-state machine every DAG node advances through, and the fixed
//! transition table an [`Node::transition`] call is checked against.

use chipflow_shared::error::OrchestrationError;
use serde::{Deserialize, Serialize};

/// A DAG node's lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Pending,
    Implementing,
    Linting,
    Testbenching,
    Simulating,
    Distilling,
    Reflecting,
    Debugging,
    Done,
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The state this node moves to when its current stage succeeds, or
    /// `None` for the two terminal states (nothing follows them) and for
    /// `Debugging`, whose own status never determines the outcome — see
    /// [`Self::failure_transition`].
    pub fn success_transition(self) -> Option<NodeState> {
        match self {
            Self::Pending => Some(Self::Implementing),
            Self::Implementing => Some(Self::Linting),
            Self::Linting => Some(Self::Testbenching),
            Self::Testbenching => Some(Self::Simulating),
            Self::Simulating => Some(Self::Done),
            Self::Distilling => Some(Self::Reflecting),
            // Reflecting's success edge branches on whether the node is in
            // the sim-failure continuation; the engine resolves that before
            // calling transition, so the table only names the non-terminal
            // branch here.
            Self::Reflecting => Some(Self::Debugging),
            Self::Debugging | Self::Done | Self::Failed => None,
        }
    }

    /// The state this node moves to when its current stage fails. `None`
    /// for `Pending` (a node that hasn't started anything yet can't fail)
    /// and the two terminal states.
    pub fn failure_transition(self) -> Option<NodeState> {
        match self {
            Self::Pending => None,
            Self::Implementing | Self::Linting | Self::Testbenching => Some(Self::Failed),
            // Simulating's failure edge is the sole case where failure
            // advances the node rather than terminating it.
            Self::Simulating => Some(Self::Distilling),
            Self::Distilling | Self::Reflecting => Some(Self::Failed),
            // Debugging always ends FAILED, regardless of its own verdict.
            Self::Debugging => Some(Self::Failed),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Implementing => "IMPLEMENTING",
            Self::Linting => "LINTING",
            Self::Testbenching => "TESTBENCHING",
            Self::Simulating => "SIMULATING",
            Self::Distilling => "DISTILLING",
            Self::Reflecting => "REFLECTING",
            Self::Debugging => "DEBUGGING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

/// Attempt a transition, raising [`OrchestrationError::IllegalTransition`]
/// if `to` is neither `from`'s success nor failure edge.
pub fn transition(node_id: &str, from: NodeState, to: NodeState) -> Result<NodeState, OrchestrationError> {
    if from.success_transition() == Some(to) || from.failure_transition() == Some(to) {
        Ok(to)
    } else {
        Err(OrchestrationError::IllegalTransition {
            node_id: node_id.to_string(),
            from: from.name().to_string(),
            to: to.name().to_string(),
        })
    }
}
