pub mod correlation;
pub mod dag;
pub mod engine;
pub mod state;

pub use correlation::CorrelationTable;
pub use dag::{Dag, DagDocument, Node};
pub use engine::{Orchestrator, OrchestratorConfig, RunSummary};
pub use state::NodeState;
