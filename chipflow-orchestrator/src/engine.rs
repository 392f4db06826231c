//! # Orchestrator Engine
//!
//! The per-job driver: publishes one task at a time per stage, correlates
//! asynchronous results back to (node, stage), cascades failures to
//! dependents, and enforces the success/failure branching that chains
//! failed simulations into distill → reflect → debug.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chipflow_shared::contracts::{Priority, Task, TaskKind, TaskResult};
use chipflow_shared::design_context::{ContextBuilder, DesignContext, StageAddendum};
use chipflow_shared::error::OrchestrationError;
use chipflow_shared::messaging::{topology, BrokerProvider, MessagingProvider};
use chipflow_shared::task_memory::TaskMemory;
use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::correlation::CorrelationTable;
use crate::dag::{Dag, DagDocument};
use crate::state::NodeState;

/// The stage task kind a node runs once it enters `state`. `None` for
/// `Pending` (nothing is published until a node becomes ready) and the two
/// terminal states.
fn task_kind_for_state(state: NodeState) -> Option<TaskKind> {
    match state {
        NodeState::Implementing => Some(TaskKind::Implementation),
        NodeState::Linting => Some(TaskKind::Linter),
        NodeState::Testbenching => Some(TaskKind::Testbench),
        NodeState::Simulating => Some(TaskKind::Simulator),
        NodeState::Distilling => Some(TaskKind::Distillation),
        NodeState::Reflecting => Some(TaskKind::Reflection),
        NodeState::Debugging => Some(TaskKind::Debug),
        NodeState::Pending | NodeState::Done | NodeState::Failed => None,
    }
}

/// First 20 lines of a log, attached to a distill task's context.
fn excerpt(log: &str) -> String {
    log.lines().take(20).collect::<Vec<_>>().join("\n")
}

/// Outcome of one [`Orchestrator::run`] call.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub done_nodes: Vec<String>,
    pub failed_nodes: Vec<String>,
    pub timed_out: bool,
}

/// Tunables controlling how aggressively the run loop polls and how long it
/// waits before giving up on a run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub run_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            run_timeout: Duration::from_secs(120),
        }
    }
}

/// Drives a single job's DAG to completion (or timeout) over the broker.
#[derive(Debug)]
pub struct Orchestrator {
    broker: BrokerProvider,
    dag: Dag,
    context_builder: ContextBuilder,
    task_memory: TaskMemory,
    correlation: CorrelationTable,
    correlation_ids: HashMap<String, Uuid>,
    config: OrchestratorConfig,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        broker: BrokerProvider,
        dag_document: DagDocument,
        design_context: DesignContext,
        task_memory_root: impl Into<std::path::PathBuf>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestrationError> {
        let dag = Dag::from_document(dag_document)?;
        Ok(Self {
            broker,
            dag,
            context_builder: ContextBuilder::new(design_context),
            task_memory: TaskMemory::new(task_memory_root),
            correlation: CorrelationTable::new(),
            correlation_ids: HashMap::new(),
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A clonable flag the caller can set to stop the run between polls.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn correlation_id_for(&mut self, node_id: &str) -> Uuid {
        *self
            .correlation_ids
            .entry(node_id.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    async fn publish_stage(
        &mut self,
        node_id: &str,
        state: NodeState,
        addendum: StageAddendum,
    ) -> Result<(), OrchestrationError> {
        let kind = task_kind_for_state(state).expect("publish_stage called for a non-publishing state");
        let correlation_id = self.correlation_id_for(node_id);
        let context = self.context_builder.build(node_id, kind.stage(), &addendum)?;
        let task = Task::new(correlation_id, Priority::Medium, kind, context, Utc::now());

        self.correlation.record(task.task_id, node_id, kind.stage());
        self.broker.publish_task(&task).await?;

        tracing::info!(node_id, stage = kind.stage(), task_id = %task.task_id, "task published");
        Ok(())
    }

    /// Transition every ready PENDING node to IMPLEMENTING and publish its
    /// first task. Called at startup and after every result, since a
    /// completing node can unblock new dependents.
    async fn start_ready_nodes(&mut self) -> Result<(), OrchestrationError> {
        for node_id in self.dag.ready_nodes() {
            self.dag.set_state(&node_id, NodeState::Implementing)?;
            self.publish_stage(&node_id, NodeState::Implementing, StageAddendum::default())
                .await?;
        }
        Ok(())
    }

    async fn persist_task_memory(
        &mut self,
        node_id: &str,
        stage: &str,
        result: &TaskResult,
    ) -> Result<(), OrchestrationError> {
        self.task_memory.record_log(node_id, stage, &result.log_output).await?;

        if let Some(path) = &result.artifacts_path {
            self.task_memory.record_artifact_path(node_id, stage, path).await?;
            if let Some(node) = self.dag.node_mut(node_id) {
                node.artifacts.insert(stage.to_string(), path.clone());
            }
        }

        if let Some(insights) = &result.reflection_insights {
            self.task_memory
                .record_json(node_id, stage, "reflection_insights.json", insights)
                .await?;
        }

        if let Some(reflections) = &result.reflections {
            match serde_json::from_str::<serde_json::Value>(reflections) {
                Ok(value) => {
                    self.task_memory
                        .record_json(node_id, stage, "reflections.json", &value)
                        .await?
                }
                Err(_) => {
                    self.task_memory
                        .record_json(node_id, stage, "reflections.json", reflections)
                        .await?
                }
            }
        }

        Ok(())
    }

    /// Apply one `Result` to the node graph: persist it, then advance or
    /// fail the node it answers.
    async fn handle_result(&mut self, result: TaskResult) -> Result<(), OrchestrationError> {
        let Some((node_id, stage)) = self.correlation.resolve(result.task_id) else {
            tracing::debug!(task_id = %result.task_id, "result matched no open slot, discarding");
            return Ok(());
        };

        self.persist_task_memory(&node_id, stage, &result).await?;

        let current_state = self
            .dag
            .node(&node_id)
            .map(|node| node.state)
            .ok_or_else(|| OrchestrationError::MalformedDag {
                reason: format!("correlation table referenced unknown node {node_id:?}"),
            })?;

        if stage == TaskKind::Simulator.stage() && !result.status.is_success() {
            self.dag.set_state(&node_id, NodeState::Distilling)?;
            self.dag.mark_sim_failed(&node_id);
            let addendum = StageAddendum {
                failure_log_excerpt: Some(excerpt(&result.log_output)),
                failure_log_path: Some(self.task_memory.log_path(&node_id, stage).display().to_string()),
                reflection_insights: None,
            };
            self.publish_stage(&node_id, NodeState::Distilling, addendum).await?;
            return Ok(());
        }

        if !result.status.is_success() {
            self.dag.set_state(&node_id, NodeState::Failed)?;
            let cascaded = self.dag.cascade_failure(&node_id);
            tracing::info!(node_id, stage, cascaded = cascaded.len(), "node failed");
            return Ok(());
        }

        if current_state == NodeState::Reflecting {
            if self.dag.is_sim_failed(&node_id) {
                self.dag.set_state(&node_id, NodeState::Debugging)?;
                let addendum = StageAddendum {
                    reflection_insights: result.reflection_insights.clone(),
                    ..Default::default()
                };
                self.publish_stage(&node_id, NodeState::Debugging, addendum).await?;
            } else {
                self.dag.set_state(&node_id, NodeState::Done)?;
                tracing::info!(node_id, "node done (reflect-only terminal)");
            }
            return Ok(());
        }

        if current_state == NodeState::Debugging {
            // The debug stage produces guidance, not a fix: it always
            // terminates the node in FAILED regardless of its own status.
            self.dag.set_state(&node_id, NodeState::Failed)?;
            let cascaded = self.dag.cascade_failure(&node_id);
            tracing::info!(node_id, cascaded = cascaded.len(), "node failed after debug");
            return Ok(());
        }

        let Some(next_state) = current_state.success_transition() else {
            return Ok(());
        };
        self.dag.set_state(&node_id, next_state)?;

        if next_state.is_terminal() {
            tracing::info!(node_id, "node done");
            return Ok(());
        }

        self.publish_stage(&node_id, next_state, StageAddendum::default()).await
    }

    /// Run until every node is terminal, the stop flag is set, or the
    /// configured run timeout elapses. Fails fast if the DAG is non-empty
    /// but has no root (cyclic or otherwise malformed).
    pub async fn run(&mut self) -> Result<RunSummary, OrchestrationError> {
        if !self.dag.is_empty() && self.dag.ready_nodes().is_empty() {
            return Err(OrchestrationError::MalformedDag {
                reason: "no node is ready to start; the dag is cyclic or malformed".to_string(),
            });
        }

        self.start_ready_nodes().await?;

        let deadline = Instant::now() + self.config.run_timeout;
        let mut timed_out = false;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if self.dag.all_terminal() {
                break;
            }
            if Instant::now() >= deadline {
                timed_out = true;
                tracing::warn!("orchestrator run timed out before every node reached a terminal state");
                break;
            }

            match self
                .broker
                .consume_one(topology::RESULTS_QUEUE, self.config.poll_interval)
                .await?
            {
                Some(delivery) => match serde_json::from_slice::<TaskResult>(&delivery.body) {
                    Ok(result) => {
                        self.handle_result(result).await?;
                        self.start_ready_nodes().await?;
                        self.broker.ack(delivery).await?;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "discarding undecodable message on the results queue");
                        self.broker.ack(delivery).await?;
                    }
                },
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }

        let done_nodes: Vec<String> = self
            .dag
            .node_ids()
            .filter(|id| {
                self.dag
                    .node(id)
                    .map(|n| n.state == NodeState::Done)
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect();
        let failed_nodes: Vec<String> = self
            .dag
            .node_ids()
            .filter(|id| {
                self.dag
                    .node(id)
                    .map(|n| n.state == NodeState::Failed)
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect();

        Ok(RunSummary {
            done_nodes,
            failed_nodes,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use chipflow_shared::contracts::ResultStatus;
    use chipflow_shared::design_context::NodeDesignContext;
    use chipflow_shared::messaging::topology::{
        AGENT_TASKS_QUEUE, PROCESS_TASKS_QUEUE, SIMULATION_TASKS_QUEUE,
    };
    use serde_json::json;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::dag::Node;

    fn design_context_for(node_ids: &[&str]) -> DesignContext {
        let mut nodes = HashMap::new();
        for id in node_ids {
            nodes.insert(
                id.to_string(),
                NodeDesignContext {
                    rtl_path: format!("rtl/{id}.sv"),
                    tb_path: format!("tb/{id}_tb.sv"),
                    interface: vec!["a".to_string(), "b".to_string(), "y".to_string()],
                    clocking: "combinational".to_string(),
                    coverage_goals: vec![],
                    library_refs: vec![],
                    behavior_note: String::new(),
                    verification: String::new(),
                    acceptance: String::new(),
                },
            );
        }
        DesignContext { nodes }
    }

    fn node(id: &str, deps: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            state: NodeState::Pending,
            artifacts: HashMap::new(),
            metrics: HashMap::new(),
        }
    }

    /// A background task that stands in for the worker fleet: drains every
    /// work queue and immediately answers each task, failing simulation for
    /// any node named in `sim_should_fail` and failing lint for any node
    /// named in `lint_should_fail`.
    fn spawn_fake_workers(
        broker: BrokerProvider,
        sim_should_fail: HashSet<&'static str>,
        lint_should_fail: HashSet<&'static str>,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                let mut answered = false;
                for queue in [AGENT_TASKS_QUEUE, PROCESS_TASKS_QUEUE, SIMULATION_TASKS_QUEUE] {
                    let Some(delivery) = broker
                        .consume_one(queue, Duration::from_millis(5))
                        .await
                        .unwrap()
                    else {
                        continue;
                    };
                    answered = true;
                    let task: Task = serde_json::from_slice(&delivery.body).unwrap();
                    let node_id = task.context["node_id"].as_str().unwrap().to_string();
                    let stage = task.task_type.stage();

                    let fails = (stage == "sim" && sim_should_fail.contains(node_id.as_str()))
                        || (stage == "lint" && lint_should_fail.contains(node_id.as_str()));

                    let mut result = TaskResult {
                        task_id: task.task_id,
                        correlation_id: task.correlation_id,
                        completed_at: Utc::now(),
                        status: if fails { ResultStatus::Failure } else { ResultStatus::Success },
                        artifacts_path: Some(format!("artifacts/{node_id}/{stage}.out")),
                        log_output: if fails {
                            format!("{stage} failed for {node_id}\nassertion failed at t=10ns\n")
                        } else {
                            format!("{stage} ok for {node_id}\n")
                        },
                        reflections: None,
                        reflection_insights: None,
                        distilled_dataset: None,
                        metrics: None,
                    };
                    if stage == "reflect" {
                        result.reflection_insights = Some(json!({"root_cause": "mismatched clock edge"}));
                    }

                    broker.publish_result(&result).await.unwrap();
                    broker.ack(delivery).await.unwrap();
                }
                if !answered {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        })
    }

    #[tokio::test]
    async fn single_node_with_no_failures_reaches_done() {
        let broker = BrokerProvider::new_in_memory();
        let dag = DagDocument {
            nodes: vec![node("and2", &[])],
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            broker.clone(),
            dag,
            design_context_for(&["and2"]),
            tmp.path(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
                run_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();

        let workers_stop = Arc::new(AtomicBool::new(false));
        let workers = spawn_fake_workers(broker, HashSet::new(), HashSet::new(), Arc::clone(&workers_stop));

        let summary = orchestrator.run().await.unwrap();
        workers_stop.store(true, Ordering::Relaxed);
        workers.await.unwrap();

        assert!(!summary.timed_out);
        assert_eq!(summary.done_nodes, vec!["and2".to_string()]);
        assert!(summary.failed_nodes.is_empty());
    }

    #[tokio::test]
    async fn chained_dependency_runs_leaf_after_root_completes() {
        let broker = BrokerProvider::new_in_memory();
        let dag = DagDocument {
            nodes: vec![node("root", &[]), node("leaf", &["root"])],
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            broker.clone(),
            dag,
            design_context_for(&["root", "leaf"]),
            tmp.path(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
                run_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();

        let workers_stop = Arc::new(AtomicBool::new(false));
        let workers = spawn_fake_workers(broker, HashSet::new(), HashSet::new(), Arc::clone(&workers_stop));

        let summary = orchestrator.run().await.unwrap();
        workers_stop.store(true, Ordering::Relaxed);
        workers.await.unwrap();

        let mut done = summary.done_nodes.clone();
        done.sort();
        assert_eq!(done, vec!["leaf".to_string(), "root".to_string()]);
    }

    #[tokio::test]
    async fn simulation_failure_chains_through_distill_reflect_debug_to_failed() {
        let broker = BrokerProvider::new_in_memory();
        let dag = DagDocument {
            nodes: vec![node("and2", &[])],
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            broker.clone(),
            dag,
            design_context_for(&["and2"]),
            tmp.path(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
                run_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();

        let mut sim_should_fail = HashSet::new();
        sim_should_fail.insert("and2");
        let workers_stop = Arc::new(AtomicBool::new(false));
        let workers = spawn_fake_workers(broker, sim_should_fail, HashSet::new(), Arc::clone(&workers_stop));

        let summary = orchestrator.run().await.unwrap();
        workers_stop.store(true, Ordering::Relaxed);
        workers.await.unwrap();

        assert!(summary.done_nodes.is_empty());
        assert_eq!(summary.failed_nodes, vec!["and2".to_string()]);

        let log = tokio::fs::read_to_string(tmp.path().join("and2/sim/log.txt"))
            .await
            .unwrap();
        assert!(log.contains("sim failed"));
        let insights = tokio::fs::read_to_string(tmp.path().join("and2/reflect/reflection_insights.json"))
            .await
            .unwrap();
        assert!(insights.contains("root_cause"));
    }

    #[tokio::test]
    async fn upstream_failure_cascades_to_dependent_without_starting_it() {
        let broker = BrokerProvider::new_in_memory();
        let dag = DagDocument {
            nodes: vec![node("root", &[]), node("leaf", &["root"])],
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            broker.clone(),
            dag,
            design_context_for(&["root", "leaf"]),
            tmp.path(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
                run_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();

        let mut lint_should_fail = HashSet::new();
        lint_should_fail.insert("root");
        let workers_stop = Arc::new(AtomicBool::new(false));
        let workers = spawn_fake_workers(broker, HashSet::new(), lint_should_fail, Arc::clone(&workers_stop));

        let summary = orchestrator.run().await.unwrap();
        workers_stop.store(true, Ordering::Relaxed);
        workers.await.unwrap();

        assert!(summary.done_nodes.is_empty());
        let mut failed = summary.failed_nodes.clone();
        failed.sort();
        assert_eq!(failed, vec!["leaf".to_string(), "root".to_string()]);
    }

    #[tokio::test]
    async fn cyclic_dag_fails_fast_without_publishing_anything() {
        let broker = BrokerProvider::new_in_memory();
        let dag = DagDocument {
            nodes: vec![node("a", &["b"]), node("b", &["a"])],
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            broker.clone(),
            dag,
            design_context_for(&["a", "b"]),
            tmp.path(),
            OrchestratorConfig::default(),
        )
        .unwrap();

        let result = orchestrator.run().await;
        assert!(result.is_err());
        assert_eq!(broker.as_in_memory().unwrap().queue_len(AGENT_TASKS_QUEUE), 0);
    }

    #[tokio::test]
    async fn empty_dag_completes_immediately() {
        let broker = BrokerProvider::new_in_memory();
        let dag = DagDocument { nodes: vec![] };
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            broker,
            dag,
            design_context_for(&[]),
            tmp.path(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
                run_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();

        let summary = orchestrator.run().await.unwrap();
        assert!(summary.done_nodes.is_empty());
        assert!(summary.failed_nodes.is_empty());
        assert!(!summary.timed_out);
    }

    #[tokio::test]
    async fn run_times_out_when_no_worker_answers() {
        let broker = BrokerProvider::new_in_memory();
        let dag = DagDocument {
            nodes: vec![node("and2", &[])],
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            broker,
            dag,
            design_context_for(&["and2"]),
            tmp.path(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
                run_timeout: Duration::from_millis(50),
            },
        )
        .unwrap();

        let summary = orchestrator.run().await.unwrap();
        assert!(summary.timed_out);
        assert!(summary.done_nodes.is_empty());
    }
}
