//! `chipflow-ctl run` — start the worker fleet and the orchestrator for one
//! job, and drive it to completion (or timeout) over a live broker.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chipflow_orchestrator::{DagDocument, Orchestrator, OrchestratorConfig};
use chipflow_shared::config::ChipflowConfig;
use chipflow_shared::design_context::DesignContext;
use chipflow_shared::messaging::topology::{AGENT_TASKS_QUEUE, PROCESS_TASKS_QUEUE, SIMULATION_TASKS_QUEUE};
use chipflow_shared::messaging::{AmqpBroker, BrokerProvider};
use chipflow_worker::handlers::{DistillHandler, LintHandler, MockReasoningHandler, SimulateHandler};
use chipflow_worker::{WorkerLoop, WorkerLoopConfig};
use clap::Args;

use crate::output;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the DAG document: job nodes and their dependency edges.
    #[arg(long)]
    dag: PathBuf,
    /// Path to the design context document produced by the planner.
    #[arg(long)]
    design_context: PathBuf,
    /// Root directory for per-node, per-stage task memory.
    #[arg(long)]
    task_memory_root: Option<PathBuf>,
    /// AMQP broker URL. Defaults to the environment-derived value.
    #[arg(long)]
    broker_url: Option<String>,
    /// Wall-clock budget, in seconds, before the orchestrator gives up on
    /// unfinished nodes.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

/// Load config, connect, wire up one worker instance per queue plus the
/// orchestrator, and run the job to completion.
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = ChipflowConfig::load().unwrap_or_default();
    if let Some(url) = args.broker_url {
        config.broker_url = url;
    }
    if let Some(root) = &args.task_memory_root {
        config.task_memory_root = root.display().to_string();
    }
    if let Some(timeout) = args.timeout_secs {
        config.orchestrator_timeout_secs = timeout;
    }

    output::header(format!("connecting to {}", config.broker_url));
    let broker = BrokerProvider::Amqp(AmqpBroker::connect(&config.broker_url).await?);

    let dag_document: DagDocument = serde_json::from_str(&tokio::fs::read_to_string(&args.dag).await?)?;
    let design_context: DesignContext =
        serde_json::from_str(&tokio::fs::read_to_string(&args.design_context).await?)?;

    let agent_worker = WorkerLoop::new(
        broker.clone(),
        vec![Box::new(MockReasoningHandler::full())],
        WorkerLoopConfig::new(AGENT_TASKS_QUEUE, config.task_max_retries),
    );
    let process_worker = WorkerLoop::new(
        broker.clone(),
        vec![Box::new(LintHandler), Box::new(DistillHandler)],
        WorkerLoopConfig::new(PROCESS_TASKS_QUEUE, config.task_max_retries),
    );
    let simulation_worker = WorkerLoop::new(
        broker.clone(),
        vec![Box::new(SimulateHandler)],
        WorkerLoopConfig::new(SIMULATION_TASKS_QUEUE, config.task_max_retries),
    );

    let stop_handles = [
        agent_worker.stop_handle(),
        process_worker.stop_handle(),
        simulation_worker.stop_handle(),
    ];

    output::header("starting worker fleet (agent_tasks, process_tasks, simulation_tasks)");
    let agent_task = tokio::spawn(async move { agent_worker.run().await });
    let process_task = tokio::spawn(async move { process_worker.run().await });
    let simulation_task = tokio::spawn(async move { simulation_worker.run().await });

    let mut orchestrator = Orchestrator::new(
        broker,
        dag_document,
        design_context,
        config.task_memory_root.clone(),
        OrchestratorConfig {
            poll_interval: Duration::from_millis(100),
            run_timeout: config.orchestrator_timeout(),
        },
    )?;

    output::header("orchestrator starting");
    let summary = orchestrator.run().await?;

    for handle in &stop_handles {
        handle.store(true, Ordering::Relaxed);
    }
    let (agent_result, process_result, simulation_result) =
        tokio::join!(agent_task, process_task, simulation_task);
    agent_result??;
    process_result??;
    simulation_result??;

    output::success(format!("{} node(s) done", summary.done_nodes.len()));
    for node in &summary.done_nodes {
        output::label("  done", node);
    }
    if !summary.failed_nodes.is_empty() {
        output::warning(format!("{} node(s) failed", summary.failed_nodes.len()));
        for node in &summary.failed_nodes {
            output::label("  failed", node);
        }
    }
    if summary.timed_out {
        output::warning("run timed out before every node reached a terminal state");
    }

    Ok(())
}
