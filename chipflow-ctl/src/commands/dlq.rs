//! `chipflow-ctl dlq` — inspect or drain the dead letter queue.
//!
//! Never consulted by the orchestrator or the worker loop; this is
//! operational tooling for a human to look at what the retry policy gave
//! up on.

use chipflow_shared::config::ChipflowConfig;
use chipflow_shared::contracts::Task;
use chipflow_shared::messaging::topology::DEAD_LETTER_QUEUE;
use chipflow_shared::messaging::{AmqpBroker, BrokerProvider, Delivery, MessagingProvider};
use chipflow_shared::retry::retry_count;
use clap::{Args, Subcommand};
use std::time::Duration;

use crate::output;

#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    /// Print every message currently on the dead letter queue without
    /// removing it. Requeues each message after reading it, so repeated
    /// `list` calls stay idempotent.
    List(DlqArgs),
    /// Permanently remove messages from the dead letter queue, printing
    /// each one as it goes.
    Drain(DrainArgs),
}

#[derive(Debug, Args)]
pub struct DlqArgs {
    /// AMQP broker URL. Defaults to the environment-derived value.
    #[arg(long)]
    broker_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct DrainArgs {
    /// AMQP broker URL. Defaults to the environment-derived value.
    #[arg(long)]
    broker_url: Option<String>,
    /// Stop after removing this many messages, even if more remain.
    #[arg(long)]
    limit: Option<usize>,
}

pub async fn handle(cmd: DlqCommand) -> anyhow::Result<()> {
    match cmd {
        DlqCommand::List(args) => list(args).await,
        DlqCommand::Drain(args) => drain(args).await,
    }
}

async fn connect(broker_url: Option<String>) -> anyhow::Result<BrokerProvider> {
    let url = match broker_url {
        Some(url) => url,
        None => ChipflowConfig::load().unwrap_or_default().broker_url,
    };
    Ok(BrokerProvider::Amqp(AmqpBroker::connect(&url).await?))
}

/// Non-destructive peek: pull exactly `queue_depth()` messages, print each,
/// then requeue it. Bounding the loop on the depth observed up front (taken
/// before the first pull) keeps this from chasing its own requeues forever,
/// since a requeued message lands back at the tail of the same queue.
async fn list(args: DlqArgs) -> anyhow::Result<()> {
    let broker = connect(args.broker_url).await?;
    let depth = broker.queue_depth(DEAD_LETTER_QUEUE).await?;

    output::header(format!("{depth} message(s) on {DEAD_LETTER_QUEUE}"));
    for _ in 0..depth {
        match broker.consume_one(DEAD_LETTER_QUEUE, Duration::from_secs(1)).await? {
            Some(delivery) => {
                describe(&delivery);
                broker.nack(delivery, true).await?;
            }
            None => break,
        }
    }
    Ok(())
}

/// Destructive drain: pull up to `queue_depth()` (or `--limit`, whichever
/// is smaller) messages and ack each one, permanently removing it.
async fn drain(args: DrainArgs) -> anyhow::Result<()> {
    let broker = connect(args.broker_url).await?;
    let depth = broker.queue_depth(DEAD_LETTER_QUEUE).await? as usize;
    let count = args.limit.map(|limit| limit.min(depth)).unwrap_or(depth);

    output::header(format!("draining {count} of {depth} message(s) on {DEAD_LETTER_QUEUE}"));
    let mut drained = 0usize;
    for _ in 0..count {
        match broker.consume_one(DEAD_LETTER_QUEUE, Duration::from_secs(1)).await? {
            Some(delivery) => {
                describe(&delivery);
                broker.ack(delivery).await?;
                drained += 1;
            }
            None => break,
        }
    }
    output::success(format!("drained {drained} message(s)"));
    Ok(())
}

/// Best-effort decode for display; a message that failed validation upstream
/// may not even be valid JSON, so falls back to a byte count rather than
/// erroring out of the whole command.
fn describe(delivery: &Delivery) {
    match serde_json::from_slice::<Task>(&delivery.body) {
        Ok(task) => {
            output::label("task_id", task.task_id);
            output::label("task_type", format!("{:?}", task.task_type));
            output::label("retry_count", retry_count(delivery.headers.as_ref()));
        }
        Err(_) => {
            output::warning(format!("undecodable body ({} bytes)", delivery.body.len()));
        }
    }
}
