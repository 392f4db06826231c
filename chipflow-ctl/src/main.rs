//! `chipflow-ctl` — the thin command-line entry point for driving a
//! chipflow verification job over the broker.
//!
//! This binary owns no orchestration logic of its own: it loads the two
//! startup documents (DAG, design context), wires the worker fleet and the
//! orchestrator against a broker connection, and otherwise gets out of the
//! way. It mirrors the split `tasker-ctl` keeps between its own binary and
//! the library crates that binary drives.

mod commands;
mod output;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "chipflow-ctl",
    version,
    about = "Drive a chipflow hardware-design verification job over the broker",
    styles = output::clap_styles()
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the worker fleet and the orchestrator for one job, and run
    /// until every node reaches a terminal state or the timeout elapses.
    Run(commands::run::RunArgs),
    /// Inspect or drain the dead letter queue. Never consulted by the
    /// orchestrator itself; operational tooling only.
    #[command(subcommand)]
    Dlq(commands::dlq::DlqCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Dlq(cmd) => commands::dlq::handle(cmd).await,
    }
}
