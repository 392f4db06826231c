//! # Handler Dispatch
//!
//! Sum-type dispatch over the capability set "handle a `Task`, declare
//! which task kinds I handle" — a tagged enum with an exhaustive match, not
//! runtime subclassing, per the upstream messaging stack's preference for
//! enum dispatch over `dyn Trait` wherever the variant set is closed.

use async_trait::async_trait;
use chipflow_shared::contracts::{Task, TaskKind, TaskResult};

/// A single handler's contract: report the task kinds it can run, then run
/// one. Errors are returned as `anyhow::Error` so callers can classify them
/// with [`chipflow_shared::retry::classify`] without the handler needing to
/// know about the retry policy at all.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn handles(&self) -> &'static [TaskKind];

    async fn handle(&self, task: &Task) -> anyhow::Result<TaskResult>;
}

/// Whether a handler declares support for a given task kind.
pub fn handles(handler: &dyn TaskHandler, kind: TaskKind) -> bool {
    handler.handles().contains(&kind)
}
