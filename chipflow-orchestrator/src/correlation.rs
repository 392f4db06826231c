//! # Task Correlation
//!
//! Flattened task-id → (node-id, stage) map, updated atomically with
//! publish since the orchestrator runs single-threaded. A `Result` whose
//! task-id matches no entry is a straggler from a prior run or a replayed
//! message and is discarded silently by the caller.

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Default)]
pub struct CorrelationTable {
    slots: HashMap<Uuid, (String, &'static str)>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, task_id: Uuid, node_id: impl Into<String>, stage: &'static str) {
        self.slots.insert(task_id, (node_id.into(), stage));
    }

    /// Remove and return the (node-id, stage) pair for `task_id`, if any
    /// slot was recorded for it. Removing on lookup means a stray duplicate
    /// result for the same task-id is also discarded, not double-processed.
    pub fn resolve(&mut self, task_id: Uuid) -> Option<(String, &'static str)> {
        self.slots.remove(&task_id)
    }

    pub fn open_slots(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_consumes_the_slot() {
        let mut table = CorrelationTable::new();
        let task_id = Uuid::new_v4();
        table.record(task_id, "and2", "lint");

        assert_eq!(table.resolve(task_id), Some(("and2".to_string(), "lint")));
        assert_eq!(table.resolve(task_id), None, "a second result for the same task-id matches nothing");
    }

    #[test]
    fn unknown_task_id_resolves_to_none() {
        let mut table = CorrelationTable::new();
        assert_eq!(table.resolve(Uuid::new_v4()), None);
    }
}
