use crate::models::SystemSnapshot;
use crate::worker::WorkerAggregate;
use std::collections::HashMap;

/// Reporting view over the workers of one system.
///
/// Workers are owned by the topology registry; a group only keeps their ids,
/// in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemGroup {
    name: String,
    system_id: String,
    worker_ids: Vec<String>,
}

impl SystemGroup {
    pub fn new(name: impl Into<String>, system_id: impl Into<String>, worker_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            system_id: system_id.into(),
            worker_ids,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Pure projection of the current in-memory state; does not touch the store.
    pub fn to_snapshot(&self, workers: &HashMap<String, WorkerAggregate>, timestamp: i64) -> SystemSnapshot {
        SystemSnapshot {
            id: self.system_id.clone(),
            name: self.name.clone(),
            timestamp,
            workers: self
                .worker_ids
                .iter()
                .filter_map(|id| workers.get(id))
                .map(WorkerAggregate::to_snapshot)
                .collect(),
        }
    }
}
