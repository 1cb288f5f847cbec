/**
 * TOPOLOGY - Graphe systèmes / workers construit depuis la configuration
 *
 * ROLE :
 * Validates `monitored_systems` and builds the system groups plus the flat
 * worker_id -> aggregate registry used for O(1) lookup on heartbeat arrival.
 * Any invalid entry aborts startup: there is no partial topology.
 */

use crate::config::SystemEntry;
use crate::error::ConfigError;
use crate::models::SystemSnapshot;
use crate::system::SystemGroup;
use crate::worker::WorkerAggregate;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
pub struct Topology {
    systems: Vec<SystemGroup>,
    workers: HashMap<String, WorkerAggregate>,
}

impl Topology {
    pub fn systems(&self) -> &[SystemGroup] {
        &self.systems
    }

    pub fn workers(&self) -> &HashMap<String, WorkerAggregate> {
        &self.workers
    }

    pub fn worker(&self, worker_id: &str) -> Option<&WorkerAggregate> {
        self.workers.get(worker_id)
    }

    pub fn worker_mut(&mut self, worker_id: &str) -> Option<&mut WorkerAggregate> {
        self.workers.get_mut(worker_id)
    }

    pub fn system_ids(&self) -> Vec<String> {
        self.systems.iter().map(|s| s.system_id().to_string()).collect()
    }

    pub fn snapshots(&self, timestamp: i64) -> Vec<SystemSnapshot> {
        self.systems
            .iter()
            .map(|s| s.to_snapshot(&self.workers, timestamp))
            .collect()
    }

    /// Clears the per-interval instance set of every worker.
    pub fn reset_checkin_state(&mut self) {
        for wkr in self.workers.values_mut() {
            wkr.reset();
        }
    }
}

/// Builds the topology from the `monitored_systems` tree.
pub fn parse_topology(config: &BTreeMap<String, SystemEntry>) -> Result<Topology, ConfigError> {
    let mut topology = Topology::default();
    let mut declared_by: HashMap<String, String> = HashMap::new();
    let mut system_keys: HashMap<String, String> = HashMap::new();

    for (sys_key, sys) in config {
        let sys_location = format!("system '{sys_key}'");

        let workers = sys.workers.as_ref().ok_or_else(|| ConfigError::MissingField {
            field: "workers",
            location: sys_location.clone(),
        })?;
        if workers.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "workers",
                location: sys_location,
                reason: "at least one worker is required".into(),
            });
        }
        let system_id = sys.system_id.as_deref().ok_or_else(|| ConfigError::MissingField {
            field: "system_id",
            location: sys_location.clone(),
        })?;
        if system_id.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "system_id",
                location: sys_location,
                reason: "must not be empty".into(),
            });
        }
        if system_keys.insert(system_id.to_string(), sys_key.clone()).is_some() {
            return Err(ConfigError::DuplicateSystemId(system_id.to_string()));
        }

        let mut worker_ids = Vec::with_capacity(workers.len());
        for (wkr_key, entry) in workers {
            let location = format!("worker '{wkr_key}' of system '{sys_key}'");

            let name = entry.name.as_deref().ok_or_else(|| ConfigError::MissingField {
                field: "name",
                location: location.clone(),
            })?;
            let min_procs = entry.min_procs.ok_or_else(|| ConfigError::MissingField {
                field: "min_procs",
                location: location.clone(),
            })?;
            let min_procs = usize::try_from(min_procs).map_err(|_| ConfigError::InvalidField {
                field: "min_procs",
                location: location.clone(),
                reason: format!("expected a non-negative integer, got {min_procs}"),
            })?;

            let wkr = WorkerAggregate::new(system_id, name, min_procs);
            let id = wkr.worker_id().to_string();
            if let Some(first) = declared_by.get(&id) {
                return Err(ConfigError::DuplicateWorkerId {
                    worker_id: id,
                    first: first.clone(),
                    second: location,
                });
            }
            declared_by.insert(id.clone(), location);
            worker_ids.push(id.clone());
            topology.workers.insert(id, wkr);
        }

        topology
            .systems
            .push(SystemGroup::new(sys_key.clone(), system_id, worker_ids));
    }

    Ok(topology)
}
