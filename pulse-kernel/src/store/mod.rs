/**
 * STORE - Persistance des issues et snapshots du moniteur
 *
 * ROLE :
 * Durable record of registered system ids, open worker issues (keyed by
 * worker id) and the latest snapshot of each system.
 *
 * FONCTIONNEMENT :
 * - IssueStore = the four write operations the audit pass depends on
 * - StoreReader = read side used by the HTTP API and tests
 * - StoreDocument = shared layout, held in memory or in a JSON file
 */

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::config::StoreConf;
use crate::error::StoreError;
use crate::models::{SystemSnapshot, WorkerIssue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Write contract required by the monitor.
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Idempotent: already known ids are left untouched.
    async fn register_system_ids(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Upsert by worker id. An already open issue keeps its start time.
    async fn open_or_update_issue(&self, worker_id: &str, issue: &WorkerIssue) -> Result<(), StoreError>;

    /// Returns whether an open issue was removed; no-op when there was none.
    async fn delete_issue(&self, worker_id: &str) -> Result<bool, StoreError>;

    async fn write_system_snapshot(&self, snapshot: &SystemSnapshot) -> Result<(), StoreError>;
}

/// Read side, for the HTTP API and dashboards.
#[async_trait]
pub trait StoreReader: Send + Sync {
    async fn system_ids(&self) -> Result<Vec<String>, StoreError>;
    async fn system_snapshot(&self, system_id: &str) -> Result<Option<SystemSnapshot>, StoreError>;
    async fn worker_issue(&self, worker_id: &str) -> Result<Option<WorkerIssue>, StoreError>;
}

pub type SharedStore = Arc<dyn IssueStore>;
pub type SharedReader = Arc<dyn StoreReader>;

/// Opens the configured backend, returning its write and read sides.
pub async fn open_store(conf: &StoreConf) -> Result<(SharedStore, SharedReader), StoreError> {
    match conf {
        StoreConf::JsonFile { path } => {
            let store = Arc::new(JsonFileStore::open(path.clone()).await?);
            let writer: SharedStore = store.clone();
            let reader: SharedReader = store;
            Ok((writer, reader))
        }
        StoreConf::Memory => {
            let store = Arc::new(MemoryStore::new());
            let writer: SharedStore = store.clone();
            let reader: SharedReader = store;
            Ok((writer, reader))
        }
    }
}

/// Layout shared by every store backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub system_ids: BTreeSet<String>,
    #[serde(default)]
    pub systems: BTreeMap<String, SystemSnapshot>,
    #[serde(default)]
    pub issues: BTreeMap<String, WorkerIssue>,
}

impl StoreDocument {
    /// Returns true when at least one id was new.
    pub fn register_system_ids(&mut self, ids: &[String]) -> bool {
        let mut changed = false;
        for id in ids {
            changed |= self.system_ids.insert(id.clone());
        }
        changed
    }

    pub fn open_or_update_issue(&mut self, worker_id: &str, issue: &WorkerIssue) {
        match self.issues.get_mut(worker_id) {
            Some(open) => {
                open.issue_type = issue.issue_type;
                open.procs_count = issue.procs_count;
            }
            None => {
                self.issues.insert(worker_id.to_string(), issue.clone());
            }
        }
    }

    /// Returns true when an issue was actually removed.
    pub fn delete_issue(&mut self, worker_id: &str) -> bool {
        self.issues.remove(worker_id).is_some()
    }

    pub fn write_system_snapshot(&mut self, snapshot: &SystemSnapshot) {
        self.systems.insert(snapshot.id.clone(), snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut doc = StoreDocument::default();
        assert!(doc.register_system_ids(&["a".into(), "b".into()]));
        assert!(!doc.register_system_ids(&["a".into()]));
        assert_eq!(doc.system_ids.len(), 2);
    }

    #[test]
    fn test_update_keeps_start_time() {
        let mut doc = StoreDocument::default();
        doc.open_or_update_issue("s:w", &WorkerIssue::min_procs_fail(at(100), 1));
        doc.open_or_update_issue("s:w", &WorkerIssue::min_procs_fail(at(200), 0));

        assert_eq!(doc.issues.len(), 1);
        let issue = &doc.issues["s:w"];
        assert_eq!(issue.start_time, at(100));
        assert_eq!(issue.procs_count, 0);
    }

    #[test]
    fn test_delete_missing_issue_is_noop() {
        let mut doc = StoreDocument::default();
        assert!(!doc.delete_issue("s:w"));
    }
}
