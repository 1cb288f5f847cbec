use super::{IssueStore, StoreDocument, StoreReader};
use crate::error::StoreError;
use crate::models::{SystemSnapshot, WorkerIssue};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Volatile store, for tests and for deployments that only need the HTTP view.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current document.
    pub fn document(&self) -> StoreDocument {
        self.doc.lock().clone()
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn register_system_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        self.doc.lock().register_system_ids(ids);
        Ok(())
    }

    async fn open_or_update_issue(&self, worker_id: &str, issue: &WorkerIssue) -> Result<(), StoreError> {
        self.doc.lock().open_or_update_issue(worker_id, issue);
        Ok(())
    }

    async fn delete_issue(&self, worker_id: &str) -> Result<bool, StoreError> {
        Ok(self.doc.lock().delete_issue(worker_id))
    }

    async fn write_system_snapshot(&self, snapshot: &SystemSnapshot) -> Result<(), StoreError> {
        self.doc.lock().write_system_snapshot(snapshot);
        Ok(())
    }
}

#[async_trait]
impl StoreReader for MemoryStore {
    async fn system_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.doc.lock().system_ids.iter().cloned().collect())
    }

    async fn system_snapshot(&self, system_id: &str) -> Result<Option<SystemSnapshot>, StoreError> {
        Ok(self.doc.lock().systems.get(system_id).cloned())
    }

    async fn worker_issue(&self, worker_id: &str) -> Result<Option<WorkerIssue>, StoreError> {
        Ok(self.doc.lock().issues.get(worker_id).cloned())
    }
}
