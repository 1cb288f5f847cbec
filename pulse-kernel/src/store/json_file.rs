use super::{IssueStore, StoreDocument, StoreReader};
use crate::error::StoreError;
use crate::models::{SystemSnapshot, WorkerIssue};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Store persisted as a single JSON document, so issue state survives restarts.
///
/// Every mutation is applied to a copy, written to a `.json.tmp` sibling, renamed over
/// the real file and only then committed in memory: a failed write leaves both
/// the file and the in-memory view unchanged.
pub struct JsonFileStore {
    path: PathBuf,
    doc: RwLock<StoreDocument>,
}

impl JsonFileStore {
    /// Loads the document at `path`, or starts empty when the file does not exist yet.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();

        let doc = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            if content.trim().is_empty() {
                StoreDocument::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            info!(path = %path.display(), "no existing store file, starting fresh");
            StoreDocument::default()
        };

        info!(
            path = %path.display(),
            systems = doc.system_ids.len(),
            issues = doc.issues.len(),
            "store loaded"
        );
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Applies `apply` to a copy of the document and persists it when it reports a change.
    async fn mutate<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreDocument) -> bool + Send,
    {
        let mut guard = self.doc.write().await;
        let mut next = guard.clone();
        if !apply(&mut next) {
            return Ok(());
        }
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl IssueStore for JsonFileStore {
    async fn register_system_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        self.mutate(|doc| doc.register_system_ids(ids)).await
    }

    async fn open_or_update_issue(&self, worker_id: &str, issue: &WorkerIssue) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.open_or_update_issue(worker_id, issue);
            true
        })
        .await?;
        debug!(worker_id, procs_count = issue.procs_count, "issue written");
        Ok(())
    }

    async fn delete_issue(&self, worker_id: &str) -> Result<bool, StoreError> {
        let mut removed = false;
        self.mutate(|doc| {
            removed = doc.delete_issue(worker_id);
            removed
        })
        .await?;
        Ok(removed)
    }

    async fn write_system_snapshot(&self, snapshot: &SystemSnapshot) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.write_system_snapshot(snapshot);
            true
        })
        .await
    }
}

#[async_trait]
impl StoreReader for JsonFileStore {
    async fn system_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.doc.read().await.system_ids.iter().cloned().collect())
    }

    async fn system_snapshot(&self, system_id: &str) -> Result<Option<SystemSnapshot>, StoreError> {
        Ok(self.doc.read().await.systems.get(system_id).cloned())
    }

    async fn worker_issue(&self, worker_id: &str) -> Result<Option<WorkerIssue>, StoreError> {
        Ok(self.doc.read().await.issues.get(worker_id).cloned())
    }
}
