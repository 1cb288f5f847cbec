/**
 * WORKER - Agrégat par rôle de worker
 *
 * ROLE :
 * Collects the distinct processes (hostname, pid) that checked in during the
 * current interval and audits that count against the configured minimum,
 * opening, updating or clearing the persisted issue.
 */

use crate::error::StoreError;
use crate::models::{HostSnapshot, WorkerIssue, WorkerSnapshot};
use crate::store::IssueStore;
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;
use tracing::{info, warn};

/// Identifier a worker process computes for itself and sends in every heartbeat.
///
/// The format is `"{system_id}:{worker_name}"`, shared with the deployed
/// heartbeat publishers. A ':' inside either part can make two pairs collide;
/// the topology parser rejects such configurations.
pub fn worker_id(system_id: &str, worker_name: &str) -> String {
    format!("{system_id}:{worker_name}")
}

/// One running process of a worker role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity {
    pub hostname: String,
    pub pid: u32,
}

impl InstanceIdentity {
    pub fn new(hostname: impl Into<String>, pid: u32) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
        }
    }
}

/// Result of one audit, mostly for logging and health counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    IssueOpened,
    IssueUpdated,
    IssueCleared,
    NoChange,
}

#[derive(Debug, Clone)]
pub struct WorkerAggregate {
    system_id: String,
    name: String,
    min_procs: usize,
    worker_id: String,
    instances: HashSet<InstanceIdentity>,
    procs_count: usize,
    audited: bool,
}

impl WorkerAggregate {
    pub fn new(system_id: impl Into<String>, name: impl Into<String>, min_procs: usize) -> Self {
        let system_id = system_id.into();
        let name = name.into();
        Self {
            worker_id: worker_id(&system_id, &name),
            system_id,
            name,
            min_procs,
            instances: HashSet::new(),
            procs_count: 0,
            audited: false,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_procs(&self) -> usize {
        self.min_procs
    }

    /// Distinct processes seen in the current interval.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Count observed by the last successful audit.
    pub fn last_known_count(&self) -> usize {
        self.procs_count
    }

    /// Record that process (hostname, pid) checked in. Idempotent.
    pub fn record(&mut self, hostname: &str, pid: u32) {
        self.instances.insert(InstanceIdentity::new(hostname, pid));
    }

    /// Forget the instances seen in the interval that just ended.
    pub fn reset(&mut self) {
        self.instances = HashSet::new();
    }

    /// Compare the current interval against `min_procs` and reconcile the store.
    ///
    /// Both branches read the count of the previous audit before it is
    /// overwritten. On a store failure the previous count is kept, so a missed
    /// clear is attempted again on the next healthy interval.
    pub async fn audit(
        &mut self,
        store: &dyn IssueStore,
        now: OffsetDateTime,
    ) -> Result<AuditOutcome, StoreError> {
        let count = self.instances.len();
        let previous = self.procs_count;

        let outcome = if count >= self.min_procs && previous < self.min_procs {
            if store.delete_issue(&self.worker_id).await? {
                info!(worker_id = %self.worker_id, count, min_procs = self.min_procs, "worker recovered, issue cleared");
                AuditOutcome::IssueCleared
            } else {
                // healthy on a first audit: nothing was open
                AuditOutcome::NoChange
            }
        } else if count < self.min_procs {
            let issue = WorkerIssue::min_procs_fail(now, count);
            store.open_or_update_issue(&self.worker_id, &issue).await?;
            if previous >= self.min_procs || !self.audited {
                warn!(worker_id = %self.worker_id, count, min_procs = self.min_procs, "not enough instances, issue opened");
                AuditOutcome::IssueOpened
            } else {
                AuditOutcome::IssueUpdated
            }
        } else {
            AuditOutcome::NoChange
        };

        self.procs_count = count;
        self.audited = true;
        Ok(outcome)
    }

    /// Number of instances per host in the current interval.
    pub fn host_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for ins in &self.instances {
            *counts.entry(ins.hostname.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn to_snapshot(&self) -> WorkerSnapshot {
        let hosts = self
            .host_counts()
            .into_iter()
            .map(|(host, proc_count)| HostSnapshot {
                host: host.to_string(),
                proc_count,
            })
            .collect();
        WorkerSnapshot {
            id: self.worker_id.clone(),
            name: self.name.clone(),
            system_id: self.system_id.clone(),
            min_procs: self.min_procs,
            hosts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreReader};
    use async_trait::async_trait;
    use crate::models::{IssueType, SystemSnapshot};

    struct DownStore;

    #[async_trait]
    impl IssueStore for DownStore {
        async fn register_system_ids(&self, _ids: &[String]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn open_or_update_issue(&self, _worker_id: &str, _issue: &WorkerIssue) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete_issue(&self, _worker_id: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn write_system_snapshot(&self, _snapshot: &SystemSnapshot) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn test_worker_id_derivation() {
        assert_eq!(worker_id("sms-core", "dispatcher"), "sms-core:dispatcher");
        let wkr = WorkerAggregate::new("sms-core", "dispatcher", 2);
        assert_eq!(wkr.worker_id(), "sms-core:dispatcher");
    }

    #[test]
    fn test_record_deduplicates_same_process() {
        let mut wkr = WorkerAggregate::new("sys", "wkr", 1);
        for _ in 0..50 {
            wkr.record("host-a", 1234);
        }
        assert_eq!(wkr.instance_count(), 1);

        wkr.record("host-a", 1235);
        wkr.record("host-b", 1234);
        assert_eq!(wkr.instance_count(), 3);
    }

    #[tokio::test]
    async fn test_audit_after_reset_sees_zero() {
        let store = MemoryStore::new();
        let mut wkr = WorkerAggregate::new("sys", "wkr", 1);
        wkr.record("host-a", 1);
        wkr.reset();

        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::IssueOpened);
        assert_eq!(wkr.last_known_count(), 0);

        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::IssueUpdated);
        let issue = store.worker_issue("sys:wkr").await.unwrap().unwrap();
        assert_eq!(issue.procs_count, 0);
    }

    #[tokio::test]
    async fn test_issue_lifecycle() {
        let store = MemoryStore::new();
        let mut wkr = WorkerAggregate::new("sys", "wkr", 2);

        // interval 1: one instance, below minimum
        wkr.record("host-a", 1);
        wkr.audit(&store, now()).await.unwrap();
        let issue = store.worker_issue("sys:wkr").await.unwrap().unwrap();
        assert_eq!(issue.issue_type, IssueType::MinProcsFail);
        assert_eq!(issue.procs_count, 1);
        wkr.reset();

        // interval 2: two instances, recovered
        wkr.record("host-a", 1);
        wkr.record("host-a", 2);
        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::IssueCleared);
        assert!(store.worker_issue("sys:wkr").await.unwrap().is_none());
        wkr.reset();

        // interval 3: back to one, re-opened under the same id
        wkr.record("host-b", 7);
        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::IssueOpened);
        assert_eq!(store.document().issues.len(), 1);
        assert_eq!(store.worker_issue("sys:wkr").await.unwrap().unwrap().procs_count, 1);
    }

    #[tokio::test]
    async fn test_healthy_worker_touches_nothing() {
        let store = MemoryStore::new();
        let mut wkr = WorkerAggregate::new("sys", "wkr", 0);
        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::NoChange);
        assert!(store.document().issues.is_empty());
    }

    #[tokio::test]
    async fn test_healthy_first_audit_clears_nothing() {
        let store = MemoryStore::new();
        let mut wkr = WorkerAggregate::new("sys", "wkr", 2);
        wkr.record("host-a", 1);
        wkr.record("host-b", 1);

        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::NoChange);
        assert_eq!(wkr.last_known_count(), 2);
    }

    #[tokio::test]
    async fn test_healthy_first_audit_clears_issue_left_by_previous_run() {
        let store = MemoryStore::new();
        store
            .open_or_update_issue("sys:wkr", &WorkerIssue::min_procs_fail(now(), 0))
            .await
            .unwrap();
        let mut wkr = WorkerAggregate::new("sys", "wkr", 1);
        wkr.record("host-a", 1);

        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::IssueCleared);
        assert!(store.worker_issue("sys:wkr").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_previous_count() {
        let store = MemoryStore::new();
        let mut wkr = WorkerAggregate::new("sys", "wkr", 1);
        wkr.audit(&store, now()).await.unwrap();
        assert!(store.worker_issue("sys:wkr").await.unwrap().is_some());

        // recovery whose delete fails must be retried next time
        wkr.record("host-a", 1);
        assert!(wkr.audit(&DownStore, now()).await.is_err());
        assert_eq!(wkr.last_known_count(), 0);

        let outcome = wkr.audit(&store, now()).await.unwrap();
        assert_eq!(outcome, AuditOutcome::IssueCleared);
        assert!(store.worker_issue("sys:wkr").await.unwrap().is_none());
    }

    #[test]
    fn test_snapshot_host_counts() {
        let mut wkr = WorkerAggregate::new("sys", "wkr", 3);
        wkr.record("a", 1);
        wkr.record("a", 2);
        wkr.record("b", 1);

        let snap = wkr.to_snapshot();
        assert_eq!(snap.min_procs, 3);
        assert_eq!(snap.hosts.len(), 2);
        assert!(snap.hosts.contains(&HostSnapshot { host: "a".into(), proc_count: 2 }));
        assert!(snap.hosts.contains(&HostSnapshot { host: "b".into(), proc_count: 1 }));
        let total: usize = snap.hosts.iter().map(|h| h.proc_count).sum();
        assert_eq!(total, wkr.instance_count());
    }
}
