#![allow(dead_code)]

use async_trait::async_trait;
use pulse_kernel::config::MonitorConfig;
use pulse_kernel::error::StoreError;
use pulse_kernel::models::{HeartbeatMessage, SystemSnapshot, WorkerIssue};
use pulse_kernel::store::{IssueStore, MemoryStore, StoreDocument};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// Single system "sms-core" with worker "dispatcher" (min 2) and "router" (min 1).
pub fn sms_core_config(deadline_secs: u64) -> MonitorConfig {
    let yaml = format!(
        r#"
deadline: {deadline_secs}
store: {{ backend: memory }}
monitored_systems:
  sms-core:
    system_id: sms-core
    workers:
      dispatcher: {{ name: dispatcher, min_procs: 2 }}
      router: {{ name: router, min_procs: 1 }}
"#
    );
    MonitorConfig::from_yaml_str(&yaml, "inline").unwrap()
}

pub fn heartbeat(worker_id: &str, hostname: &str, pid: u32) -> HeartbeatMessage {
    heartbeat_at(worker_id, hostname, pid, unix_now())
}

pub fn heartbeat_at(worker_id: &str, hostname: &str, pid: u32, timestamp: f64) -> HeartbeatMessage {
    HeartbeatMessage {
        worker_id: worker_id.into(),
        timestamp,
        hostname: hostname.into(),
        pid,
        version: Some(pulse_kernel::models::HEARTBEAT_VERSION),
        system_id: None,
        worker_name: None,
    }
}

pub fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp() as f64
}

/// Memory store that can be switched to failing or slow, counting calls that reached it.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every write sleeps `delay` (tokio time) before reaching the store.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn document(&self) -> StoreDocument {
        self.inner.document()
    }

    async fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IssueStore for FlakyStore {
    async fn register_system_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        self.check().await?;
        self.inner.register_system_ids(ids).await
    }

    async fn open_or_update_issue(&self, worker_id: &str, issue: &WorkerIssue) -> Result<(), StoreError> {
        self.check().await?;
        self.inner.open_or_update_issue(worker_id, issue).await
    }

    async fn delete_issue(&self, worker_id: &str) -> Result<bool, StoreError> {
        self.check().await?;
        self.inner.delete_issue(worker_id).await
    }

    async fn write_system_snapshot(&self, snapshot: &SystemSnapshot) -> Result<(), StoreError> {
        self.check().await?;
        self.inner.write_system_snapshot(snapshot).await
    }
}
