use crate::error::Discard;
use crate::worker::AuditOutcome;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle state of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorHealth {
    pub uptime_seconds: u64,
    pub state: MonitorState,
    pub feed_status: String,
    pub feed_reconnects: u64,
    pub heartbeats_recorded: u64,
    pub discarded_unknown: u64,
    pub discarded_stale: u64,
    pub discarded_malformed: u64,
    pub audits_completed: u64,
    pub audits_failed: u64,
    pub issues_opened: u64,
    pub issues_cleared: u64,
}

#[derive(Default)]
struct Counters {
    feed_reconnects: AtomicU64,
    heartbeats_recorded: AtomicU64,
    discarded_unknown: AtomicU64,
    discarded_stale: AtomicU64,
    discarded_malformed: AtomicU64,
    audits_completed: AtomicU64,
    audits_failed: AtomicU64,
    issues_opened: AtomicU64,
    issues_cleared: AtomicU64,
}

/// Cheap clonable view of monitor activity, shared by the monitor task, the
/// feed and the HTTP API.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
    state: Arc<Mutex<MonitorState>>,
    feed_status: Arc<Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            state: Arc::new(Mutex::new(MonitorState::Stopped)),
            feed_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn set_state(&self, state: MonitorState) {
        *self.state.lock() = state;
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn mark_feed_connected(&self) {
        *self.feed_status.lock() = "connected".to_string();
    }

    pub fn mark_feed_disconnected(&self) {
        *self.feed_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.counters.feed_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.feed_status.lock() = "reconnecting".to_string();
    }

    pub fn record_heartbeat(&self) {
        self.counters.heartbeats_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self, discard: &Discard) {
        let counter = match discard {
            Discard::UnknownWorker(_) => &self.counters.discarded_unknown,
            Discard::Stale { .. } => &self.counters.discarded_stale,
            Discard::Malformed(_) => &self.counters.discarded_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: AuditOutcome) {
        match outcome {
            AuditOutcome::IssueOpened => {
                self.counters.issues_opened.fetch_add(1, Ordering::Relaxed);
            }
            AuditOutcome::IssueCleared => {
                self.counters.issues_cleared.fetch_add(1, Ordering::Relaxed);
            }
            AuditOutcome::IssueUpdated | AuditOutcome::NoChange => {}
        }
    }

    pub fn record_audit(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.counters.audits_completed
        } else {
            &self.counters.audits_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self) -> MonitorHealth {
        let c = &self.counters;
        MonitorHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            state: self.state(),
            feed_status: self.feed_status.lock().clone(),
            feed_reconnects: c.feed_reconnects.load(Ordering::Relaxed),
            heartbeats_recorded: c.heartbeats_recorded.load(Ordering::Relaxed),
            discarded_unknown: c.discarded_unknown.load(Ordering::Relaxed),
            discarded_stale: c.discarded_stale.load(Ordering::Relaxed),
            discarded_malformed: c.discarded_malformed.load(Ordering::Relaxed),
            audits_completed: c.audits_completed.load(Ordering::Relaxed),
            audits_failed: c.audits_failed.load(Ordering::Relaxed),
            issues_opened: c.issues_opened.load(Ordering::Relaxed),
            issues_cleared: c.issues_cleared.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let tracker = HealthTracker::new();
        let shared = tracker.clone();

        shared.record_heartbeat();
        shared.record_discard(&Discard::UnknownWorker("x".into()));
        shared.record_discard(&Discard::Stale { worker_id: "y".into(), age_secs: 90.0 });
        shared.record_outcome(AuditOutcome::IssueOpened);
        shared.record_audit(false);
        shared.increment_reconnects();

        let health = tracker.get_health();
        assert_eq!(health.heartbeats_recorded, 1);
        assert_eq!(health.discarded_unknown, 1);
        assert_eq!(health.discarded_stale, 1);
        assert_eq!(health.discarded_malformed, 0);
        assert_eq!(health.issues_opened, 1);
        assert_eq!(health.audits_failed, 1);
        assert_eq!(health.feed_status, "reconnecting");
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let tracker = HealthTracker::new();
        tracker.set_state(MonitorState::Running);
        let value = serde_json::to_value(tracker.get_health()).unwrap();
        assert_eq!(value["state"], "running");
    }
}
