use crate::worker::worker_id;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Heartbeat record version written by `HeartbeatMessage::new`, matching `heartbeat@v1`.
pub const HEARTBEAT_VERSION: u32 = 1;

/// Heartbeat announcement as published on the bus (heartbeat@v1).
/// The monitor only reads `worker_id`, `timestamp`, `hostname` and `pid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub worker_id: String,
    pub timestamp: f64,             // seconds since epoch
    pub hostname: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
}

impl HeartbeatMessage {
    /// Heartbeat for process `pid` of `worker_name` in `system_id`, stamped now.
    pub fn new(system_id: &str, worker_name: &str, hostname: impl Into<String>, pid: u32) -> Self {
        Self {
            worker_id: worker_id(system_id, worker_name),
            timestamp: OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9,
            hostname: hostname.into(),
            pid,
            version: Some(HEARTBEAT_VERSION),
            system_id: Some(system_id.to_string()),
            worker_name: Some(worker_name.to_string()),
        }
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    #[serde(rename = "min-procs-fail")]
    MinProcsFail,
}

/// An open anomaly for one worker role, persisted by worker id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerIssue {
    pub issue_type: IssueType,
    #[serde(with = "time::serde::timestamp")]
    pub start_time: OffsetDateTime,
    pub procs_count: usize,
}

impl WorkerIssue {
    pub fn min_procs_fail(start_time: OffsetDateTime, procs_count: usize) -> Self {
        Self {
            issue_type: IssueType::MinProcsFail,
            start_time,
            procs_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub host: String,
    pub proc_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub name: String,
    pub system_id: String,
    pub min_procs: usize,
    pub hosts: Vec<HostSnapshot>,
}

/// Point-in-time view of a system, consumed by dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub id: String,
    pub name: String,
    pub timestamp: i64,
    pub workers: Vec<WorkerSnapshot>,
}

impl SystemSnapshot {
    pub fn dumps(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_ignores_optional_fields() {
        let payload = br#"{"worker_id":"sms-core:dispatcher","timestamp":1700000000.5,"hostname":"a","pid":42}"#;
        let hb = HeartbeatMessage::from_slice(payload).unwrap();
        assert_eq!(hb.worker_id, "sms-core:dispatcher");
        assert_eq!(hb.pid, 42);
        assert!(hb.version.is_none());
    }

    #[test]
    fn test_new_heartbeat_derives_worker_id() {
        let hb = HeartbeatMessage::new("sms-core", "dispatcher", "a", 42);
        assert_eq!(hb.worker_id, "sms-core:dispatcher");
        assert_eq!(hb.version, Some(HEARTBEAT_VERSION));
        assert!(crate::config::DEFAULT_HEARTBEAT_TOPIC.ends_with(&format!("@v{HEARTBEAT_VERSION}")));
        assert_eq!(hb.worker_name.as_deref(), Some("dispatcher"));
        let age = OffsetDateTime::now_utc().unix_timestamp() as f64 - hb.timestamp;
        assert!(age < 5.0);

        let value = serde_json::to_value(&hb).unwrap();
        assert_eq!(value["system_id"], "sms-core");
    }

    #[test]
    fn test_heartbeat_missing_pid_is_rejected() {
        let payload = br#"{"worker_id":"x","timestamp":1.0,"hostname":"a"}"#;
        assert!(HeartbeatMessage::from_slice(payload).is_err());
    }

    #[test]
    fn test_issue_serialization() {
        let issue = WorkerIssue::min_procs_fail(
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            1,
        );
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["issue_type"], "min-procs-fail");
        assert_eq!(value["start_time"], 1_700_000_000);
        assert_eq!(value["procs_count"], 1);
    }
}
