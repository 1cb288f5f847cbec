//! Error types for the heartbeat monitor.
//!
//! Startup errors (`ConfigError`, registration `StoreError`, `FeedError`) abort
//! `HeartbeatMonitor::start`. Steady-state errors stay inside one audit pass or
//! one message and are only logged.

/// Fatal configuration problems, raised before the monitor runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Expected '{field}' field in {location}")]
    MissingField { field: &'static str, location: String },
    #[error("Invalid '{field}' in {location}: {reason}")]
    InvalidField {
        field: &'static str,
        location: String,
        reason: String,
    },
    #[error("Worker id '{worker_id}' derived by both {first} and {second}")]
    DuplicateWorkerId {
        worker_id: String,
        first: String,
        second: String,
    },
    #[error("System id '{0}' is declared by more than one system")]
    DuplicateSystemId(String),
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failures of the persistent store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the heartbeat feed collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Subscription to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("Feed already subscribed")]
    AlreadySubscribed,
}

/// Why an incoming heartbeat was dropped without being recorded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Discard {
    #[error("worker '{0}' is unknown")]
    UnknownWorker(String),
    #[error("heartbeat from '{worker_id}' is too old ({age_secs:.1}s)")]
    Stale { worker_id: String, age_secs: f64 },
    #[error("malformed heartbeat payload: {0}")]
    Malformed(String),
}

/// Errors surfaced by the monitor lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("Monitor is already running")]
    AlreadyRunning,
    #[error("Monitor is not running")]
    NotRunning,
    #[error("Monitor task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_names_field_and_location() {
        let err = ConfigError::MissingField {
            field: "system_id",
            location: "system 'sms-core'".into(),
        };
        assert_eq!(
            err.to_string(),
            "Expected 'system_id' field in system 'sms-core'"
        );
    }

    #[test]
    fn test_monitor_error_wraps_store_error() {
        let err: MonitorError = StoreError::Unavailable("redis down".into()).into();
        assert!(err.to_string().contains("redis down"));
    }
}
