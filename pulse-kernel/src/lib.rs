pub mod config;
pub mod error;
pub mod feed;
pub mod health;
pub mod http;
pub mod models;
pub mod monitor;
pub mod store;
pub mod system;
pub mod topology;
pub mod worker;

pub use config::{load_config, MonitorConfig};
pub use error::{ConfigError, Discard, MonitorError, StoreError};
pub use health::{HealthTracker, MonitorState};
pub use models::{HeartbeatMessage, SystemSnapshot, WorkerIssue};
pub use monitor::{HeartbeatMonitor, MonitorHandle};
pub use store::{IssueStore, StoreReader};
pub use worker::worker_id;
