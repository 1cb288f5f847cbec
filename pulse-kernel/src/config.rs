use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

pub const CONFIG_ENV: &str = "PULSE_KERNEL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pulse.yaml";
pub const DEFAULT_HEARTBEAT_TOPIC: &str = "pulse/health/heartbeat@v1";

/// Validated monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub deadline: Duration,
    pub store: StoreConf,
    pub mqtt: MqttConf,
    pub http: Option<HttpConf>,
    pub monitored_systems: BTreeMap<String, SystemEntry>,
}

/// Config file as written by operators; required keys are checked in `validate`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    deadline: Option<u64>,
    store: Option<StoreConf>,
    mqtt: Option<MqttConf>,
    http: Option<HttpConf>,
    monitored_systems: Option<BTreeMap<String, SystemEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConf {
    JsonFile { path: PathBuf },
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConf {
    pub bind: SocketAddr,
}

/// One entry of `monitored_systems`, validated by the topology parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemEntry {
    pub system_id: Option<String>,
    pub workers: Option<BTreeMap<String, WorkerEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub name: Option<String>,
    #[serde(alias = "min_instances")]
    pub min_procs: Option<i64>,
}

fn default_topic() -> String {
    DEFAULT_HEARTBEAT_TOPIC.into()
}

fn default_client_id() -> String {
    "pulse-kernel".into()
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            topic: default_topic(),
            client_id: default_client_id(),
        }
    }
}

impl MonitorConfig {
    pub fn from_yaml_str(txt: &str, path: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = if txt.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(txt).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?
        };
        raw.validate(path)
    }
}

impl RawConfig {
    fn validate(self, path: &str) -> Result<MonitorConfig, ConfigError> {
        let location = format!("config {path}");
        let missing = |field: &'static str| ConfigError::MissingField {
            field,
            location: location.clone(),
        };

        let deadline = self.deadline.ok_or_else(|| missing("deadline"))?;
        if deadline == 0 {
            return Err(ConfigError::InvalidField {
                field: "deadline",
                location: location.clone(),
                reason: "must be at least one second".into(),
            });
        }
        let store = self.store.ok_or_else(|| missing("store"))?;
        let monitored_systems = self
            .monitored_systems
            .ok_or_else(|| missing("monitored_systems"))?;

        Ok(MonitorConfig {
            deadline: Duration::from_secs(deadline),
            store,
            mqtt: self.mqtt.unwrap_or_default(),
            http: self.http,
            monitored_systems,
        })
    }
}

/// Loads the YAML config named by `PULSE_KERNEL_CONFIG` (default `pulse.yaml`).
///
/// Every field the monitor needs is required, so a missing or invalid file is fatal.
pub async fn load_config() -> Result<MonitorConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    load_config_from(&path).await
}

pub async fn load_config_from(path: &str) -> Result<MonitorConfig, ConfigError> {
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
    MonitorConfig::from_yaml_str(&txt, path)
}
