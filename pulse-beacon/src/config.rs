//! Beacon configuration
//!
//! Read from the TOML file named by `PULSE_BEACON_CONFIG` (default
//! `beacon.toml`). Every key has a default, and a missing file means defaults.

use anyhow::{Context, Result};
use pulse_kernel::config::DEFAULT_HEARTBEAT_TOPIC;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_ENV: &str = "PULSE_BEACON_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "beacon.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub mqtt: MqttConfig,
    pub beacon: BeaconInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconInfo {
    pub system_id: String,
    pub worker_name: String,
    pub hostname: String,
    /// Seconds between two heartbeats; keep it below the monitor deadline.
    pub interval_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            topic: DEFAULT_HEARTBEAT_TOPIC.to_string(),
        }
    }
}

impl Default for BeaconInfo {
    fn default() -> Self {
        Self {
            system_id: "default".to_string(),
            worker_name: "worker".to_string(),
            hostname: hostname::get().unwrap_or_default().to_string_lossy().to_string(),
            interval_secs: 10,
        }
    }
}

impl BeaconConfig {
    /// Load config from `PULSE_BEACON_CONFIG`, falling back to defaults.
    pub async fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path).await
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: BeaconConfig =
            toml::from_str(&content).with_context(|| format!("Invalid beacon config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.beacon.interval_secs == 0 {
            anyhow::bail!("beacon.interval_secs must be at least 1");
        }
        if self.beacon.system_id.is_empty() || self.beacon.worker_name.is_empty() {
            anyhow::bail!("beacon.system_id and beacon.worker_name must not be empty");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.beacon.interval_secs)
    }

    /// MQTT client id, derived from the worker id and pid when not configured.
    pub fn client_id(&self, pid: u32) -> String {
        self.mqtt.client_id.clone().unwrap_or_else(|| {
            format!(
                "pulse-beacon-{}-{}-{pid}",
                self.beacon.system_id, self.beacon.worker_name
            )
        })
    }
}
