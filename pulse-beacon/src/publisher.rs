use anyhow::{Context, Result};
use async_trait::async_trait;
use pulse_kernel::models::HeartbeatMessage;
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Where heartbeats go.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl HeartbeatSink for AsyncClient {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .context("Failed to publish heartbeat")
    }
}

/// Announces one worker process every `interval`.
pub struct HeartbeatPublisher<S> {
    sink: S,
    topic: String,
    system_id: String,
    worker_name: String,
    hostname: String,
    pid: u32,
    interval: Duration,
}

impl<S: HeartbeatSink> HeartbeatPublisher<S> {
    pub fn new(
        sink: S,
        topic: impl Into<String>,
        system_id: impl Into<String>,
        worker_name: impl Into<String>,
        hostname: impl Into<String>,
        pid: u32,
        interval: Duration,
    ) -> Self {
        Self {
            sink,
            topic: topic.into(),
            system_id: system_id.into(),
            worker_name: worker_name.into(),
            hostname: hostname.into(),
            pid,
            interval,
        }
    }

    pub fn heartbeat(&self) -> HeartbeatMessage {
        HeartbeatMessage::new(&self.system_id, &self.worker_name, self.hostname.clone(), self.pid)
    }

    /// Send heartbeat stamped now
    pub async fn publish_once(&self) -> Result<()> {
        let heartbeat = self.heartbeat();
        let payload = serde_json::to_vec(&heartbeat).context("Failed to serialize heartbeat message")?;
        self.sink.send(&self.topic, payload).await?;
        debug!(worker_id = %heartbeat.worker_id, "Heartbeat sent");
        Ok(())
    }

    /// Publishes immediately, then every interval until `shutdown` is cancelled.
    /// Failed publishes are logged and the loop keeps going.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            system_id = %self.system_id,
            worker_name = %self.worker_name,
            pid = self.pid,
            interval_secs = self.interval.as_secs(),
            "heartbeat publisher started"
        );
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.publish_once().await {
                        error!("Failed to send heartbeat: {e:#}");
                    }
                }
            }
        }
        info!("heartbeat publisher stopped");
    }
}
