/**
 * FEED - Source des heartbeats
 *
 * ROLE :
 * Delivers raw heartbeat payloads to the monitor. Decoding and discard rules
 * live in the monitor; a feed only moves bytes.
 *
 * ARCHITECTURE :
 * - MqttFeed : waits for ConnAck + SubAck at startup, then a rumqttc listener
 *   task re-subscribes after every reconnect
 * - ChannelFeed : in-process channel, for tests and embedding
 */

use crate::config::MqttConf;
use crate::error::FeedError;
use crate::health::HealthTracker;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeReasonCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FEED_CAPACITY: usize = 1024;

#[async_trait]
pub trait HeartbeatFeed: Send {
    /// Starts delivery. The returned channel closes once `shutdown` is cancelled
    /// or the transport gives up.
    async fn subscribe(&mut self, shutdown: CancellationToken) -> Result<mpsc::Receiver<Vec<u8>>, FeedError>;
}

/// Feed backed by an in-process channel.
pub struct ChannelFeed {
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelFeed {
    pub fn new() -> (Self, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        (Self { rx: Some(rx) }, tx)
    }
}

#[async_trait]
impl HeartbeatFeed for ChannelFeed {
    async fn subscribe(&mut self, _shutdown: CancellationToken) -> Result<mpsc::Receiver<Vec<u8>>, FeedError> {
        self.rx.take().ok_or(FeedError::AlreadySubscribed)
    }
}

/// Feed consuming heartbeats published on an MQTT topic.
pub struct MqttFeed {
    conf: MqttConf,
    health: HealthTracker,
}

impl MqttFeed {
    pub fn new(conf: MqttConf, health: HealthTracker) -> Self {
        Self { conf, health }
    }
}

/// Upper bound for the initial connect + subscribe handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes on `topic` belong to the feed; `filter` may carry `+`/`#` wildcards.
fn is_heartbeat_topic(topic: &str, filter: &str) -> bool {
    rumqttc::matches(topic, filter)
}

/// Drives the event loop until the broker acknowledged both the connection and
/// the subscription. Heartbeats published in between are forwarded.
async fn await_subscription(
    eventloop: &mut EventLoop,
    filter: &str,
    tx: &mpsc::Sender<Vec<u8>>,
) -> Result<(), String> {
    loop {
        match eventloop.poll().await.map_err(|e| e.to_string())? {
            Event::Incoming(Incoming::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(format!("connection refused: {:?}", ack.code));
                }
            }
            Event::Incoming(Incoming::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|c| matches!(c, SubscribeReasonCode::Failure))
                {
                    return Err("subscription rejected by broker".into());
                }
                return Ok(());
            }
            Event::Incoming(Incoming::Publish(p)) if is_heartbeat_topic(&p.topic, filter) => {
                let _ = tx.try_send(p.payload.to_vec());
            }
            _ => {}
        }
    }
}

#[async_trait]
impl HeartbeatFeed for MqttFeed {
    /// Fails unless the broker accepted the connection and the subscription
    /// within `HANDSHAKE_TIMEOUT`.
    async fn subscribe(&mut self, shutdown: CancellationToken) -> Result<mpsc::Receiver<Vec<u8>>, FeedError> {
        let mut opts = MqttOptions::new(&self.conf.client_id, &self.conf.host, self.conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        let topic = self.conf.topic.clone();
        let failed = |reason: String| FeedError::Subscribe {
            topic: topic.clone(),
            reason,
        };
        client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        match timeout(HANDSHAKE_TIMEOUT, await_subscription(&mut eventloop, &topic, &tx)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(failed(reason)),
            Err(_) => return Err(failed(format!("no SubAck within {}s", HANDSHAKE_TIMEOUT.as_secs()))),
        }
        self.health.mark_feed_connected();
        info!(host = %self.conf.host, port = self.conf.port, %topic, "subscribed to heartbeat feed");

        let health = self.health.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("heartbeat feed shutting down");
                        health.mark_feed_disconnected();
                        break;
                    }
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            health.mark_feed_connected();
                            // clean sessions drop subscriptions on reconnect
                            if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                                warn!(%topic, "re-subscribe failed: {e}");
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(p))) if is_heartbeat_topic(&p.topic, &topic) => {
                            if tx.send(p.payload.to_vec()).await.is_err() {
                                debug!("heartbeat receiver dropped, stopping feed");
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("MQTT error: {e:?}");
                            health.increment_reconnects();
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
