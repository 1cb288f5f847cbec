use anyhow::{Context, Result};
use pulse_beacon::{BeaconConfig, HeartbeatPublisher};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pulse_beacon=info")),
        )
        .init();

    let config = BeaconConfig::load().await.context("Failed to load beacon config")?;
    let pid = std::process::id();

    let mut mqtt_options = MqttOptions::new(
        config.client_id(pid),
        &config.mqtt.broker_host,
        config.mqtt.broker_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    mqtt_options.set_clean_session(true);
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);

    let shutdown = CancellationToken::new();

    // drive the connection; publishes only leave once the event loop is polled
    let events = shutdown.clone();
    let connection = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = events.cancelled() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
        debug!("MQTT event loop stopped");
    });

    let publisher = HeartbeatPublisher::new(
        client.clone(),
        config.mqtt.topic.clone(),
        config.beacon.system_id.clone(),
        config.beacon.worker_name.clone(),
        config.beacon.hostname.clone(),
        pid,
        config.interval(),
    );
    let publishing = tokio::spawn(publisher.run(shutdown.clone()));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    shutdown.cancel();

    publishing.await.context("Heartbeat publisher panicked")?;
    if let Err(e) = client.disconnect().await {
        debug!("MQTT disconnect failed: {e}");
    }
    connection.await.context("MQTT event loop panicked")?;
    Ok(())
}
