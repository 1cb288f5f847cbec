/**
 * PULSE KERNEL - Point d'entrée du moniteur de heartbeats
 *
 * RÔLE : config -> store -> MQTT feed -> monitor -> optional HTTP API.
 * Runs until Ctrl-C, then stops the monitor and lets the in-flight audit
 * pass complete.
 */

use anyhow::{Context, Result};
use pulse_kernel::config::load_config;
use pulse_kernel::feed::MqttFeed;
use pulse_kernel::health::HealthTracker;
use pulse_kernel::http::{build_router, AppState};
use pulse_kernel::monitor::HeartbeatMonitor;
use pulse_kernel::store::open_store;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pulse_kernel=info")),
        )
        .init();

    let config = load_config().await.context("failed to load monitor config")?;
    let (store, reader) = open_store(&config.store)
        .await
        .context("failed to open issue store")?;

    let health = HealthTracker::new();
    let feed = MqttFeed::new(config.mqtt.clone(), health.clone());
    let http = config.http.clone();

    let mut monitor = HeartbeatMonitor::new(config, store, Box::new(feed), health.clone());
    let handle = monitor.start().await.context("failed to start heartbeat monitor")?;

    if let Some(http) = http {
        let app = build_router(AppState::from_env(reader, health, Some(handle)));
        let listener = TcpListener::bind(http.bind)
            .await
            .with_context(|| format!("failed to bind HTTP API on {}", http.bind))?;
        info!("listening on http://{}", http.bind);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server error: {e}");
            }
        });
    }

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    let topology = monitor.stop().await.context("heartbeat monitor did not stop cleanly")?;
    info!(workers = topology.workers().len(), "pulse kernel stopped");
    Ok(())
}
