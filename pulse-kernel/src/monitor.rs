/**
 * HEARTBEAT MONITOR - Orchestrateur du moniteur de heartbeats
 *
 * ROLE :
 * Owns the lifecycle (Stopped -> Starting -> Running -> Stopping -> Stopped),
 * consumes heartbeats, and every `deadline` audits each worker role, writes
 * the system snapshots, then resets the interval.
 *
 * ARCHITECTURE :
 * A single task owns the topology. Feed payloads, handle commands and audit
 * ticks are serialized through one `select!`, so a worker is never recorded
 * into while it is being audited or reset. Heartbeats that arrive during a
 * pass wait in the channels and land in the next interval.
 */

use crate::config::MonitorConfig;
use crate::error::{Discard, MonitorError, StoreError};
use crate::feed::HeartbeatFeed;
use crate::health::{HealthTracker, MonitorState};
use crate::models::HeartbeatMessage;
use crate::store::SharedStore;
use crate::topology::{parse_topology, Topology};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Instances seen so far for one worker, tagged with the audit interval they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalCount {
    pub interval: u64,
    pub count: usize,
}

enum Command {
    Heartbeat(HeartbeatMessage),
    InstanceCount {
        worker_id: String,
        reply: oneshot::Sender<Option<IntervalCount>>,
    },
}

/// Clonable entry point into a running monitor. Never waits on the store.
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl MonitorHandle {
    /// Queues a decoded heartbeat for intake.
    pub fn update(&self, msg: HeartbeatMessage) -> Result<(), MonitorError> {
        self.tx
            .send(Command::Heartbeat(msg))
            .map_err(|_| MonitorError::NotRunning)
    }

    /// Instances recorded for `worker_id` in the current interval, `None` if unknown.
    pub async fn instance_count(&self, worker_id: &str) -> Result<Option<IntervalCount>, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::InstanceCount {
                worker_id: worker_id.to_string(),
                reply,
            })
            .map_err(|_| MonitorError::NotRunning)?;
        rx.await.map_err(|_| MonitorError::NotRunning)
    }
}

struct Running {
    handle: MonitorHandle,
    shutdown: CancellationToken,
    task: JoinHandle<Topology>,
}

pub struct HeartbeatMonitor {
    config: MonitorConfig,
    store: SharedStore,
    feed: Box<dyn HeartbeatFeed>,
    health: HealthTracker,
    running: Option<Running>,
}

impl HeartbeatMonitor {
    pub fn new(config: MonitorConfig, store: SharedStore, feed: Box<dyn HeartbeatFeed>, health: HealthTracker) -> Self {
        health.set_state(MonitorState::Stopped);
        Self {
            config,
            store,
            feed,
            health,
            running: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.health.state()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Handle of the running monitor.
    pub fn handle(&self) -> Option<MonitorHandle> {
        self.running.as_ref().map(|r| r.handle.clone())
    }

    /// Builds the topology, registers system ids, subscribes to the feed and
    /// arms the audit timer. Any failure leaves the monitor stopped.
    pub async fn start(&mut self) -> Result<MonitorHandle, MonitorError> {
        if self.running.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        info!("heartbeat monitor initializing");
        self.health.set_state(MonitorState::Starting);

        match self.try_start().await {
            Ok(running) => {
                let handle = running.handle.clone();
                self.running = Some(running);
                self.health.set_state(MonitorState::Running);
                info!(deadline_secs = self.config.deadline.as_secs(), "heartbeat monitor running");
                Ok(handle)
            }
            Err(e) => {
                error!("heartbeat monitor failed to start: {e}");
                self.health.set_state(MonitorState::Stopped);
                Err(e)
            }
        }
    }

    async fn try_start(&mut self) -> Result<Running, MonitorError> {
        let topology = parse_topology(&self.config.monitored_systems)?;
        let system_ids = topology.system_ids();
        self.store.register_system_ids(&system_ids).await?;
        info!(
            systems = system_ids.len(),
            workers = topology.workers().len(),
            "topology registered"
        );

        let shutdown = CancellationToken::new();
        let feed = self.feed.subscribe(shutdown.child_token()).await?;

        let (tx, commands) = mpsc::unbounded_channel();
        let task = MonitorTask {
            topology,
            store: self.store.clone(),
            health: self.health.clone(),
            deadline: self.config.deadline,
            interval: 0,
        };
        let task = tokio::spawn(task.run(feed, commands, shutdown.clone()));

        Ok(Running {
            handle: MonitorHandle { tx },
            shutdown,
            task,
        })
    }

    /// Cancels the timer and the feed, waits for any in-flight audit pass to
    /// complete and hands back the final topology.
    pub async fn stop(&mut self) -> Result<Topology, MonitorError> {
        let running = self.running.take().ok_or(MonitorError::NotRunning)?;
        info!("heartbeat monitor stopping");
        self.health.set_state(MonitorState::Stopping);

        running.shutdown.cancel();
        let result = running.task.await;
        self.health.set_state(MonitorState::Stopped);
        result.map_err(|e| MonitorError::Task(e.to_string()))
    }
}

/// Discard rules, then record. `now` is in seconds since epoch.
pub fn apply_heartbeat(
    topology: &mut Topology,
    msg: &HeartbeatMessage,
    now: f64,
    deadline: Duration,
) -> Result<(), Discard> {
    // 1. unknown worker: monitored workers must be in the config
    let wkr = topology
        .worker_mut(&msg.worker_id)
        .ok_or_else(|| Discard::UnknownWorker(msg.worker_id.clone()))?;
    // 2. older than one full interval
    if msg.timestamp < now - deadline.as_secs_f64() {
        return Err(Discard::Stale {
            worker_id: msg.worker_id.clone(),
            age_secs: now - msg.timestamp,
        });
    }
    wkr.record(&msg.hostname, msg.pid);
    Ok(())
}

fn unix_now(now: OffsetDateTime) -> f64 {
    now.unix_timestamp_nanos() as f64 / 1e9
}

struct MonitorTask {
    topology: Topology,
    store: SharedStore,
    health: HealthTracker,
    deadline: Duration,
    interval: u64,
}

impl MonitorTask {
    async fn run(
        mut self,
        mut feed: mpsc::Receiver<Vec<u8>>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) -> Topology {
        // first audit one full interval after start
        let mut ticker = interval_at(Instant::now() + self.deadline, self.deadline);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut feed_open = true;
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.periodic_task().await,
                payload = feed.recv(), if feed_open => match payload {
                    Some(payload) => self.consume_payload(&payload),
                    None => {
                        warn!("heartbeat feed closed");
                        feed_open = false;
                    }
                },
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => commands_open = false,
                },
            }
        }

        info!(intervals = self.interval, "heartbeat monitor task stopped");
        self.topology
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Heartbeat(msg) => self.update(&msg),
            Command::InstanceCount { worker_id, reply } => {
                let count = self.topology.worker(&worker_id).map(|w| IntervalCount {
                    interval: self.interval,
                    count: w.instance_count(),
                });
                let _ = reply.send(count);
            }
        }
    }

    fn consume_payload(&mut self, payload: &[u8]) {
        match HeartbeatMessage::from_slice(payload) {
            Ok(msg) => self.update(&msg),
            Err(e) => {
                let discard = Discard::Malformed(e.to_string());
                warn!("Discarding heartbeat: {discard}");
                self.health.record_discard(&discard);
            }
        }
    }

    fn update(&mut self, msg: &HeartbeatMessage) {
        trace!(worker_id = %msg.worker_id, hostname = %msg.hostname, pid = msg.pid, "received heartbeat");
        let now = unix_now(OffsetDateTime::now_utc());
        match apply_heartbeat(&mut self.topology, msg, now, self.deadline) {
            Ok(()) => self.health.record_heartbeat(),
            Err(discard) => {
                debug!(worker_id = %msg.worker_id, "Discarding heartbeat: {discard}");
                self.health.record_discard(&discard);
            }
        }
    }

    /// Audit every worker, write every system, then reset. A store failure
    /// abandons the remaining writes of this pass; the reset still happens.
    async fn periodic_task(&mut self) {
        let now = OffsetDateTime::now_utc();
        let result = self.audit_and_sync(now).await;
        self.health.record_audit(result.is_ok());
        if let Err(e) = result {
            error!(interval = self.interval, "audit pass abandoned: {e}");
        }
        self.topology.reset_checkin_state();
        self.interval += 1;
    }

    async fn audit_and_sync(&mut self, now: OffsetDateTime) -> Result<(), StoreError> {
        let worker_ids: Vec<String> = self
            .topology
            .systems()
            .iter()
            .flat_map(|s| s.worker_ids().iter().cloned())
            .collect();

        for worker_id in &worker_ids {
            let Some(wkr) = self.topology.worker_mut(worker_id) else {
                continue;
            };
            match wkr.audit(&*self.store, now).await {
                Ok(outcome) => self.health.record_outcome(outcome),
                Err(e) => {
                    error!(%worker_id, "audit failed: {e}");
                    return Err(e);
                }
            }
        }

        for snapshot in self.topology.snapshots(now.unix_timestamp()) {
            if let Err(e) = self.store.write_system_snapshot(&snapshot).await {
                error!(system_id = %snapshot.id, "failed to write system snapshot: {e}");
                return Err(e);
            }
        }
        debug!(interval = self.interval, workers = worker_ids.len(), "audit pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SystemEntry, WorkerEntry};
    use std::collections::BTreeMap;

    fn topology() -> Topology {
        let mut workers = BTreeMap::new();
        workers.insert(
            "dispatcher".to_string(),
            WorkerEntry { name: Some("dispatcher".into()), min_procs: Some(2) },
        );
        let mut systems = BTreeMap::new();
        systems.insert(
            "sms-core".to_string(),
            SystemEntry { system_id: Some("sms-core".into()), workers: Some(workers) },
        );
        parse_topology(&systems).unwrap()
    }

    fn heartbeat(worker_id: &str, timestamp: f64, hostname: &str, pid: u32) -> HeartbeatMessage {
        HeartbeatMessage {
            worker_id: worker_id.into(),
            timestamp,
            hostname: hostname.into(),
            pid,
            version: None,
            system_id: None,
            worker_name: None,
        }
    }

    const NOW: f64 = 1_700_000_000.0;
    const DEADLINE: Duration = Duration::from_secs(30);

    #[test]
    fn test_fresh_heartbeat_recorded() {
        let mut topo = topology();
        let msg = heartbeat("sms-core:dispatcher", NOW - 1.0, "a", 1);
        apply_heartbeat(&mut topo, &msg, NOW, DEADLINE).unwrap();
        apply_heartbeat(&mut topo, &msg, NOW, DEADLINE).unwrap();
        assert_eq!(topo.worker("sms-core:dispatcher").unwrap().instance_count(), 1);
    }

    #[test]
    fn test_stale_heartbeat_never_recorded() {
        let mut topo = topology();
        let msg = heartbeat("sms-core:dispatcher", NOW - 30.5, "a", 1);
        let err = apply_heartbeat(&mut topo, &msg, NOW, DEADLINE).unwrap_err();
        assert!(matches!(err, Discard::Stale { .. }));
        assert_eq!(topo.worker("sms-core:dispatcher").unwrap().instance_count(), 0);

        // exactly one interval old is still accepted
        let msg = heartbeat("sms-core:dispatcher", NOW - 30.0, "a", 1);
        assert!(apply_heartbeat(&mut topo, &msg, NOW, DEADLINE).is_ok());
    }

    #[test]
    fn test_unknown_worker_mutates_nothing() {
        let mut topo = topology();
        let msg = heartbeat("sms-core:router", NOW, "a", 1);
        let err = apply_heartbeat(&mut topo, &msg, NOW, DEADLINE).unwrap_err();
        assert_eq!(err, Discard::UnknownWorker("sms-core:router".into()));
        assert!(topo.workers().values().all(|w| w.instance_count() == 0));
    }

    #[test]
    fn test_stale_unknown_worker_reports_unknown() {
        let mut topo = topology();
        let msg = heartbeat("nope", 0.0, "a", 1);
        assert!(matches!(
            apply_heartbeat(&mut topo, &msg, NOW, DEADLINE),
            Err(Discard::UnknownWorker(_))
        ));
    }
}
