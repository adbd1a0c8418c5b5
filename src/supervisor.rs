//! Bridge Supervisor
//!
//! Wires the lock watcher to the mint coordinator and owns their lifecycles.
//!
//! Start order: mint coordinator (wait until it is consuming), lock watcher,
//! then the health and statistics timers. Stop order is reversed for the two
//! loops: the watcher stops producing first, then the coordinator drains and
//! stops, then the timers. The supervisor holds no bridge state of its own; it
//! aggregates the status its children publish.
//!
//! Each loop runs inside a monitoring task. If the loop panics, the monitor
//! clears its `running` flag, so the health timer and [`BridgeSupervisor::status`]
//! both report it as down.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::minter::{CoordinatorStatus, MintClient, MintCoordinator};
use crate::monitor::{ChainReader, LockWatcher, WatcherStatus};
use crate::validator::EventValidator;

// ============================================================================
// STATUS STRUCTURES
// ============================================================================

/// Aggregated bridge status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStatus {
    pub watcher_running: bool,
    pub coordinator_running: bool,
    pub queue_length: usize,
    pub pending_mints: usize,
    pub in_flight: Option<u64>,
    pub last_processed_block: Option<u64>,
    pub current_height: Option<u64>,
    /// Operations that reached a terminal state
    pub total_processed: u64,
    /// Watcher tick errors plus failed mint attempts
    pub total_errors: u64,
    pub total_accepted: u64,
    pub total_confirmed: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub total_duplicates: u64,
}

impl BridgeStatus {
    /// Combines the two child snapshots.
    pub fn aggregate(watcher: &WatcherStatus, coordinator: &CoordinatorStatus) -> Self {
        Self {
            watcher_running: watcher.running,
            coordinator_running: coordinator.running,
            queue_length: coordinator.queue_length,
            pending_mints: coordinator.pending_mints,
            in_flight: coordinator.in_flight,
            last_processed_block: watcher.last_processed_block,
            current_height: watcher.current_height,
            total_processed: coordinator.total_processed,
            total_errors: watcher.total_errors + coordinator.total_errors,
            total_accepted: watcher.events_accepted,
            total_confirmed: coordinator.total_confirmed,
            total_failed: coordinator.total_failed,
            total_rejected: watcher.events_rejected,
            total_duplicates: coordinator.total_duplicates,
        }
    }
}

/// Liveness of the two bridge loops.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Both loops alive
    pub healthy: bool,
    pub watcher_alive: bool,
    pub coordinator_alive: bool,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    fn from_status(status: &BridgeStatus) -> Self {
        Self {
            healthy: status.watcher_running && status.coordinator_running,
            watcher_alive: status.watcher_running,
            coordinator_alive: status.coordinator_running,
            checked_at: Utc::now(),
        }
    }
}

/// Handles of the running loops.
struct RunningTasks {
    watcher_cancel: CancellationToken,
    watcher: JoinHandle<()>,
    coordinator_cancel: CancellationToken,
    coordinator: JoinHandle<()>,
    timers_cancel: CancellationToken,
    timers: Vec<JoinHandle<()>>,
}

// ============================================================================
// BRIDGE SUPERVISOR
// ============================================================================

/// Starts, stops and observes the lock watcher and the mint coordinator.
pub struct BridgeSupervisor {
    config: Config,
    reader: Arc<dyn ChainReader>,
    client: Arc<dyn MintClient>,
    watcher_status: Arc<RwLock<WatcherStatus>>,
    coordinator_status: Arc<RwLock<CoordinatorStatus>>,
    tasks: Option<RunningTasks>,
}

impl BridgeSupervisor {
    /// Creates a new supervisor. Nothing runs until [`start`](Self::start).
    ///
    /// # Arguments
    ///
    /// * `config` - Validated bridge configuration
    /// * `reader` - Source chain reader
    /// * `client` - Destination chain client
    pub fn new(config: Config, reader: Arc<dyn ChainReader>, client: Arc<dyn MintClient>) -> Self {
        Self {
            config,
            reader,
            client,
            watcher_status: Arc::new(RwLock::new(WatcherStatus::default())),
            coordinator_status: Arc::new(RwLock::new(CoordinatorStatus::default())),
            tasks: None,
        }
    }

    /// Whether `start` has been called without a matching `stop`.
    pub fn is_started(&self) -> bool {
        self.tasks.is_some()
    }

    /// Starts the bridge.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Both loops and the timers are running
    /// * `Err(anyhow::Error)` - Already started, invalid watcher settings, or the
    ///   coordinator exited before signalling readiness
    pub async fn start(&mut self) -> Result<()> {
        if self.tasks.is_some() {
            anyhow::bail!("Bridge supervisor already started");
        }

        info!(
            "Starting bridge: {} -> {}",
            self.config.source_chain.name, self.config.destination_chain.name
        );

        let (sender, receiver) = mpsc::unbounded_channel();

        // Built up front so a bad start_block fails before anything is spawned
        let watcher = LockWatcher::new(
            self.config.watcher.clone(),
            self.reader.clone(),
            EventValidator::new(&self.config.validation),
            sender,
            self.watcher_status.clone(),
        )
        .context("Failed to create lock watcher")?;

        let coordinator = MintCoordinator::new(
            &self.config,
            self.client.clone(),
            receiver,
            self.coordinator_status.clone(),
        );

        let coordinator_cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let coordinator = spawn_monitored(
            "Mint coordinator",
            coordinator.run(coordinator_cancel.clone(), ready_tx),
            self.coordinator_status.clone(),
            |status: &mut CoordinatorStatus| {
                status.running = false;
                status.in_flight = None;
            },
        );
        ready_rx
            .await
            .context("Mint coordinator exited before it was ready")?;
        info!("Mint coordinator ready");

        let watcher_cancel = CancellationToken::new();
        let watcher = spawn_monitored(
            "Lock watcher",
            watcher.run(watcher_cancel.clone()),
            self.watcher_status.clone(),
            |status: &mut WatcherStatus| status.running = false,
        );
        info!("Lock watcher started");

        let timers_cancel = CancellationToken::new();
        let timers = vec![
            tokio::spawn(health_loop(
                self.watcher_status.clone(),
                self.coordinator_status.clone(),
                Duration::from_millis(self.config.supervisor.health_check_interval_ms),
                timers_cancel.clone(),
            )),
            tokio::spawn(stats_loop(
                self.watcher_status.clone(),
                self.coordinator_status.clone(),
                Duration::from_millis(self.config.supervisor.stats_interval_ms),
                timers_cancel.clone(),
            )),
        ];

        self.tasks = Some(RunningTasks {
            watcher_cancel,
            watcher,
            coordinator_cancel,
            coordinator,
            timers_cancel,
            timers,
        });
        Ok(())
    }

    /// Stops the bridge: watcher first, then coordinator, then timers.
    ///
    /// Calling `stop` on a supervisor that is not running does nothing.
    pub async fn stop(&mut self) {
        let Some(tasks) = self.tasks.take() else {
            debug!("Bridge supervisor not running, nothing to stop");
            return;
        };

        info!("Stopping lock watcher...");
        tasks.watcher_cancel.cancel();
        if let Err(e) = tasks.watcher.await {
            error!("Lock watcher task ended abnormally: {}", e);
        }

        info!("Stopping mint coordinator...");
        tasks.coordinator_cancel.cancel();
        if let Err(e) = tasks.coordinator.await {
            error!("Mint coordinator task ended abnormally: {}", e);
        }

        tasks.timers_cancel.cancel();
        for timer in tasks.timers {
            if let Err(e) = timer.await {
                warn!("Supervisor timer ended abnormally: {}", e);
            }
        }

        let status = self.status().await;
        info!(
            "Bridge stopped: last_block={:?}, accepted={}, confirmed={}, failed={}, rejected={}, duplicates={}, unprocessed={}",
            status.last_processed_block,
            status.total_accepted,
            status.total_confirmed,
            status.total_failed,
            status.total_rejected,
            status.total_duplicates,
            status.pending_mints
        );
    }

    /// Current aggregated status.
    pub async fn status(&self) -> BridgeStatus {
        aggregate(&self.watcher_status, &self.coordinator_status).await
    }

    /// Current liveness of the two loops.
    ///
    /// A loop is alive when it reports running and its task has not finished.
    pub async fn health(&self) -> HealthReport {
        let status = self.status().await;
        let mut report = HealthReport::from_status(&status);
        if let Some(tasks) = &self.tasks {
            report.watcher_alive &= !tasks.watcher.is_finished();
            report.coordinator_alive &= !tasks.coordinator.is_finished();
        }
        report.healthy = report.watcher_alive && report.coordinator_alive;
        report
    }
}

// ============================================================================
// TASKS
// ============================================================================

/// Spawns `task` and, if it panics or is aborted, applies `mark_stopped` to its status.
fn spawn_monitored<S, F>(
    name: &'static str,
    task: F,
    status: Arc<RwLock<S>>,
    mark_stopped: fn(&mut S),
) -> JoinHandle<()>
where
    S: Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = tokio::spawn(task).await {
            error!("ALERT: {} task ended abnormally: {}", name, e);
            mark_stopped(&mut *status.write().await);
        }
    })
}

// ============================================================================
// TIMERS
// ============================================================================

async fn aggregate(
    watcher: &RwLock<WatcherStatus>,
    coordinator: &RwLock<CoordinatorStatus>,
) -> BridgeStatus {
    let watcher = watcher.read().await.clone();
    let coordinator = coordinator.read().await.clone();
    BridgeStatus::aggregate(&watcher, &coordinator)
}

async fn health_loop(
    watcher: Arc<RwLock<WatcherStatus>>,
    coordinator: Arc<RwLock<CoordinatorStatus>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let report = HealthReport::from_status(&aggregate(&watcher, &coordinator).await);
        if report.healthy {
            debug!("Health check passed");
        } else {
            warn!(
                "Health check failed: watcher_alive={}, coordinator_alive={}",
                report.watcher_alive, report.coordinator_alive
            );
        }
    }
}

async fn stats_loop(
    watcher: Arc<RwLock<WatcherStatus>>,
    coordinator: Arc<RwLock<CoordinatorStatus>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let status = aggregate(&watcher, &coordinator).await;
        info!(
            "Bridge stats: last_block={:?}, queued={}, pending={}, confirmed={}, failed={}, rejected={}, errors={}",
            status.last_processed_block,
            status.queue_length,
            status.pending_mints,
            status.total_confirmed,
            status.total_failed,
            status.total_rejected,
            status.total_errors
        );
    }
}
