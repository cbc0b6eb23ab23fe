//! Monitor supervisor: owns one background task per monitored target.
//!
//! Each slot runs its [`Monitor`] under a restart policy. If a monitor
//! task dies without being asked to stop, the exit callback fires and the
//! monitor is restarted after a backoff, resuming from its last published
//! broke/not-broke state so a restart does not re-alert.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use downbot_core::MonitorSpec;
use downbot_notify::NotifierHandle;

use crate::monitor::{Monitor, MonitorSnapshot, Phase, panic_message};
use crate::probe::Probe;
use crate::tracker::MonitorState;

/// Callback invoked when a monitor task ends without being stopped.
///
/// The host can use this to surface crashes (log, alert, metrics).
pub type ExitCallback = Arc<dyn Fn(String, MonitorExit) -> BoxFuture + Send + Sync>;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Why a monitor task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    /// The task panicked outside a guarded cycle.
    Panicked(String),
    /// The task returned while no shutdown was requested.
    Returned,
    /// The restart budget is spent; the monitor stays down.
    GaveUp { restarts: u32 },
}

/// How often and how fast a dead monitor is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Per-target supervisor state.
struct MonitorSlot {
    /// Handle to the supervising task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this monitor.
    shutdown_tx: watch::Sender<bool>,
    /// Latest snapshot published by the monitor.
    snapshots: watch::Receiver<MonitorSnapshot>,
}

/// Manages monitors for all configured targets.
pub struct MonitorSupervisor {
    probe: Arc<dyn Probe>,
    notifier: NotifierHandle,
    recovery_message: String,
    policy: RestartPolicy,
    /// How long `stop` waits for an in-flight cycle before aborting.
    shutdown_grace: Duration,
    /// Active monitors: monitor id → slot.
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
    on_exit: Option<ExitCallback>,
}

impl MonitorSupervisor {
    pub fn new(
        probe: Arc<dyn Probe>,
        notifier: NotifierHandle,
        recovery_message: impl Into<String>,
    ) -> Self {
        Self {
            probe,
            notifier,
            recovery_message: recovery_message.into(),
            policy: RestartPolicy::default(),
            shutdown_grace: Duration::from_secs(30),
            monitors: Arc::new(RwLock::new(HashMap::new())),
            on_exit: None,
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set a callback for unexpected monitor exits.
    pub fn with_exit_callback(mut self, callback: ExitCallback) -> Self {
        self.on_exit = Some(callback);
        self
    }

    /// Start monitoring a target.
    ///
    /// A running monitor with the same id is stopped and joined first; the
    /// replacement resumes from its last published snapshot, so an ongoing
    /// outage is not reported twice.
    pub async fn start(&self, spec: MonitorSpec) {
        let id = spec.id.clone();
        let spec = Arc::new(spec);

        let previous = self.monitors.write().await.remove(&id);
        let initial = match previous {
            Some(slot) => {
                let snapshots = slot.snapshots.clone();
                let _ = slot.shutdown_tx.send(true);
                self.join(&id, slot).await;
                // Read after the join so an in-flight cycle's result counts.
                let last = snapshots.borrow().clone();
                debug!(monitor = %id, is_broke = last.is_broke, "replacing monitor");
                MonitorSnapshot {
                    phase: Phase::Idle,
                    ..last
                }
            }
            None => MonitorSnapshot::initial(&id),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let launch = self.launcher(Arc::clone(&spec), Arc::new(snapshot_tx), shutdown_rx.clone());

        let handle = tokio::spawn(supervise(
            id.clone(),
            self.policy,
            shutdown_rx,
            self.on_exit.clone(),
            launch,
        ));

        self.monitors.write().await.insert(
            id.clone(),
            MonitorSlot {
                handle,
                shutdown_tx,
                snapshots: snapshot_rx,
            },
        );

        info!(monitor = %id, url = %spec.primary_status_url, "monitor started");
    }

    /// Builds a fresh [`Monitor`] run per call, seeded from the last snapshot.
    fn launcher(
        &self,
        spec: Arc<MonitorSpec>,
        snapshots: Arc<watch::Sender<MonitorSnapshot>>,
        shutdown: watch::Receiver<bool>,
    ) -> impl FnMut() -> BoxFuture + Send + 'static {
        let probe = Arc::clone(&self.probe);
        let notifier = self.notifier.clone();
        let recovery_message = self.recovery_message.clone();
        move || -> BoxFuture {
            let is_broke = snapshots.borrow().is_broke;
            let monitor = Monitor::new(
                Arc::clone(&spec),
                Arc::clone(&probe),
                notifier.clone(),
                recovery_message.clone(),
            )
            .with_state(MonitorState::restored(is_broke))
            .with_snapshots(Arc::clone(&snapshots));
            Box::pin(monitor.run(shutdown.clone()))
        }
    }

    /// Stop monitoring a target, letting an in-flight cycle finish.
    pub async fn stop(&self, id: &str) {
        let slot = self.monitors.write().await.remove(id);
        if let Some(slot) = slot {
            let _ = slot.shutdown_tx.send(true);
            self.join(id, slot).await;
            info!(monitor = %id, "monitor stopped");
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let slots: Vec<_> = self.monitors.write().await.drain().collect();
        for (_, slot) in &slots {
            let _ = slot.shutdown_tx.send(true);
        }
        for (id, slot) in slots {
            self.join(&id, slot).await;
            debug!(monitor = %id, "monitor stopped");
        }
        info!("all monitors stopped");
    }

    async fn join(&self, id: &str, mut slot: MonitorSlot) {
        if tokio::time::timeout(self.shutdown_grace, &mut slot.handle)
            .await
            .is_err()
        {
            warn!(monitor = %id, grace = ?self.shutdown_grace, "monitor did not stop in time, aborting");
            slot.handle.abort();
        }
    }

    /// List monitor ids with active slots.
    pub async fn active_monitors(&self) -> Vec<String> {
        let monitors = self.monitors.read().await;
        let mut ids: Vec<_> = monitors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Check if a target has an active monitor.
    pub async fn is_monitoring(&self, id: &str) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(id)
    }

    /// Latest snapshot of every monitor, sorted by id.
    pub async fn snapshots(&self) -> Vec<MonitorSnapshot> {
        let monitors = self.monitors.read().await;
        let mut snapshots: Vec<_> = monitors
            .values()
            .map(|slot| slot.snapshots.borrow().clone())
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    pub async fn snapshot(&self, id: &str) -> Option<MonitorSnapshot> {
        let monitors = self.monitors.read().await;
        monitors.get(id).map(|slot| slot.snapshots.borrow().clone())
    }
}

/// Run `launch()` in a task, restarting it per `policy` until shutdown.
async fn supervise<F, Fut>(
    id: String,
    policy: RestartPolicy,
    mut shutdown: watch::Receiver<bool>,
    on_exit: Option<ExitCallback>,
    mut launch: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut restarts = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        let result = tokio::spawn(launch()).await;

        let stopping = *shutdown.borrow() || shutdown.has_changed().is_err();
        if stopping {
            return;
        }

        let exit = match result {
            Ok(()) => MonitorExit::Returned,
            Err(e) if e.is_panic() => MonitorExit::Panicked(panic_message(e.into_panic())),
            Err(e) => {
                debug!(monitor = %id, error = %e, "monitor task cancelled");
                return;
            }
        };

        error!(monitor = %id, ?exit, restarts, "monitor task exited unexpectedly");
        if let Some(ref cb) = on_exit {
            cb(id.clone(), exit).await;
        }

        if restarts >= policy.max_restarts {
            error!(monitor = %id, restarts, "restart limit reached, monitor stays down");
            if let Some(ref cb) = on_exit {
                cb(id.clone(), MonitorExit::GaveUp { restarts }).await;
            }
            return;
        }
        restarts += 1;

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return,
        }
        backoff = (backoff * 2).min(policy.max_backoff);
        info!(monitor = %id, restarts, "restarting monitor");
    }
}
