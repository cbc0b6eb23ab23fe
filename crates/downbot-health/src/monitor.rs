//! Poll scheduler: the per-target probe / recover / notify loop.
//!
//! Each cycle: probe the status URL and classify the outcome; on a hard
//! failure, try the refresh URL; fold the verdict into [`MonitorState`];
//! queue an alert on a transition edge; sleep for the poll interval.
//!
//! Probe and recovery run in their own tasks. A panic there ends the cycle
//! with a hard failure instead of taking the loop down with it.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use downbot_core::MonitorSpec;
use downbot_notify::{AlertMessage, NotifierHandle};

use crate::classify::{Classifier, HealthVerdict};
use crate::probe::{Expect, Probe};
use crate::recovery::{attempt_recovery, combine};
use crate::tracker::{MonitorState, Transition};

/// Where a monitor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Probing,
    Recovering,
    Notifying,
    Sleeping,
}

/// Read-only view of a monitor, published after every phase change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub id: String,
    pub is_broke: bool,
    pub phase: Phase,
    pub cycles: u64,
    pub last_verdict: Option<HealthVerdict>,
}

impl MonitorSnapshot {
    pub fn initial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_broke: false,
            phase: Phase::Idle,
            cycles: 0,
            last_verdict: None,
        }
    }
}

/// What one cycle decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub verdict: HealthVerdict,
    pub transition: Transition,
    pub recovery_attempted: bool,
}

/// Monitors a single target. Owns that target's [`MonitorState`].
pub struct Monitor {
    spec: Arc<MonitorSpec>,
    probe: Arc<dyn Probe>,
    classifier: Arc<Classifier>,
    state: MonitorState,
    notifier: NotifierHandle,
    recovery_message: String,
    snapshots: Arc<watch::Sender<MonitorSnapshot>>,
    cycles: u64,
}

impl Monitor {
    pub fn new(
        spec: Arc<MonitorSpec>,
        probe: Arc<dyn Probe>,
        notifier: NotifierHandle,
        recovery_message: impl Into<String>,
    ) -> Self {
        let (snapshots, _) = watch::channel(MonitorSnapshot::initial(&spec.id));
        Self {
            classifier: Arc::new(Classifier::from_spec(&spec)),
            spec,
            probe,
            state: MonitorState::default(),
            notifier,
            recovery_message: recovery_message.into(),
            snapshots: Arc::new(snapshots),
            cycles: 0,
        }
    }

    /// Start from a previously published state instead of not-broke.
    pub fn with_state(mut self, state: MonitorState) -> Self {
        self.state = state;
        self
    }

    /// Publish snapshots on an existing channel (kept across restarts).
    pub fn with_snapshots(mut self, snapshots: Arc<watch::Sender<MonitorSnapshot>>) -> Self {
        self.cycles = snapshots.borrow().cycles;
        self.snapshots = snapshots;
        self
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.subscribe()
    }

    /// Run cycles until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown is only observed between cycles and while sleeping, so an
    /// in-flight probe always runs to completion or its timeout.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            monitor = %self.spec.id,
            url = %self.spec.primary_status_url,
            interval = ?self.spec.poll_interval,
            "monitor starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle().await;

            self.set_phase(Phase::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.spec.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_phase(Phase::Idle);
        info!(monitor = %self.spec.id, "monitor stopped");
    }

    /// Run one probe / recover / notify cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        self.set_phase(Phase::Probing);

        let primary = self.evaluate_primary().await;

        let (verdict, recovery_attempted) = match primary {
            Some(HealthVerdict::HardFailure { diagnostics }) => {
                self.set_phase(Phase::Recovering);
                (self.recover(diagnostics).await, true)
            }
            Some(verdict) => (verdict, false),
            None => (
                HealthVerdict::HardFailure {
                    diagnostics: "internal error during health check".to_string(),
                },
                false,
            ),
        };

        let transition = self.state.apply(&verdict);
        match transition {
            Transition::BecameBroke => {
                warn!(monitor = %self.spec.id, %verdict, "target went down")
            }
            Transition::BecameOk => info!(monitor = %self.spec.id, "target is back up"),
            Transition::None => {
                debug!(monitor = %self.spec.id, %verdict, broke = self.state.is_broke(), "no change")
            }
        }

        if let Some(message) = self.alert_for(transition, &verdict) {
            self.set_phase(Phase::Notifying);
            self.notifier.notify(message);
        }

        self.snapshots.send_modify(|s| {
            s.is_broke = self.state.is_broke();
            s.cycles = self.cycles;
            s.last_verdict = Some(verdict.clone());
        });

        CycleReport {
            verdict,
            transition,
            recovery_attempted,
        }
    }

    /// Probe the status URL and classify. `None` if the evaluation panicked.
    async fn evaluate_primary(&self) -> Option<HealthVerdict> {
        let probe = Arc::clone(&self.probe);
        let classifier = Arc::clone(&self.classifier);
        let url = self.spec.primary_status_url.to_string();
        let timeout = self.spec.request_timeout;

        guarded(&self.spec.id, async move {
            let outcome = probe
                .probe_for(&url, timeout, Expect::SuccessStatus, classifier.marker())
                .await;
            classifier.classify(&outcome)
        })
        .await
        .ok()
    }

    async fn recover(&self, primary_diagnostics: String) -> HealthVerdict {
        let probe = Arc::clone(&self.probe);
        let url = self.spec.refresh_url.to_string();
        let timeout = self.spec.request_timeout;
        let diagnostics = primary_diagnostics.clone();

        match guarded(&self.spec.id, async move {
            attempt_recovery(probe.as_ref(), &url, timeout, &diagnostics).await
        })
        .await
        {
            Ok(verdict) => verdict,
            Err(panic) => HealthVerdict::HardFailure {
                diagnostics: combine(
                    &primary_diagnostics,
                    &format!("internal error during recovery: {panic}"),
                ),
            },
        }
    }

    fn alert_for(&self, transition: Transition, verdict: &HealthVerdict) -> Option<AlertMessage> {
        match transition {
            Transition::None => None,
            Transition::BecameOk => Some(AlertMessage::plain(&self.recovery_message)),
            Transition::BecameBroke => Some(AlertMessage::diagnostics(
                format!("{} is dead:", self.spec.id),
                verdict.details().unwrap_or_default(),
            )),
        }
    }

    fn set_phase(&self, phase: Phase) {
        trace!(monitor = %self.spec.id, ?phase, "phase");
        self.snapshots.send_modify(|s| s.phase = phase);
    }
}

/// Run `fut` in its own task; a panic becomes `Err(message)`.
pub(crate) async fn guarded<T, F>(monitor: &str, fut: F) -> Result<T, String>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(%monitor, panic = %message, "health check panicked");
            Err(message)
        }
        Err(e) => {
            error!(%monitor, error = %e, "health check task cancelled");
            Err(e.to_string())
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
