//! downbot-health: availability monitoring for downbot.
//!
//! Probes a target's status endpoint on a fixed interval, falls back to a
//! refresh endpoint on hard failure, tracks a broke/not-broke flag, and
//! queues an alert only when that flag changes.
//!
//! # Architecture
//!
//! ```text
//! MonitorSupervisor
//!   ├── Per-target supervising task (restart policy, exit callback)
//!   │   └── Monitor::run()
//!   │       ├── Probe::probe(status_url)    → ProbeOutcome
//!   │       ├── Classifier::classify()      → HealthVerdict
//!   │       ├── attempt_recovery(refresh)   (HardFailure only)
//!   │       ├── MonitorState::apply()       → Transition
//!   │       └── NotifierHandle::notify()    (on BecameBroke / BecameOk)
//!   └── watch::Receiver<MonitorSnapshot> per target
//! ```
//!
//! # Degradation vs failure
//!
//! A body containing the degradation marker is `SoftDegraded`: the target
//! answered, so the refresh endpoint is not tried. Only a `HardFailure`
//! triggers recovery. For alerting, both count as broke.

pub mod classify;
pub mod monitor;
pub mod probe;
pub mod recovery;
pub mod status;
pub mod supervisor;
pub mod tracker;

pub use classify::{Classifier, HealthVerdict};
pub use monitor::{CycleReport, Monitor, MonitorSnapshot, Phase};
pub use probe::{Expect, HttpProber, Probe, ProbeOutcome};
pub use recovery::attempt_recovery;
pub use status::{status_summary, uptime_report};
pub use supervisor::{BoxFuture, ExitCallback, MonitorExit, MonitorSupervisor, RestartPolicy};
pub use tracker::{MonitorState, Transition, update};
