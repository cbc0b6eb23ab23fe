//! On-demand status reports.
//!
//! [`uptime_report`] probes every informational endpoint once, concurrently,
//! and independently of any running monitor. [`status_summary`] renders the
//! monitors' last published state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::debug;

use downbot_core::UptimeCheck;

use crate::classify::HealthVerdict;
use crate::monitor::MonitorSnapshot;
use crate::probe::{Expect, Probe, ProbeOutcome};

/// Probe each check and render one `name: body` line per check.
///
/// A check that gets no response renders as `name: name did not respond`;
/// one failing check never aborts the whole report.
pub async fn uptime_report(
    probe: Arc<dyn Probe>,
    checks: &[UptimeCheck],
    timeout: Duration,
) -> String {
    let mut set = JoinSet::new();
    for (index, check) in checks.iter().enumerate() {
        let probe = Arc::clone(&probe);
        let url = check.url.to_string();
        set.spawn(async move { (index, probe.probe(&url, timeout, Expect::AnyStatus).await) });
    }

    let mut outcomes: Vec<Option<ProbeOutcome>> = vec![None; checks.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => debug!(error = %e, "uptime probe task failed"),
        }
    }

    checks
        .iter()
        .zip(outcomes)
        .map(|(check, outcome)| match outcome {
            Some(ProbeOutcome::Success { body, .. }) => {
                format!("{}: {}", check.name, body.trim())
            }
            _ => format!("{0}: {0} did not respond", check.name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per monitor: `id: up` or `id: down (reason)`.
pub fn status_summary(snapshots: &[MonitorSnapshot]) -> String {
    if snapshots.is_empty() {
        return "no monitors running".to_string();
    }

    snapshots
        .iter()
        .map(|s| {
            if !s.is_broke {
                let checked = if s.cycles == 0 { " (not checked yet)" } else { "" };
                return format!("{}: up{checked}", s.id);
            }
            match s.last_verdict.as_ref().and_then(HealthVerdict::details) {
                Some(details) => {
                    // Skip section headers like "status check:".
                    let line = details
                        .lines()
                        .find(|l| !l.trim().is_empty() && !l.ends_with(':'))
                        .unwrap_or(details);
                    format!("{}: down ({line})", s.id)
                }
                None => format!("{}: down", s.id),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
