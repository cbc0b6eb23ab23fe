//! Recovery attempt: the secondary "refresh" probe.
//!
//! The monitored service exposes a refresh endpoint that repairs its own
//! auth state. After a hard failure on the status endpoint the monitor hits
//! refresh once: if refresh answers, the cycle counts as recovered.

use std::time::Duration;

use tracing::{info, warn};

use crate::classify::{HealthVerdict, failure_diagnostics};
use crate::probe::{Expect, Probe};

/// Probe `refresh_url` after a primary hard failure.
///
/// Returns `Ok` when refresh answers with a non-error status. Otherwise a
/// `HardFailure` carrying the primary diagnostics followed by the refresh
/// diagnostics.
pub async fn attempt_recovery(
    probe: &dyn Probe,
    refresh_url: &str,
    timeout: Duration,
    primary_diagnostics: &str,
) -> HealthVerdict {
    let outcome = probe.probe(refresh_url, timeout, Expect::SuccessStatus).await;

    match failure_diagnostics(&outcome) {
        None => {
            info!(url = %refresh_url, "refresh succeeded after failed status check");
            HealthVerdict::Ok
        }
        Some(refresh_diagnostics) => {
            warn!(url = %refresh_url, "refresh failed too");
            HealthVerdict::HardFailure {
                diagnostics: combine(primary_diagnostics, &refresh_diagnostics),
            }
        }
    }
}

/// Join primary and refresh diagnostics into one alert body.
pub fn combine(primary: &str, refresh: &str) -> String {
    format!("status check:\n{primary}\n\nrefresh:\n{refresh}")
}
