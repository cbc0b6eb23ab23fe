//! Failure classifier: turns a probe outcome into a health verdict.

use std::fmt;

use reqwest::StatusCode;

use downbot_core::MonitorSpec;

use crate::probe::ProbeOutcome;

/// Placeholder used in diagnostics when no response body could be read.
pub const BODY_UNAVAILABLE: &str = "request failed";

/// Health of the target for one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    /// The target answered normally.
    Ok,
    /// The target answered, but the body carries the degradation marker.
    SoftDegraded { reason: String },
    /// No usable successful response.
    HardFailure { diagnostics: String },
}

impl HealthVerdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthVerdict::Ok)
    }

    /// Text to put in an alert: the degradation reason or the failure
    /// diagnostics. `None` for `Ok`.
    pub fn details(&self) -> Option<&str> {
        match self {
            HealthVerdict::Ok => None,
            HealthVerdict::SoftDegraded { reason } => Some(reason),
            HealthVerdict::HardFailure { diagnostics } => Some(diagnostics),
        }
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthVerdict::Ok => f.write_str("ok"),
            HealthVerdict::SoftDegraded { .. } => f.write_str("degraded"),
            HealthVerdict::HardFailure { .. } => f.write_str("failed"),
        }
    }
}

/// Classifies probe outcomes against a degradation marker.
///
/// The marker check is a case-sensitive substring match, applied to any
/// outcome that carries a body. A marker echoed inside an otherwise healthy
/// page still counts as degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    marker: String,
    reason: String,
}

impl Classifier {
    pub fn new(marker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            reason: reason.into(),
        }
    }

    pub fn from_spec(spec: &MonitorSpec) -> Self {
        Self::new(&spec.degradation_marker, &spec.degradation_reason)
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn classify(&self, outcome: &ProbeOutcome) -> HealthVerdict {
        if let Some(body) = outcome.body() {
            if !self.marker.is_empty() && body.contains(&self.marker) {
                return HealthVerdict::SoftDegraded {
                    reason: format!(
                        "{}: GET {} returned a body containing {:?}",
                        self.reason,
                        outcome.url(),
                        self.marker
                    ),
                };
            }
        }

        match failure_diagnostics(outcome) {
            Some(diagnostics) => HealthVerdict::HardFailure { diagnostics },
            None => HealthVerdict::Ok,
        }
    }
}

/// Diagnostics for a failed outcome: the error plus the best-effort body.
/// `None` for `Success`.
pub fn failure_diagnostics(outcome: &ProbeOutcome) -> Option<String> {
    match outcome {
        ProbeOutcome::Success { .. } => None,
        ProbeOutcome::HttpError { url, status, body } => {
            let body = match body.as_deref() {
                Some("") => "(empty body)",
                Some(body) => body,
                None => BODY_UNAVAILABLE,
            };
            Some(format!("GET {url} returned {}\n{body}", status_text(*status)))
        }
        ProbeOutcome::NetworkError { url, cause } => {
            Some(format!("GET {url} failed: {cause}\n{BODY_UNAVAILABLE}"))
        }
    }
}

fn status_text(status: u16) -> String {
    StatusCode::from_u16(status)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| status.to_string())
}
