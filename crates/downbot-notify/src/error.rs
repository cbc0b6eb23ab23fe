//! Error types for alert delivery.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors that can occur while delivering a message.
///
/// Delivery is best-effort: the dispatcher logs these and moves on.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}
