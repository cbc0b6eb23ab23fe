//! Alert sinks: the transports a dispatcher delivers to.

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyResult;
use crate::message::{AlertMessage, DISCORD_MESSAGE_LIMIT};

/// A destination for alert messages. The recipient is fixed per sink.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one message. Implementations should not retry.
    async fn send(&self, message: &AlertMessage) -> NotifyResult<()>;
}

/// Writes alerts to the log instead of a chat transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, message: &AlertMessage) -> NotifyResult<()> {
        info!(alert = %message.render(DISCORD_MESSAGE_LIMIT), "alert (dry run)");
        Ok(())
    }
}
