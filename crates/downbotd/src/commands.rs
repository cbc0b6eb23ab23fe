//! Chat commands and the status texts they share with SIGUSR1.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use downbot_core::{DownbotConfig, UptimeCheck};
use downbot_health::{MonitorSupervisor, Probe, status_summary, uptime_report};
use downbot_notify::AlertMessage;

/// Fallback when no monitor carries a request timeout to borrow.
const DEFAULT_UPTIME_TIMEOUT: Duration = Duration::from_secs(15);

/// A recognized chat command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fetch every uptime endpoint once.
    Uptime,
    /// Report monitor state from memory.
    Status,
}

impl Command {
    /// Match a message against the known commands.
    ///
    /// Surrounding whitespace is ignored; anything else must match exactly.
    pub fn parse(content: &str) -> Option<Self> {
        match content.trim() {
            "!uptime" => Some(Command::Uptime),
            "!status" => Some(Command::Status),
            _ => None,
        }
    }
}

/// Everything needed to answer a command or a status push.
pub struct StatusContext {
    supervisor: Arc<MonitorSupervisor>,
    probe: Arc<dyn Probe>,
    uptime_checks: Vec<UptimeCheck>,
    uptime_timeout: Duration,
    status_file: Option<PathBuf>,
    primary_id: String,
}

impl StatusContext {
    pub fn new(
        config: &DownbotConfig,
        supervisor: Arc<MonitorSupervisor>,
        probe: Arc<dyn Probe>,
    ) -> Self {
        let primary = config.monitors.first();
        Self {
            supervisor,
            probe,
            uptime_checks: config.effective_uptime_checks(),
            uptime_timeout: primary
                .map(|m| m.request_timeout)
                .unwrap_or(DEFAULT_UPTIME_TIMEOUT),
            status_file: config.status_file.clone(),
            primary_id: primary.map(|m| m.id.clone()).unwrap_or_default(),
        }
    }

    /// Text to post in reply to `command`.
    pub async fn reply(&self, command: Command) -> String {
        match command {
            Command::Uptime => {
                uptime_report(
                    Arc::clone(&self.probe),
                    &self.uptime_checks,
                    self.uptime_timeout,
                )
                .await
            }
            Command::Status => status_summary(&self.supervisor.snapshots().await),
        }
    }

    /// Message sent to the alert recipient on SIGUSR1.
    ///
    /// The monitor summary, followed by the error the target last wrote to
    /// its status file, if that file exists.
    pub async fn status_push(&self) -> AlertMessage {
        let summary = status_summary(&self.supervisor.snapshots().await);
        match self.read_status_file().await {
            Some(content) => AlertMessage::plain(format!(
                "{summary}\n{} is dead: {}",
                self.primary_id,
                content.trim()
            )),
            None => AlertMessage::plain(summary),
        }
    }

    async fn read_status_file(&self) -> Option<String> {
        let path = self.status_file.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no status file");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read status file");
                None
            }
        }
    }
}
