//! downbotd: the downbot daemon.
//!
//! Watches one or more web services and DMs a single Discord user when one
//! goes down or comes back:
//! - One supervised monitor task per configured target
//! - Notification dispatcher (Discord DM, or the log with `--dry-run`)
//! - Optional `!uptime` / `!status` command listener
//! - `SIGUSR1` pushes a status summary to the recipient
//!
//! # Usage
//!
//! ```text
//! downbotd /etc/downbot/downbot.toml
//! downbotd downbot.toml --dry-run
//! ```

mod commands;
mod listener;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use downbot_core::DownbotConfig;
use downbot_health::{
    BoxFuture, ExitCallback, HttpProber, MonitorExit, MonitorSupervisor, Probe,
};
use downbot_notify::{
    AlertMessage, AlertSink, DiscordClient, DiscordSink, Dispatcher, LogSink, NotifierHandle,
};

use crate::commands::StatusContext;
use crate::listener::CommandListener;

const DEFAULT_LOG_FILTER: &str = "info,downbotd=debug,downbot=debug";
const NOTIFY_QUEUE_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "downbotd", version, about = "Availability monitor that alerts over Discord")]
struct Cli {
    /// Path to the TOML config file.
    config: PathBuf,

    /// Log alerts instead of sending them; no bot token needed.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DownbotConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    info!(
        config = %cli.config.display(),
        monitors = config.monitors.len(),
        dry_run = cli.dry_run,
        "downbot starting"
    );

    // Handlers go in before the pid file exists: an unhandled SIGUSR1 kills
    // the process.
    let usr1 = signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    let term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    // ── Transport ──────────────────────────────────────────────

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let probe: Arc<dyn Probe> = Arc::new(HttpProber::new(http.clone()));

    let discord = if cli.dry_run {
        None
    } else {
        let token = config.require_bot_token()?;
        Some(DiscordClient::new(
            http.clone(),
            config.discord_api_base.as_str(),
            token,
        ))
    };

    let sink: Arc<dyn AlertSink> = match &discord {
        Some(client) => Arc::new(DiscordSink::new(client.clone(), config.alert_recipient_id)),
        None => {
            info!("dry run: alerts go to the log");
            Arc::new(LogSink)
        }
    };

    // Last fallible step before tasks start; removed again on any exit path.
    let _pid_file = config
        .pid_file
        .as_deref()
        .map(PidFile::create)
        .transpose()?;

    let (notifier, dispatcher) =
        Dispatcher::spawn(sink, config.notify_timeout, NOTIFY_QUEUE_CAPACITY);

    // ── Monitors ───────────────────────────────────────────────

    let supervisor = Arc::new(
        MonitorSupervisor::new(
            Arc::clone(&probe),
            notifier.clone(),
            &config.recovery_message,
        )
        .with_exit_callback(exit_callback(notifier.clone())),
    );
    for spec in &config.monitors {
        supervisor.start(spec.clone()).await;
    }

    let context = Arc::new(StatusContext::new(
        &config,
        Arc::clone(&supervisor),
        Arc::clone(&probe),
    ));

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let push_handle = tokio::spawn(push_status_on_signal(
        usr1,
        Arc::clone(&context),
        notifier.clone(),
        shutdown_rx.clone(),
    ));

    let listener_handle = match (config.command_channel_id, &discord) {
        (Some(channel), Some(client)) => {
            let listener = CommandListener::new(
                client.clone(),
                channel,
                config.command_poll_interval,
                Arc::clone(&context),
            );
            Some(tokio::spawn(listener.run(shutdown_rx.clone())))
        }
        (Some(_), None) => {
            info!("dry run: command listener disabled");
            None
        }
        (None, _) => None,
    };

    wait_for_shutdown(term).await?;
    info!("shutdown signal received");

    // ── Shutdown ───────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    supervisor.stop_all().await;
    let _ = push_handle.await;
    if let Some(handle) = listener_handle {
        let _ = handle.await;
    }

    // The dispatcher drains its queue once every handle is gone.
    drop(context);
    drop(supervisor);
    drop(notifier);
    let drain = config.notify_timeout + Duration::from_secs(1);
    if tokio::time::timeout(drain, dispatcher).await.is_err() {
        warn!(timeout = ?drain, "pending alerts dropped at shutdown");
    }

    info!("downbot stopped");
    Ok(())
}

/// Our pid, written for operators who want to send SIGUSR1.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
        debug!(path = %path.display(), "pid file written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

/// Log unexpected monitor exits; alert once a monitor is given up on.
fn exit_callback(notifier: NotifierHandle) -> ExitCallback {
    Arc::new(move |id: String, exit: MonitorExit| -> BoxFuture {
        let notifier = notifier.clone();
        Box::pin(async move {
            match exit {
                MonitorExit::GaveUp { restarts } => {
                    error!(monitor = %id, restarts, "monitor abandoned");
                    notifier.notify(AlertMessage::plain(format!(
                        "{id} monitor crashed {restarts} times and was stopped"
                    )));
                }
                exit => warn!(monitor = %id, ?exit, "monitor will be restarted"),
            }
        })
    })
}

async fn push_status_on_signal(
    mut usr1: Signal,
    context: Arc<StatusContext>,
    notifier: NotifierHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = usr1.recv() => {
                if received.is_none() {
                    break;
                }
                info!("SIGUSR1 received, pushing status");
                notifier.notify(context.status_push().await);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn wait_for_shutdown(mut term: Signal) -> anyhow::Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}
