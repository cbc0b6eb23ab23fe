//! Command listener: polls a channel for `!uptime` / `!status`.
//!
//! Discord's REST API is polled with an `after` cursor. The cursor starts
//! at the newest message present when the listener comes up, so commands
//! sent while the bot was down are not answered late.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use downbot_notify::{AlertMessage, DISCORD_MESSAGE_LIMIT, DiscordClient, NotifyResult};

use crate::commands::{Command, StatusContext};

pub struct CommandListener {
    client: DiscordClient,
    channel_id: u64,
    poll_interval: Duration,
    context: Arc<StatusContext>,
    /// Newest message id seen; `None` until primed or while the channel is empty.
    cursor: Option<u64>,
    primed: bool,
}

impl CommandListener {
    pub fn new(
        client: DiscordClient,
        channel_id: u64,
        poll_interval: Duration,
        context: Arc<StatusContext>,
    ) -> Self {
        Self {
            client,
            channel_id,
            poll_interval,
            context,
            cursor: None,
            primed: false,
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(channel = self.channel_id, interval = ?self.poll_interval, "command listener starting");

        loop {
            self.poll().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("command listener stopped");
    }

    /// Fetch new messages and spawn a reply task per command.
    ///
    /// Returns the reply tasks so callers can wait on them.
    pub async fn poll(&mut self) -> Vec<JoinHandle<()>> {
        if !self.primed {
            match self.newest_message().await {
                Ok(newest) => {
                    debug!(channel = self.channel_id, cursor = ?newest, "command cursor primed");
                    self.cursor = newest;
                    self.primed = true;
                }
                Err(e) => warn!(channel = self.channel_id, error = %e, "failed to read command channel"),
            }
            return Vec::new();
        }

        let messages = match self.client.messages_after(self.channel_id, self.cursor).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(channel = self.channel_id, error = %e, "failed to poll command channel");
                return Vec::new();
            }
        };

        let mut replies = Vec::new();
        for message in messages {
            if let Some(id) = message.snowflake() {
                self.cursor = self.cursor.max(Some(id));
            }
            if message.author.bot {
                continue;
            }
            let Some(command) = Command::parse(&message.content) else {
                continue;
            };

            let channel = message.channel_id.parse().unwrap_or(self.channel_id);
            info!(?command, author = %message.author.id, channel, "command received");
            replies.push(self.spawn_reply(command, channel));
        }
        replies
    }

    async fn newest_message(&self) -> NotifyResult<Option<u64>> {
        let messages = self.client.messages_after(self.channel_id, None).await?;
        Ok(messages.iter().filter_map(|m| m.snowflake()).max())
    }

    fn spawn_reply(&self, command: Command, channel: u64) -> JoinHandle<()> {
        let client = self.client.clone();
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            let reply = context.reply(command).await;
            let text = AlertMessage::plain(reply).render(DISCORD_MESSAGE_LIMIT);
            if let Err(e) = client.send_message(channel, &text).await {
                warn!(?command, channel, error = %e, "failed to send command reply");
            }
        })
    }
}
