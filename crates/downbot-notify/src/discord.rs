//! Minimal Discord REST transport.
//!
//! Only the three calls the bot needs: open a DM channel, post a message,
//! and list recent channel messages. No gateway session is held.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{NotifyError, NotifyResult};
use crate::message::{AlertMessage, DISCORD_MESSAGE_LIMIT};
use crate::sink::AlertSink;

const USER_AGENT_VALUE: &str = concat!("DiscordBot (downbot, ", env!("CARGO_PKG_VERSION"), ")");
const MESSAGE_PAGE_SIZE: &str = "50";

/// A message read from a channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: MessageAuthor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageAuthor {
    pub id: String,
    #[serde(default)]
    pub bot: bool,
}

impl ChannelMessage {
    /// Numeric message id, used as the `after` cursor.
    pub fn snowflake(&self) -> Option<u64> {
        self.id.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

/// Authenticated client for the Discord HTTP API.
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl DiscordClient {
    pub fn new(http: reqwest::Client, api_base: &str, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_base))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .header(USER_AGENT, USER_AGENT_VALUE)
    }

    /// Open (or fetch) the DM channel with a user.
    pub async fn open_dm(&self, user_id: u64) -> NotifyResult<u64> {
        let resp = self
            .request(reqwest::Method::POST, "/users/@me/channels")
            .json(&json!({ "recipient_id": user_id.to_string() }))
            .send()
            .await?;
        let channel: DmChannel = check(resp).await?.json().await?;
        channel
            .id
            .parse()
            .map_err(|_| NotifyError::Decode(format!("bad channel id {:?}", channel.id)))
    }

    /// Post a text message to a channel.
    pub async fn send_message(&self, channel_id: u64, content: &str) -> NotifyResult<()> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/channels/{channel_id}/messages"))
            .json(&json!({
                "content": content,
                "allowed_mentions": { "parse": [] },
            }))
            .send()
            .await?;
        check(resp).await?;
        debug!(%channel_id, "message posted");
        Ok(())
    }

    /// Messages posted after `after`, oldest first.
    pub async fn messages_after(
        &self,
        channel_id: u64,
        after: Option<u64>,
    ) -> NotifyResult<Vec<ChannelMessage>> {
        let mut req = self
            .request(reqwest::Method::GET, &format!("/channels/{channel_id}/messages"))
            .query(&[("limit", MESSAGE_PAGE_SIZE)]);
        if let Some(after) = after {
            req = req.query(&[("after", after.to_string())]);
        }
        let resp = check(req.send().await?).await?;
        let mut messages: Vec<ChannelMessage> = resp.json().await?;
        messages.sort_by_key(|m| m.snowflake().unwrap_or(0));
        Ok(messages)
    }
}

async fn check(resp: reqwest::Response) -> NotifyResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(NotifyError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Delivers alerts as direct messages to one user.
#[derive(Debug)]
pub struct DiscordSink {
    client: DiscordClient,
    recipient_id: u64,
    dm_channel: OnceCell<u64>,
}

impl DiscordSink {
    pub fn new(client: DiscordClient, recipient_id: u64) -> Self {
        Self {
            client,
            recipient_id,
            dm_channel: OnceCell::new(),
        }
    }
}

#[async_trait]
impl AlertSink for DiscordSink {
    async fn send(&self, message: &AlertMessage) -> NotifyResult<()> {
        let channel = self
            .dm_channel
            .get_or_try_init(|| self.client.open_dm(self.recipient_id))
            .await?;
        self.client
            .send_message(*channel, &message.render(DISCORD_MESSAGE_LIMIT))
            .await
    }
}
