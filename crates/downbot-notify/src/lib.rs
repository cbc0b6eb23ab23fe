//! downbot-notify: alert delivery for downbot.
//!
//! Alerts are queued through a [`NotifierHandle`] and delivered by a
//! background dispatcher task, so a slow or failing transport never
//! holds up a poll cycle.
//!
//! # Architecture
//!
//! ```text
//! Monitor ──notify()──▶ bounded mpsc ──▶ Dispatcher task
//!                                          ├── timeout(send_timeout, sink.send())
//!                                          └── log + drop on failure (no retry)
//!
//! AlertSink
//!   ├── DiscordSink (DM to the configured recipient over the REST API)
//!   └── LogSink     (writes alerts to the log, used for dry runs)
//! ```

pub mod discord;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod sink;

pub use discord::{ChannelMessage, DiscordClient, DiscordSink};
pub use dispatcher::{Dispatcher, NotifierHandle};
pub use error::{NotifyError, NotifyResult};
pub use message::{AlertMessage, DISCORD_MESSAGE_LIMIT, MessageFormat};
pub use sink::{AlertSink, LogSink};
