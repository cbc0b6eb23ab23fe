//! downbot-core: configuration model for the downbot monitor.
//!
//! Parses `downbot.toml` into a validated [`DownbotConfig`]: the notification
//! target, the monitored targets ([`MonitorSpec`]) and the informational
//! endpoints reported by `!uptime` ([`UptimeCheck`]).
//!
//! Parsing is strict. Any missing required key or malformed URL is a
//! [`ConfigError`], and the daemon refuses to start with a partial config.

pub mod config;
pub mod error;

pub use config::{DownbotConfig, MonitorSpec, UptimeCheck};
pub use error::{ConfigError, ConfigResult};
