//! downbot.toml configuration parser.
//!
//! The top-level monitor keys (`primary_status_url`, `refresh_url`, ...)
//! describe the primary monitor. Further targets can be listed as
//! `[[monitor]]` tables with the same keys plus an `id`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_PRIMARY_ID: &str = "spotti";
pub const DEFAULT_MARKER: &str = "global auth was not available";
pub const DEFAULT_REASON: &str = "no global auth";
pub const DEFAULT_RECOVERY_MESSAGE: &str = "thx bby!!!!!!";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_COMMAND_POLL_SECS: u64 = 5;

/// On-disk shape of `downbot.toml`, before validation.
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    bot_token: Option<String>,
    alert_recipient_id: Option<u64>,
    discord_api_base: Option<String>,
    notify_timeout_seconds: Option<u64>,
    command_channel_id: Option<u64>,
    command_poll_seconds: Option<u64>,
    status_file: Option<PathBuf>,
    pid_file: Option<PathBuf>,
    recovery_message: Option<String>,
    #[serde(default, rename = "monitor")]
    monitors: Vec<RawMonitor>,
    #[serde(default, rename = "uptime_check")]
    uptime_checks: Vec<RawUptimeCheck>,
    #[serde(flatten)]
    primary: RawMonitor,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawMonitor {
    #[serde(alias = "name")]
    id: Option<String>,
    primary_status_url: Option<String>,
    refresh_url: Option<String>,
    poll_interval_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
    degradation_marker_text: Option<String>,
    degradation_reason: Option<String>,
}

impl RawMonitor {
    fn is_empty(&self) -> bool {
        self.primary_status_url.is_none()
            && self.refresh_url.is_none()
            && self.poll_interval_seconds.is_none()
            && self.request_timeout_seconds.is_none()
            && self.degradation_marker_text.is_none()
            && self.degradation_reason.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawUptimeCheck {
    name: String,
    url: String,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct DownbotConfig {
    /// Discord bot token. Only optional so `--dry-run` can run without one.
    pub bot_token: Option<String>,
    /// The single user every alert is sent to.
    pub alert_recipient_id: u64,
    pub discord_api_base: Url,
    /// Upper bound on a single notification delivery.
    pub notify_timeout: Duration,
    /// Channel watched for `!uptime` / `!status` commands.
    pub command_channel_id: Option<u64>,
    pub command_poll_interval: Duration,
    /// Error file written by the monitored service; included in status pushes.
    pub status_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub recovery_message: String,
    pub monitors: Vec<MonitorSpec>,
    pub uptime_checks: Vec<UptimeCheck>,
}

/// One monitored target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSpec {
    pub id: String,
    pub primary_status_url: Url,
    /// Endpoint that triggers the target's self-repair.
    pub refresh_url: Url,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Case-sensitive substring that marks a soft degradation.
    pub degradation_marker: String,
    /// Human-readable reason attached to soft degradations.
    pub degradation_reason: String,
}

/// An informational endpoint reported by the `!uptime` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UptimeCheck {
    pub name: String,
    pub url: Url,
}

impl DownbotConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }

    /// The bot token, or an error if none was configured.
    pub fn require_bot_token(&self) -> ConfigResult<&str> {
        self.bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing("bot_token".to_string()))
    }

    /// Look up a monitor by id.
    pub fn monitor(&self, id: &str) -> Option<&MonitorSpec> {
        self.monitors.iter().find(|m| m.id == id)
    }

    /// Uptime checks to run for `!uptime`. Falls back to each monitor's
    /// status URL when no `[[uptime_check]]` is configured.
    pub fn effective_uptime_checks(&self) -> Vec<UptimeCheck> {
        if !self.uptime_checks.is_empty() {
            return self.uptime_checks.clone();
        }
        self.monitors
            .iter()
            .map(|m| UptimeCheck {
                name: m.id.clone(),
                url: m.primary_status_url.clone(),
            })
            .collect()
    }

    fn from_raw(raw: RawConfig) -> ConfigResult<Self> {
        let alert_recipient_id = raw
            .alert_recipient_id
            .ok_or_else(|| ConfigError::Missing("alert_recipient_id".to_string()))?;

        let discord_api_base = parse_url(
            "discord_api_base",
            raw.discord_api_base
                .as_deref()
                .unwrap_or(DEFAULT_DISCORD_API_BASE),
        )?;

        let notify_timeout = seconds(
            "notify_timeout_seconds",
            raw.notify_timeout_seconds,
            DEFAULT_NOTIFY_TIMEOUT_SECS,
        )?;
        let command_poll_interval = seconds(
            "command_poll_seconds",
            raw.command_poll_seconds,
            DEFAULT_COMMAND_POLL_SECS,
        )?;

        let mut monitors = Vec::with_capacity(raw.monitors.len() + 1);
        if !raw.primary.is_empty() {
            monitors.push(build_monitor(raw.primary, Some(DEFAULT_PRIMARY_ID))?);
        }
        for section in raw.monitors {
            monitors.push(build_monitor(section, None)?);
        }
        if monitors.is_empty() {
            return Err(ConfigError::NoMonitors);
        }

        let mut seen = HashSet::new();
        for m in &monitors {
            if !seen.insert(m.id.as_str()) {
                return Err(ConfigError::DuplicateMonitor(m.id.clone()));
            }
        }

        let uptime_checks = raw
            .uptime_checks
            .into_iter()
            .map(|c| {
                let url = parse_url(&format!("uptime_check.{}.url", c.name), &c.url)?;
                Ok(UptimeCheck { name: c.name, url })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(DownbotConfig {
            bot_token: raw.bot_token,
            alert_recipient_id,
            discord_api_base,
            notify_timeout,
            command_channel_id: raw.command_channel_id,
            command_poll_interval,
            status_file: raw.status_file,
            pid_file: raw.pid_file,
            recovery_message: raw
                .recovery_message
                .unwrap_or_else(|| DEFAULT_RECOVERY_MESSAGE.to_string()),
            monitors,
            uptime_checks,
        })
    }
}

impl std::str::FromStr for DownbotConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        let raw: RawConfig = toml::from_str(s)?;
        Self::from_raw(raw)
    }
}

fn build_monitor(raw: RawMonitor, default_id: Option<&str>) -> ConfigResult<MonitorSpec> {
    let id = match (raw.id, default_id) {
        (Some(id), _) => id,
        (None, Some(default)) => default.to_string(),
        (None, None) => return Err(ConfigError::Missing("monitor.id".to_string())),
    };
    if id.trim().is_empty() {
        return Err(ConfigError::Invalid {
            key: "monitor.id".to_string(),
            reason: "must not be empty".to_string(),
        });
    }

    let key = |name: &str| format!("{id}.{name}");

    let primary_status_url = raw
        .primary_status_url
        .ok_or_else(|| ConfigError::Missing(key("primary_status_url")))?;
    let refresh_url = raw
        .refresh_url
        .ok_or_else(|| ConfigError::Missing(key("refresh_url")))?;

    let degradation_marker = raw
        .degradation_marker_text
        .unwrap_or_else(|| DEFAULT_MARKER.to_string());
    if degradation_marker.is_empty() {
        return Err(ConfigError::Invalid {
            key: key("degradation_marker_text"),
            reason: "must not be empty".to_string(),
        });
    }

    Ok(MonitorSpec {
        primary_status_url: parse_url(&key("primary_status_url"), &primary_status_url)?,
        refresh_url: parse_url(&key("refresh_url"), &refresh_url)?,
        poll_interval: seconds(
            &key("poll_interval_seconds"),
            raw.poll_interval_seconds,
            DEFAULT_POLL_INTERVAL_SECS,
        )?,
        request_timeout: seconds(
            &key("request_timeout_seconds"),
            raw.request_timeout_seconds,
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?,
        degradation_marker,
        degradation_reason: raw
            .degradation_reason
            .unwrap_or_else(|| DEFAULT_REASON.to_string()),
        id,
    })
}

fn parse_url(key: &str, value: &str) -> ConfigResult<Url> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn seconds(key: &str, value: Option<u64>, default: u64) -> ConfigResult<Duration> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
bot_token = "token"
alert_recipient_id = 1234
primary_status_url = "https://spotti.example.com/show-all"
refresh_url = "https://spotti.example.com/refresh"
"#;

    #[test]
    fn parse_minimal_applies_defaults() {
        let config: DownbotConfig = MINIMAL.parse().unwrap();
        assert_eq!(config.alert_recipient_id, 1234);
        assert_eq!(config.discord_api_base.as_str(), "https://discord.com/api/v10");
        assert_eq!(config.notify_timeout, Duration::from_secs(10));
        assert_eq!(config.recovery_message, "thx bby!!!!!!");
        assert!(config.command_channel_id.is_none());

        assert_eq!(config.monitors.len(), 1);
        let m = &config.monitors[0];
        assert_eq!(m.id, "spotti");
        assert_eq!(m.poll_interval, Duration::from_secs(60));
        assert_eq!(m.request_timeout, Duration::from_secs(15));
        assert_eq!(m.degradation_marker, "global auth was not available");
        assert_eq!(m.degradation_reason, "no global auth");
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
bot_token = "token"
alert_recipient_id = 42
notify_timeout_seconds = 3
command_channel_id = 99
command_poll_seconds = 2
status_file = "/tmp/spotti.err"
pid_file = "/tmp/downbot.pid"
recovery_message = "back up"

name = "spotti"
primary_status_url = "https://spotti.example.com/show-all"
refresh_url = "https://spotti.example.com/refresh"
poll_interval_seconds = 30
request_timeout_seconds = 5
degradation_marker_text = "AUTH DOWN"
degradation_reason = "auth missing"

[[monitor]]
id = "size"
primary_status_url = "http://size.example.com/health"
refresh_url = "http://size.example.com/kick"

[[uptime_check]]
name = "spotti"
url = "https://spotti.example.com/uptime"

[[uptime_check]]
name = "size"
url = "http://size.example.com/uptime"
"#;
        let config: DownbotConfig = toml_str.parse().unwrap();
        assert_eq!(config.command_channel_id, Some(99));
        assert_eq!(config.command_poll_interval, Duration::from_secs(2));
        assert_eq!(config.status_file, Some(PathBuf::from("/tmp/spotti.err")));
        assert_eq!(config.recovery_message, "back up");
        assert_eq!(config.monitors.len(), 2);

        let spotti = config.monitor("spotti").unwrap();
        assert_eq!(spotti.poll_interval, Duration::from_secs(30));
        assert_eq!(spotti.degradation_marker, "AUTH DOWN");
        assert_eq!(spotti.degradation_reason, "auth missing");

        let size = config.monitor("size").unwrap();
        assert_eq!(size.refresh_url.as_str(), "http://size.example.com/kick");
        assert_eq!(size.request_timeout, Duration::from_secs(15));

        assert_eq!(config.uptime_checks.len(), 2);
        assert_eq!(config.effective_uptime_checks()[1].name, "size");
    }

    #[test]
    fn uptime_checks_fall_back_to_monitors() {
        let config: DownbotConfig = MINIMAL.parse().unwrap();
        let checks = config.effective_uptime_checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].name, "spotti");
        assert_eq!(checks[0].url.as_str(), "https://spotti.example.com/show-all");
    }

    #[test]
    fn missing_recipient_is_rejected() {
        let err = r#"
primary_status_url = "https://a.example.com/"
refresh_url = "https://a.example.com/refresh"
"#
        .parse::<DownbotConfig>()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref k) if k == "alert_recipient_id"));
    }

    #[test]
    fn missing_refresh_url_is_rejected() {
        let err = r#"
alert_recipient_id = 1
primary_status_url = "https://a.example.com/"
"#
        .parse::<DownbotConfig>()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref k) if k == "spotti.refresh_url"));
    }

    #[test]
    fn no_monitors_is_rejected() {
        let err = "alert_recipient_id = 1".parse::<DownbotConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::NoMonitors));
    }

    #[test]
    fn bad_scheme_is_rejected() {
        let err = r#"
alert_recipient_id = 1
primary_status_url = "ftp://a.example.com/"
refresh_url = "https://a.example.com/refresh"
"#
        .parse::<DownbotConfig>()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = format!("{MINIMAL}poll_interval_seconds = 0\n")
            .parse::<DownbotConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "spotti.poll_interval_seconds"));
    }

    #[test]
    fn duplicate_monitor_ids_are_rejected() {
        let toml_str = format!(
            r#"{MINIMAL}
[[monitor]]
id = "spotti"
primary_status_url = "https://b.example.com/"
refresh_url = "https://b.example.com/refresh"
"#
        );
        let err = toml_str.parse::<DownbotConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMonitor(ref id) if id == "spotti"));
    }

    #[test]
    fn empty_marker_is_rejected() {
        let err = format!("{MINIMAL}degradation_marker_text = \"\"\n")
            .parse::<DownbotConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn bot_token_required_on_demand() {
        let config: DownbotConfig = r#"
alert_recipient_id = 1
primary_status_url = "https://a.example.com/"
refresh_url = "https://a.example.com/refresh"
"#
        .parse()
        .unwrap();
        assert!(config.require_bot_token().is_err());

        let config: DownbotConfig = MINIMAL.parse().unwrap();
        assert_eq!(config.require_bot_token().unwrap(), "token");
    }

    #[test]
    fn from_file_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downbot.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = DownbotConfig::from_file(&path).unwrap();
        assert_eq!(config.monitors[0].id, "spotti");

        let err = DownbotConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = "alert_recipient_id = [".parse::<DownbotConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
