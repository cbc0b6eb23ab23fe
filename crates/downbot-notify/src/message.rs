//! Alert message model and rendering.

use std::fmt;

/// Discord rejects messages longer than this many characters.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

const FENCE: &str = "```";
const TRUNCATED: &str = "\n… [truncated]";

/// How the message body is rendered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// Headline and body as plain text.
    Plain,
    /// Body wrapped in a fenced code block below the headline.
    Preformatted,
}

/// A message for the configured recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub headline: String,
    pub body: String,
    pub format: MessageFormat,
}

impl AlertMessage {
    /// A short plain-text message.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            headline: text.into(),
            body: String::new(),
            format: MessageFormat::Plain,
        }
    }

    /// A headline followed by a verbatim diagnostics dump.
    pub fn diagnostics(headline: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            body: diagnostics.into(),
            format: MessageFormat::Preformatted,
        }
    }

    /// Render to transport text of at most `limit` characters.
    ///
    /// Oversized bodies are cut and marked `[truncated]`; the code fence is
    /// always closed.
    pub fn render(&self, limit: usize) -> String {
        if self.body.is_empty() {
            return truncate_chars(&self.headline, limit, "");
        }

        match self.format {
            MessageFormat::Plain => {
                truncate_chars(&format!("{}\n{}", self.headline, self.body), limit, TRUNCATED)
            }
            MessageFormat::Preformatted => {
                let headline = truncate_chars(&self.headline, limit / 4, "");
                // Keep a stray fence in the body from closing the block early.
                let body = self.body.replace(FENCE, "`\u{200b}``");
                let overhead = headline.chars().count() + 2 * FENCE.len() + 3;
                let body = truncate_chars(&body, limit.saturating_sub(overhead), TRUNCATED);
                format!("{headline}\n{FENCE}\n{body}\n{FENCE}")
            }
        }
    }
}

impl fmt::Display for AlertMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(usize::MAX))
    }
}

/// Cut `s` to at most `limit` characters, ending with `marker` when cut.
fn truncate_chars(s: &str, limit: usize, marker: &str) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let keep = limit.saturating_sub(marker.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    if marker.chars().count() <= limit {
        out.push_str(marker);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_renders_headline_only() {
        let msg = AlertMessage::plain("thx bby!!!!!!");
        assert_eq!(msg.render(DISCORD_MESSAGE_LIMIT), "thx bby!!!!!!");
        assert_eq!(msg.format, MessageFormat::Plain);
    }

    #[test]
    fn diagnostics_are_fenced() {
        let msg = AlertMessage::diagnostics("spotti is dead:", "GET https://x/ failed: timeout");
        assert_eq!(
            msg.render(DISCORD_MESSAGE_LIMIT),
            "spotti is dead:\n```\nGET https://x/ failed: timeout\n```"
        );
    }

    #[test]
    fn long_diagnostics_fit_the_limit() {
        let msg = AlertMessage::diagnostics("spotti is dead:", "x".repeat(5000));
        let rendered = msg.render(DISCORD_MESSAGE_LIMIT);
        assert!(rendered.chars().count() <= DISCORD_MESSAGE_LIMIT);
        assert!(rendered.starts_with("spotti is dead:\n```\n"));
        assert!(rendered.ends_with("[truncated]\n```"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let msg = AlertMessage::diagnostics("down", "é".repeat(3000));
        let rendered = msg.render(100);
        assert!(rendered.chars().count() <= 100);
        assert!(rendered.ends_with("\n```"));
    }

    #[test]
    fn embedded_fence_does_not_close_block() {
        let msg = AlertMessage::diagnostics("down", "before ``` after");
        let rendered = msg.render(DISCORD_MESSAGE_LIMIT);
        assert_eq!(rendered.matches("```").count(), 2);
    }

    #[test]
    fn plain_with_body_is_joined() {
        let mut msg = AlertMessage::plain("status");
        msg.body = "spotti: up".to_string();
        assert_eq!(msg.to_string(), "status\nspotti: up");
    }
}
