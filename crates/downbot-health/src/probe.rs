//! HTTP probe: one bounded GET against a URL.
//!
//! A probe never fails: connection, DNS, TLS and timeout errors are
//! captured as [`ProbeOutcome::NetworkError`]. Interpreting the response
//! is the classifier's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::USER_AGENT;
use tracing::debug;

/// Response bodies are kept up to this many bytes.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Bytes of context kept on each side of a marker found past the cap.
const EXCERPT_CONTEXT: usize = 80;

const ELIDED: &str = "\n[... body elided ...]\n";

const USER_AGENT_VALUE: &str = concat!("downbot/", env!("CARGO_PKG_VERSION"));

/// Which response statuses count as a usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Any received response is a `Success`.
    AnyStatus,
    /// 4xx/5xx responses are reported as `HttpError`.
    SuccessStatus,
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A response was received.
    Success {
        url: String,
        status: u16,
        body: String,
    },
    /// The server answered with an error status the caller did not accept.
    HttpError {
        url: String,
        status: u16,
        /// `None` when the body could not be read.
        body: Option<String>,
    },
    /// No usable response: connect, DNS, TLS, timeout or body read failure.
    NetworkError { url: String, cause: String },
}

impl ProbeOutcome {
    pub fn url(&self) -> &str {
        match self {
            ProbeOutcome::Success { url, .. }
            | ProbeOutcome::HttpError { url, .. }
            | ProbeOutcome::NetworkError { url, .. } => url,
        }
    }

    /// The response body, if one was received and read.
    pub fn body(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Success { body, .. } => Some(body),
            ProbeOutcome::HttpError { body, .. } => body.as_deref(),
            ProbeOutcome::NetworkError { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }
}

/// Something that can probe a URL.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Perform one GET, giving up after `timeout`.
    async fn probe(&self, url: &str, timeout: Duration, expect: Expect) -> ProbeOutcome;

    /// Like [`Probe::probe`], but `marker` must stay visible in the returned
    /// body even when the body is too large to keep whole.
    async fn probe_for(
        &self,
        url: &str,
        timeout: Duration,
        expect: Expect,
        _marker: &str,
    ) -> ProbeOutcome {
        self.probe(url, timeout, expect).await
    }
}

/// [`Probe`] backed by a shared `reqwest` connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(
        &self,
        url: &str,
        marker: Option<&str>,
    ) -> Result<(StatusCode, Result<String, String>), String> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await
            .map_err(|e| describe(&e))?;
        let status = resp.status();
        let body = read_body(resp, marker).await.map_err(|e| describe(&e));
        Ok((status, body))
    }

    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        expect: Expect,
        marker: Option<&str>,
    ) -> ProbeOutcome {
        let network_error = |cause: String| ProbeOutcome::NetworkError {
            url: url.to_string(),
            cause,
        };

        let (status, body) = match tokio::time::timeout(timeout, self.fetch(url, marker)).await {
            Ok(Ok(response)) => response,
            Ok(Err(cause)) => {
                debug!(%url, error = %cause, "probe request failed");
                return network_error(cause);
            }
            Err(_) => {
                debug!(%url, ?timeout, "probe timed out");
                return network_error(format!("timed out after {timeout:?}"));
            }
        };

        let rejected = expect == Expect::SuccessStatus
            && (status.is_client_error() || status.is_server_error());
        if rejected {
            debug!(%url, %status, "probe got error status");
            return ProbeOutcome::HttpError {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.ok(),
            };
        }

        match body {
            Ok(body) => ProbeOutcome::Success {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            },
            Err(cause) => network_error(format!("reading response body: {cause}")),
        }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, url: &str, timeout: Duration, expect: Expect) -> ProbeOutcome {
        self.get(url, timeout, expect, None).await
    }

    async fn probe_for(
        &self,
        url: &str,
        timeout: Duration,
        expect: Expect,
        marker: &str,
    ) -> ProbeOutcome {
        self.get(url, timeout, expect, Some(marker)).await
    }
}

async fn read_body(
    mut resp: reqwest::Response,
    marker: Option<&str>,
) -> Result<String, reqwest::Error> {
    let mut body = CappedBody::new(MAX_BODY_BYTES, marker);
    while let Some(chunk) = resp.chunk().await? {
        if !body.push(&chunk) {
            break;
        }
    }
    Ok(body.finish())
}

/// A response body kept up to `cap` bytes.
///
/// Past the cap the stream is still scanned for the marker (with an overlap
/// so a match split across chunks is found). A match there is appended to
/// the kept prefix as a short excerpt.
struct CappedBody<'m> {
    cap: usize,
    marker: Option<&'m [u8]>,
    kept: Vec<u8>,
    /// Last `marker.len() - 1` bytes seen past the cap.
    carry: Vec<u8>,
    truncated: bool,
    excerpt: Option<String>,
}

impl<'m> CappedBody<'m> {
    fn new(cap: usize, marker: Option<&'m str>) -> Self {
        Self {
            cap,
            marker: marker.filter(|m| !m.is_empty()).map(str::as_bytes),
            kept: Vec::new(),
            carry: Vec::new(),
            truncated: false,
            excerpt: None,
        }
    }

    /// Feed the next chunk. Returns `false` once the rest can be skipped.
    fn push(&mut self, chunk: &[u8]) -> bool {
        if !self.truncated {
            let room = self.cap - self.kept.len();
            if chunk.len() <= room {
                self.kept.extend_from_slice(chunk);
                return true;
            }
            self.truncated = true;
            let overlap = self.marker.map_or(0, |m| m.len() - 1);
            self.carry = tail(&self.kept, overlap);
            self.kept.extend_from_slice(&chunk[..room]);
            if self.marker.is_some_and(|m| find(&self.kept, m).is_some()) {
                return false;
            }
        }

        let Some(marker) = self.marker else {
            return false;
        };

        let mut window = std::mem::take(&mut self.carry);
        window.extend_from_slice(chunk);
        if let Some(pos) = find(&window, marker) {
            let start = pos.saturating_sub(EXCERPT_CONTEXT);
            let end = (pos + marker.len() + EXCERPT_CONTEXT).min(window.len());
            self.excerpt = Some(String::from_utf8_lossy(&window[start..end]).into_owned());
            return false;
        }
        self.carry = tail(&window, marker.len() - 1);
        true
    }

    fn finish(self) -> String {
        let mut body = String::from_utf8_lossy(&self.kept).into_owned();
        if let Some(excerpt) = self.excerpt {
            body.push_str(ELIDED);
            body.push_str(&excerpt);
        }
        body
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn tail(bytes: &[u8], n: usize) -> Vec<u8> {
    bytes[bytes.len().saturating_sub(n)..].to_vec()
}

/// Render an error with its source chain; reqwest's top-level message
/// alone rarely says what went wrong.
fn describe(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn router() -> Router {
        Router::new()
            .route("/ok", get(|| async { "all good" }))
            .route(
                "/down",
                get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "maintenance") }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn success_returns_status_and_body() {
        let base = serve(router()).await;
        let url = format!("{base}/ok");
        let outcome = HttpProber::default()
            .probe(&url, Duration::from_secs(2), Expect::SuccessStatus)
            .await;
        assert_eq!(
            outcome,
            ProbeOutcome::Success {
                url,
                status: 200,
                body: "all good".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn error_status_is_http_error_when_success_expected() {
        let base = serve(router()).await;
        let url = format!("{base}/down");
        let outcome = HttpProber::default()
            .probe(&url, Duration::from_secs(2), Expect::SuccessStatus)
            .await;
        assert_eq!(
            outcome,
            ProbeOutcome::HttpError {
                url,
                status: 503,
                body: Some("maintenance".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn error_status_is_success_when_any_status_accepted() {
        let base = serve(router()).await;
        let outcome = HttpProber::default()
            .probe(&format!("{base}/down"), Duration::from_secs(2), Expect::AnyStatus)
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.body(), Some("maintenance"));
    }

    #[tokio::test]
    async fn closed_port_is_network_error() {
        let outcome = HttpProber::default()
            .probe(
                "http://127.0.0.1:1/healthz",
                Duration::from_millis(500),
                Expect::SuccessStatus,
            )
            .await;
        assert!(matches!(outcome, ProbeOutcome::NetworkError { .. }));
        assert_eq!(outcome.body(), None);
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let base = serve(router()).await;
        let outcome = HttpProber::default()
            .probe(
                &format!("{base}/slow"),
                Duration::from_millis(100),
                Expect::SuccessStatus,
            )
            .await;
        match outcome {
            ProbeOutcome::NetworkError { cause, .. } => assert!(cause.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    const MARKER: &str = "global auth was not available";

    fn huge_page() -> String {
        let mut page = "<li>song</li>\n".repeat(300 * 1024 / 14);
        page.push_str("<p><em>global auth was not available, this list may not be up to date</em></p>");
        page
    }

    #[tokio::test]
    async fn marker_past_the_cap_is_kept() {
        let base = serve(Router::new().route("/show-all", get(|| async { huge_page() }))).await;
        let outcome = HttpProber::default()
            .probe_for(
                &format!("{base}/show-all"),
                Duration::from_secs(5),
                Expect::SuccessStatus,
                MARKER,
            )
            .await;

        let body = outcome.body().unwrap();
        assert!(body.contains(MARKER));
        assert!(body.contains(ELIDED));
        assert!(body.len() <= MAX_BODY_BYTES + 2 * EXCERPT_CONTEXT + MARKER.len() + ELIDED.len());
    }

    #[tokio::test]
    async fn plain_probe_still_caps_large_bodies() {
        let base = serve(Router::new().route("/show-all", get(|| async { huge_page() }))).await;
        let outcome = HttpProber::default()
            .probe(&format!("{base}/show-all"), Duration::from_secs(5), Expect::SuccessStatus)
            .await;
        assert_eq!(outcome.body().unwrap().len(), MAX_BODY_BYTES);
    }

    #[test]
    fn marker_split_across_chunks_is_found() {
        let mut body = CappedBody::new(8, Some("needle"));
        assert!(body.push(b"abcdefgh"));
        assert!(body.push(b"xxxxne"));
        assert!(!body.push(b"edleyy"));
        assert_eq!(body.finish(), format!("abcdefgh{ELIDED}xxxneedleyy"));
    }

    #[test]
    fn marker_straddling_the_cap_is_found() {
        let mut body = CappedBody::new(8, Some("needle"));
        assert!(!body.push(b"abcdeneedle"));
        assert_eq!(body.finish(), format!("abcdenee{ELIDED}abcdeneedle"));
    }

    #[test]
    fn marker_inside_the_cap_needs_no_excerpt() {
        let mut body = CappedBody::new(8, Some("fg"));
        assert!(!body.push(b"abcdefghij"));
        assert_eq!(body.finish(), "abcdefgh");
    }

    #[test]
    fn without_marker_reading_stops_at_the_cap() {
        let mut body = CappedBody::new(4, None);
        assert!(body.push(b"ab"));
        assert!(!body.push(b"cdef"));
        assert_eq!(body.finish(), "abcd");
    }

    #[test]
    fn missing_marker_keeps_scanning() {
        let mut body = CappedBody::new(4, Some("zz"));
        assert!(body.push(b"abcdef"));
        assert!(body.push(b"ghij"));
        assert_eq!(body.finish(), "abcd");
    }

    #[tokio::test]
    async fn malformed_url_is_network_error() {
        let outcome = HttpProber::default()
            .probe("not a url", Duration::from_secs(1), Expect::AnyStatus)
            .await;
        assert!(matches!(outcome, ProbeOutcome::NetworkError { ref url, .. } if url == "not a url"));
    }
}
