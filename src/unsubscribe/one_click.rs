//! One-click unsubscribe (RFC 8058): classification and execution.
//!
//! A sender advertises one-click support with
//! `List-Unsubscribe-Post: List-Unsubscribe=One-Click`. The unsubscribe is then
//! a single form-encoded POST of that same body to the header's http URL.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed request body for a one-click POST.
pub const ONE_CLICK_BODY: &str = "List-Unsubscribe=One-Click";

/// Default timeout for the POST.
pub const DEFAULT_ONE_CLICK_TIMEOUT: Duration = Duration::from_secs(20);

static ONE_CLICK_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^list-unsubscribe\s*=\s*one-click$").unwrap());

/// Check whether a `List-Unsubscribe-Post` value signals one-click support.
///
/// Case and whitespace around `=` are ignored. Absent or empty → false.
pub fn is_one_click(list_unsubscribe_post: Option<&str>) -> bool {
    let Some(value) = list_unsubscribe_post else {
        return false;
    };
    let folded = value.trim().to_lowercase();
    !folded.is_empty() && ONE_CLICK_VALUE.is_match(&folded)
}

/// Whether an HTTP status counts as a successful one-click.
pub fn is_success_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Result of a one-click POST. `status` is `None` on transport failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneClickResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OneClickResult {
    fn transport_failure(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: None,
            final_url: None,
            error: Some(reason.into()),
        }
    }
}

/// Anything that can perform the one-click POST. Never fails; failures are data.
#[async_trait]
pub trait OneClickSender: Send + Sync {
    async fn send(&self, url: &str) -> OneClickResult;
}

/// reqwest-backed one-click executor.
pub struct OneClickExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl OneClickExecutor {
    /// Create an executor with a descriptive user agent and default timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build one-click HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self { client, timeout }
    }

    /// POST the one-click body to `url` with the default timeout.
    pub async fn execute(&self, url: &str) -> OneClickResult {
        self.execute_with_timeout(url, self.timeout).await
    }

    /// POST the one-click body to `url`, bounded by `timeout`.
    pub async fn execute_with_timeout(&self, url: &str, timeout: Duration) -> OneClickResult {
        let parsed = match url::Url::parse(url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            Ok(u) => {
                return OneClickResult::transport_failure(format!(
                    "unsupported scheme: {}",
                    u.scheme()
                ));
            }
            Err(e) => return OneClickResult::transport_failure(format!("invalid url: {e}")),
        };

        let response = self
            .client
            .post(parsed)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(ONE_CLICK_BODY)
            .timeout(timeout)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let ok = is_success_status(status);
                debug!(url = url, status, ok, "One-click POST completed");
                OneClickResult {
                    ok,
                    status: Some(status),
                    final_url: Some(resp.url().to_string()),
                    error: None,
                }
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timeout after {}s", timeout.as_secs())
                } else {
                    e.to_string()
                };
                warn!(url = url, error = %reason, "One-click POST failed");
                OneClickResult::transport_failure(reason)
            }
        }
    }
}

#[async_trait]
impl OneClickSender for OneClickExecutor {
    async fn send(&self, url: &str) -> OneClickResult {
        self.execute(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_accepts_canonical_value() {
        assert!(is_one_click(Some("List-Unsubscribe=One-Click")));
    }

    #[test]
    fn classifier_tolerates_case_and_whitespace() {
        assert!(is_one_click(Some(" list-unsubscribe = one-click ")));
        assert!(is_one_click(Some("LIST-UNSUBSCRIBE=ONE-CLICK")));
        assert!(is_one_click(Some("List-Unsubscribe\t=\tOne-Click\r\n")));
    }

    #[test]
    fn classifier_rejects_absent_empty_and_unrelated() {
        assert!(!is_one_click(None));
        assert!(!is_one_click(Some("")));
        assert!(!is_one_click(Some("   ")));
        assert!(!is_one_click(Some("List-Unsubscribe=Manual")));
        assert!(!is_one_click(Some("one-click")));
        assert!(!is_one_click(Some("List-Unsubscribe=One-Click; extra")));
    }

    #[test]
    fn success_status_range() {
        for status in [200, 201, 204, 299, 301, 302, 304, 399] {
            assert!(is_success_status(status), "{status} should succeed");
        }
        for status in [100, 199, 400, 401, 404, 410, 429, 500, 503] {
            assert!(!is_success_status(status), "{status} should fail");
        }
    }

    #[tokio::test]
    async fn executor_rejects_non_http_urls_without_status() {
        let executor = OneClickExecutor::new("test-agent", Duration::from_secs(1));
        let result = executor.execute("mailto:leave@list.example").await;
        assert!(!result.ok);
        assert!(result.status.is_none());
        assert!(result.error.unwrap().contains("unsupported scheme"));

        let result = executor.execute("not a url").await;
        assert!(!result.ok);
        assert!(result.status.is_none());
    }

    #[tokio::test]
    async fn executor_reports_connection_refused_as_transport_failure() {
        // Bind then drop a listener so the port is very likely closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let executor = OneClickExecutor::new("test-agent", Duration::from_secs(2));
        let result = executor
            .execute(&format!("http://127.0.0.1:{port}/unsubscribe"))
            .await;
        assert!(!result.ok);
        assert!(result.status.is_none());
        assert!(result.error.is_some());
    }
}
