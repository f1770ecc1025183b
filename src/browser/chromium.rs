//! Chromium engine over the DevTools protocol.
//!
//! Every session launches its own browser process with a throwaway profile
//! directory, so cookies and storage never leak between messages.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::controls::{ControlCaps, ControlId, RawControl, collect_script, decode_raw_controls};
use crate::browser::{BrowserEngine, NavigationInfo, PageSession};
use crate::error::BrowserError;

/// Consecutive handler errors tolerated before the event loop gives up.
const HANDLER_ERROR_TOLERANCE: usize = 16;

/// Poll interval while waiting for network idle.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Quiet period that counts as idle.
const IDLE_QUIET: Duration = Duration::from_millis(500);

/// Launch options for the Chromium engine.
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    /// Explicit browser binary; `None` lets the driver search the usual paths.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub user_agent: Option<String>,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            no_sandbox: false,
            user_agent: None,
        }
    }
}

impl ChromiumOptions {
    /// Read `CHROME_BIN`, `UNSUB_HEADLESS`, and `NO_SANDBOX`/`CI`.
    pub fn from_env() -> Self {
        let executable = std::env::var("CHROME_BIN")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let headless = std::env::var("UNSUB_HEADLESS")
            .ok()
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        let no_sandbox = std::env::var("NO_SANDBOX").is_ok() || std::env::var("CI").is_ok();

        Self {
            executable,
            headless,
            no_sandbox,
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-extensions".to_string(),
            "--disable-infobars".to_string(),
            "--no-first-run".to_string(),
        ];
        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        args
    }
}

/// Launches a fresh Chromium per session.
pub struct ChromiumEngine {
    options: ChromiumOptions,
}

impl ChromiumEngine {
    pub fn new(options: ChromiumOptions) -> Self {
        Self { options }
    }

    fn profile_dir() -> Result<PathBuf, BrowserError> {
        let dir = std::env::temp_dir().join(format!("unsub-assist-profile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir)
            .map_err(|e| BrowserError::Unavailable(format!("Failed to create profile dir: {e}")))?;
        Ok(dir)
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn open_session(&self) -> Result<Box<dyn PageSession>, BrowserError> {
        let profile_dir = Self::profile_dir()?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .args(self.options.launch_args());
        if let Some(bin) = &self.options.executable {
            builder = builder.chrome_executable(bin);
        }
        if !self.options.headless {
            builder = builder.with_head();
        }
        let config = match builder.build() {
            Ok(config) => config,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(BrowserError::Unavailable(format!("Config failed: {e}")));
            }
        };

        info!(headless = self.options.headless, "Launching chromium session");

        let (mut browser, mut handler) = match Browser::launch(config).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(BrowserError::Unavailable(e.to_string()));
            }
        };

        let handler_task = tokio::spawn(async move {
            let mut consecutive_errors = 0usize;
            while let Some(event) = handler.next().await {
                match event {
                    Ok(_) => consecutive_errors = 0,
                    Err(err) => {
                        consecutive_errors += 1;
                        warn!(
                            "Chromium handler event error (#{}/{}): {}",
                            consecutive_errors, HANDLER_ERROR_TOLERANCE, err
                        );
                        if consecutive_errors >= HANDLER_ERROR_TOLERANCE {
                            break;
                        }
                    }
                }
            }
            debug!("Chromium event loop exited");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(BrowserError::Unavailable(format!("Failed to open page: {e}")));
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            profile_dir,
        }))
    }
}

/// One browser process plus its single page.
struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    profile_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ActionResult {
    ok: bool,
    #[serde(default)]
    reason: String,
}

impl ChromiumSession {
    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T, BrowserError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| BrowserError::Script(format!("Failed to decode result: {e}")))
    }

    async fn eval_action(&self, script: &str, target: &str) -> Result<(), BrowserError> {
        let result: ActionResult = self.eval(script).await?;
        if result.ok {
            Ok(())
        } else if result.reason == "not_found" {
            Err(BrowserError::ElementNotFound(target.to_string()))
        } else {
            Err(BrowserError::Script(result.reason))
        }
    }

    async fn click_selector(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Internal(format!("Click failed: {e}")))?;
        Ok(())
    }

    async fn navigation_status(&self) -> Option<u16> {
        let script = r#"(() => {
            const nav = performance.getEntriesByType("navigation")[0];
            return nav && nav.responseStatus ? nav.responseStatus : null;
        })()"#;
        self.eval::<Option<u16>>(script).await.ok().flatten()
    }
}

fn js_string(value: &str) -> Result<String, BrowserError> {
    serde_json::to_string(value).map_err(|e| BrowserError::Internal(format!("Encode failed: {e}")))
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationInfo, BrowserError> {
        let nav = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::NavigateFailed {
                    url: url.to_string(),
                    details: e.to_string(),
                })?
                .wait_for_navigation()
                .await
                .map_err(|e| BrowserError::NavigateFailed {
                    url: url.to_string(),
                    details: e.to_string(),
                })?;
            Ok::<(), BrowserError>(())
        };
        tokio::time::timeout(timeout, nav)
            .await
            .map_err(|_| BrowserError::Timeout(timeout))??;

        Ok(NavigationInfo {
            status: self.navigation_status().await,
            final_url: self.page.url().await.ok().flatten(),
            title: self.page.get_title().await.ok().flatten(),
        })
    }

    async fn location(&self) -> Result<NavigationInfo, BrowserError> {
        let final_url = self.page.url().await.map_err(|e| BrowserError::Script(e.to_string()))?;
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(NavigationInfo {
            status: None,
            final_url,
            title,
        })
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), BrowserError> {
        let snapshot = r#"(() => ({
            ready: document.readyState,
            resources: performance.getEntriesByType("resource").length
        }))()"#;

        #[derive(Deserialize)]
        struct LoadState {
            ready: String,
            resources: u64,
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_count: Option<u64> = None;
        let mut quiet_since = tokio::time::Instant::now();

        while tokio::time::Instant::now() < deadline {
            if let Ok(p) = self.eval::<LoadState>(snapshot).await {
                let now = tokio::time::Instant::now();
                if last_count != Some(p.resources) {
                    last_count = Some(p.resources);
                    quiet_since = now;
                } else if p.ready == "complete" && now.duration_since(quiet_since) >= IDLE_QUIET {
                    return Ok(());
                }
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
        Err(BrowserError::Timeout(timeout))
    }

    async fn inner_text(&self) -> Result<String, BrowserError> {
        self.eval("document.body ? document.body.innerText : ''").await
    }

    async fn text_content(&self) -> Result<String, BrowserError> {
        self.eval("document.documentElement ? document.documentElement.textContent : ''")
            .await
    }

    async fn html(&self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Internal(e.to_string()))
    }

    async fn collect_controls(
        &self,
        round: u32,
        caps: &ControlCaps,
    ) -> Result<Vec<RawControl>, BrowserError> {
        let values: Vec<serde_json::Value> = self.eval(&collect_script(round, caps)).await?;
        Ok(decode_raw_controls(values))
    }

    async fn click_control(&self, id: ControlId) -> Result<(), BrowserError> {
        self.click_selector(&id.selector()).await
    }

    async fn click_text(&self, text: &str) -> Result<(), BrowserError> {
        let needle = js_string(&text.trim().to_lowercase())?;
        let script = format!(
            r#"(() => {{
                const needle = {needle};
                const candidates = document.querySelectorAll("a, button, input[type=submit], input[type=button], [role=button], [onclick], label");
                const norm = s => (s || "").replace(/\s+/g, " ").trim().toLowerCase();
                let match = null;
                for (const el of candidates) {{
                    const text = norm(el.innerText || el.value || el.getAttribute("aria-label"));
                    if (text === needle) {{ match = el; break; }}
                    if (!match && text.includes(needle)) match = el;
                }}
                if (!match) return {{ ok: false, reason: "not_found" }};
                match.scrollIntoView({{ block: "center" }});
                match.click();
                return {{ ok: true, reason: "" }};
            }})()"#
        );
        self.eval_action(&script, text).await
    }

    async fn click_role(&self, role: &str, name: &str) -> Result<(), BrowserError> {
        let role_json = js_string(&role.trim().to_lowercase())?;
        let name_json = js_string(&name.trim().to_lowercase())?;
        let script = format!(
            r#"(() => {{
                const role = {role_json};
                const name = {name_json};
                const implicit = {{ button: "button, input[type=submit], input[type=button]", link: "a[href]", checkbox: "input[type=checkbox]", radio: "input[type=radio]", textbox: "input, textarea", combobox: "select" }};
                const selector = "[role=" + JSON.stringify(role) + "]" + (implicit[role] ? ", " + implicit[role] : "");
                const norm = s => (s || "").replace(/\s+/g, " ").trim().toLowerCase();
                for (const el of document.querySelectorAll(selector)) {{
                    const label = norm(el.getAttribute("aria-label") || el.innerText || el.value || el.getAttribute("title"));
                    if (label === name || (name && label.includes(name))) {{
                        el.scrollIntoView({{ block: "center" }});
                        el.click();
                        return {{ ok: true, reason: "" }};
                    }}
                }}
                return {{ ok: false, reason: "not_found" }};
            }})()"#
        );
        self.eval_action(&script, &format!("{role}[{name}]")).await
    }

    async fn fill(&self, id: ControlId, value: &str) -> Result<(), BrowserError> {
        let selector = js_string(&id.selector())?;
        let value = js_string(value)?;
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({selector});
                if (!el) return {{ ok: false, reason: "not_found" }};
                el.focus();
                el.value = {value};
                el.dispatchEvent(new Event("input", {{ bubbles: true }}));
                el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                return {{ ok: true, reason: "" }};
            }})()"#
        );
        self.eval_action(&script, &id.marker()).await
    }

    async fn select_option(&self, id: ControlId, value: &str) -> Result<(), BrowserError> {
        let selector = js_string(&id.selector())?;
        let value = js_string(value)?;
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({selector});
                if (!el) return {{ ok: false, reason: "not_found" }};
                const wanted = {value};
                const norm = s => (s || "").replace(/\s+/g, " ").trim().toLowerCase();
                const opt = Array.from(el.options || []).find(o => o.value === wanted || norm(o.label) === norm(wanted));
                if (!opt) return {{ ok: false, reason: "option not found: " + wanted }};
                el.value = opt.value;
                el.dispatchEvent(new Event("input", {{ bubbles: true }}));
                el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                return {{ ok: true, reason: "" }};
            }})()"#
        );
        self.eval_action(&script, &id.marker()).await
    }

    async fn set_checked(&self, id: ControlId, checked: bool) -> Result<(), BrowserError> {
        let selector = js_string(&id.selector())?;
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({selector});
                if (!el) return {{ ok: false, reason: "not_found" }};
                if (el.checked !== {checked}) el.click();
                if (el.checked !== {checked}) {{
                    el.checked = {checked};
                    el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                }}
                return {{ ok: true, reason: "" }};
            }})()"#
        );
        self.eval_action(&script, &id.marker()).await
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(BrowserError::Internal("Key cannot be empty".to_string()));
        }
        let element = match self.page.find_element(":focus").await {
            Ok(el) => el,
            Err(_) => self
                .page
                .find_element("body")
                .await
                .map_err(|_| BrowserError::ElementNotFound("body".to_string()))?,
        };
        element
            .press_key(key)
            .await
            .map_err(|e| BrowserError::Internal(format!("Key press failed: {e}")))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        let ChromiumSession {
            mut browser,
            page,
            handler_task,
            profile_dir,
        } = *self;

        if let Err(e) = page.close().await {
            debug!("Page close failed: {e}");
        }
        let closed = browser.close().await;
        let _ = browser.wait().await;
        handler_task.abort();
        if let Err(e) = std::fs::remove_dir_all(&profile_dir) {
            debug!("Failed to remove profile dir {}: {e}", profile_dir.display());
        }

        closed
            .map(|_| ())
            .map_err(|e| BrowserError::Internal(format!("Browser close failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_follow_options() {
        let options = ChromiumOptions {
            no_sandbox: true,
            ..Default::default()
        }
        .with_user_agent("unsub-assist/test");
        let args = options.launch_args();
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--user-agent=unsub-assist/test".to_string()));

        let args = ChromiumOptions::default().launch_args();
        assert!(!args.iter().any(|a| a == "--no-sandbox"));
        assert!(!args.iter().any(|a| a.starts_with("--user-agent")));
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b"#).unwrap(), r#""a\"b""#);
    }

    #[tokio::test]
    async fn missing_binary_reports_unavailable() {
        let engine = ChromiumEngine::new(ChromiumOptions {
            executable: Some(PathBuf::from("/nonexistent/unsub-assist/chrome")),
            ..Default::default()
        });
        match engine.open_session().await {
            Err(BrowserError::Unavailable(_)) => {}
            Err(other) => panic!("expected Unavailable, got {other}"),
            Ok(_) => panic!("expected launch failure"),
        }
    }
}
