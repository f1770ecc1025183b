//! Headless browser capability.
//!
//! The interactive agent drives pages through two narrow traits:
//! `BrowserEngine` hands out isolated sessions, `PageSession` exposes the
//! handful of page operations the agent needs. `chromium` implements them
//! over the Chrome DevTools Protocol; tests use scripted fakes.

pub mod chromium;
pub mod controls;

pub use chromium::{ChromiumEngine, ChromiumOptions};
pub use controls::{ControlCaps, ControlId, ControlInventory, ControlKind, ControlSnapshot, RawControl};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BrowserError;

/// Diagnostics captured after top-level navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Source of isolated browser sessions.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Acquire a fresh, isolated session.
    ///
    /// `BrowserError::Unavailable` means the engine cannot run at all on this
    /// host (no browser binary, launch refused).
    async fn open_session(&self) -> Result<Box<dyn PageSession>, BrowserError>;
}

/// One isolated page. Released with `close`, which callers must always reach.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Load `url` and wait until the DOM is ready.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationInfo, BrowserError>;

    /// Where the page currently is, without the response status. Useful
    /// after a failed navigation that may still have landed somewhere.
    async fn location(&self) -> Result<NavigationInfo, BrowserError> {
        Ok(NavigationInfo::default())
    }

    /// Wait until network activity settles. `Err(Timeout)` means "no signal".
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), BrowserError>;

    /// Rendered text (`innerText` of the body).
    async fn inner_text(&self) -> Result<String, BrowserError>;

    /// Raw `textContent` of the document.
    async fn text_content(&self) -> Result<String, BrowserError>;

    /// Full serialized HTML.
    async fn html(&self) -> Result<String, BrowserError>;

    /// Tag and describe visible controls for `round`.
    async fn collect_controls(
        &self,
        round: u32,
        caps: &ControlCaps,
    ) -> Result<Vec<RawControl>, BrowserError>;

    async fn click_control(&self, id: ControlId) -> Result<(), BrowserError>;

    /// Click the first clickable element whose visible text matches `text`.
    async fn click_text(&self, text: &str) -> Result<(), BrowserError>;

    /// Click the first element with ARIA `role` and accessible name `name`.
    async fn click_role(&self, role: &str, name: &str) -> Result<(), BrowserError>;

    async fn fill(&self, id: ControlId, value: &str) -> Result<(), BrowserError>;

    /// Select an option by value or visible label.
    async fn select_option(&self, id: ControlId, value: &str) -> Result<(), BrowserError>;

    async fn set_checked(&self, id: ControlId, checked: bool) -> Result<(), BrowserError>;

    async fn press_key(&self, key: &str) -> Result<(), BrowserError>;

    /// Tear the session down, including its browser context.
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}
