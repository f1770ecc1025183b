//! Shared types for unsubscribe resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::trace::StepEntry;

// ── Extraction ──────────────────────────────────────────────────────

/// Candidate unsubscribe endpoints extracted from one message.
///
/// Each list is an insertion-ordered set. `http_links` and `guessed_links`
/// only hold http/https URLs; `mailto_links` only holds `mailto:` URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeLinks {
    #[serde(default)]
    pub http_links: Vec<String>,
    #[serde(default)]
    pub mailto_links: Vec<String>,
    #[serde(default)]
    pub guessed_links: Vec<String>,
    /// Raw `List-Unsubscribe-Post` value, if present.
    #[serde(default)]
    pub list_unsubscribe_post: Option<String>,
}

impl UnsubscribeLinks {
    /// The HTTP candidate the orchestrator acts on: header link first, then a guess.
    pub fn first_http_candidate(&self) -> Option<&str> {
        self.http_links
            .first()
            .or_else(|| self.guessed_links.first())
            .map(String::as_str)
    }

    pub fn first_mailto(&self) -> Option<&str> {
        self.mailto_links.first().map(String::as_str)
    }

    /// True when no candidate of any kind was found.
    pub fn is_empty(&self) -> bool {
        self.http_links.is_empty() && self.mailto_links.is_empty() && self.guessed_links.is_empty()
    }
}

/// Push `value` unless it is already present, keeping first-seen order.
pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

// ── Attempts ────────────────────────────────────────────────────────

/// Strategy used for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeMethod {
    OneClickPost,
    Agent,
    Mailto,
    None,
}

impl UnsubscribeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneClickPost => "one_click_post",
            Self::Agent => "agent",
            Self::Mailto => "mailto",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one_click_post" => Some(Self::OneClickPost),
            "agent" => Some(Self::Agent),
            "mailto" => Some(Self::Mailto),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for UnsubscribeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an attempt as written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Immutable audit entry for one resolution try against one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub message_id: String,
    pub method: UnsubscribeMethod,
    pub status: AttemptStatus,
    /// Method-specific diagnostics (status code, final URL, step trace, error code).
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(
        message_id: impl Into<String>,
        method: UnsubscribeMethod,
        status: AttemptStatus,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id: message_id.into(),
            method,
            status,
            detail,
            created_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == AttemptStatus::Succeeded
    }
}

// ── Failure taxonomy ────────────────────────────────────────────────

/// Machine-readable failure codes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    InvalidUrl,
    /// Browser automation capability unavailable.
    PlaywrightNotInstalled,
    /// Planning/verification service unavailable.
    OpenaiNotConfigured,
    AiPlanUnavailable,
    AgentDidNotConfirmUnsubscribe,
    AgentTimeout,
    TransportFailure,
    MailtoUnsubscribeNotSupported,
    NoUnsubscribeLinkFound,
    MessageNotFound,
    DeadlineExceeded,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::PlaywrightNotInstalled => "playwright_not_installed",
            Self::OpenaiNotConfigured => "openai_not_configured",
            Self::AiPlanUnavailable => "ai_plan_unavailable",
            Self::AgentDidNotConfirmUnsubscribe => "agent_did_not_confirm_unsubscribe",
            Self::AgentTimeout => "agent_timeout",
            Self::TransportFailure => "transport_failure",
            Self::MailtoUnsubscribeNotSupported => "mailto_unsubscribe_not_supported",
            Self::NoUnsubscribeLinkFound => "no_unsubscribe_link_found",
            Self::MessageNotFound => "message_not_found",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt failed: a known code or a stringified unexpected fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Code(FailureCode),
    Other(String),
}

impl From<FailureCode> for FailureReason {
    fn from(code: FailureCode) -> Self {
        Self::Code(code)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => f.write_str(code.as_str()),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Per-message result returned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeOutcome {
    pub message_id: String,
    pub ok: bool,
    pub method: UnsubscribeMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnsubscribeOutcome {
    pub fn success(message_id: &str, method: UnsubscribeMethod, url: Option<String>) -> Self {
        Self {
            message_id: message_id.to_string(),
            ok: true,
            method,
            url,
            steps: Vec::new(),
            error: None,
        }
    }

    pub fn failure(
        message_id: &str,
        method: UnsubscribeMethod,
        url: Option<String>,
        reason: &FailureReason,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            ok: false,
            method,
            url,
            steps: Vec::new(),
            error: Some(reason.to_string()),
        }
    }

    pub fn with_steps(mut self, steps: Vec<StepEntry>) -> Self {
        self.steps = steps;
        self
    }
}
