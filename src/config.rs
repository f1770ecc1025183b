//! Configuration types.

use std::time::Duration;

use crate::browser::ControlCaps;
use crate::error::ConfigError;

/// When the orchestrator tries a one-click POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OneClickPolicy {
    /// One-click only when the header's first http link is also the chosen
    /// candidate.
    #[default]
    FirstHttpLink,
    /// One-click against the header's first http link whenever it is
    /// advertised, regardless of which candidate the agent would use.
    AnyHttpLink,
}

impl OneClickPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstHttpLink => "first_http_link",
            Self::AnyHttpLink => "any_http_link",
        }
    }
}

impl std::str::FromStr for OneClickPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_http_link" => Ok(Self::FirstHttpLink),
            "any_http_link" => Ok(Self::AnyHttpLink),
            other => Err(ConfigError::InvalidValue {
                key: "UNSUB_ONE_CLICK_POLICY".to_string(),
                message: format!("unknown policy '{other}'"),
            }),
        }
    }
}

/// Interactive agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Plan/execute/verify rounds per attempt.
    pub max_rounds: u32,
    /// Whole-attempt bound, including teardown.
    pub attempt_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Best-effort idle wait after navigation.
    pub settle_after_navigation: Duration,
    /// Best-effort idle wait after executing a plan.
    pub settle_after_actions: Duration,
    /// Page text sent to the planner is truncated to this many chars.
    pub page_text_limit: usize,
    /// Minimum verifier confidence that counts as confirmed.
    pub confidence_threshold: f64,
    pub control_caps: ControlCaps,
    /// Upper bound for a single `wait` action.
    pub max_wait: Duration,
    /// Bound on closing the browser session.
    pub teardown_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            attempt_timeout: Duration::from_secs(45),
            navigation_timeout: Duration::from_secs(20),
            settle_after_navigation: Duration::from_secs(5),
            settle_after_actions: Duration::from_secs(2),
            page_text_limit: 6000,
            confidence_threshold: 0.6,
            control_caps: ControlCaps::default(),
            max_wait: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

/// Resolution pipeline configuration.
#[derive(Debug, Clone)]
pub struct UnsubscribeConfig {
    pub one_click_timeout: Duration,
    pub user_agent: String,
    pub one_click_policy: OneClickPolicy,
    /// Overall bound for one batch call, if any.
    pub batch_deadline: Option<Duration>,
    pub agent: AgentConfig,
}

impl Default for UnsubscribeConfig {
    fn default() -> Self {
        Self {
            one_click_timeout: Duration::from_secs(20),
            user_agent: default_user_agent(),
            one_click_policy: OneClickPolicy::default(),
            batch_deadline: None,
            agent: AgentConfig::default(),
        }
    }
}

impl UnsubscribeConfig {
    /// Build config from `UNSUB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let one_click_timeout = env_secs("UNSUB_ONE_CLICK_TIMEOUT_SECS")
            .unwrap_or(defaults.one_click_timeout);

        let user_agent = std::env::var("UNSUB_USER_AGENT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.user_agent);

        let one_click_policy = match std::env::var("UNSUB_ONE_CLICK_POLICY") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => OneClickPolicy::default(),
        };

        let batch_deadline = env_secs("UNSUB_BATCH_DEADLINE_SECS");

        let mut agent = defaults.agent;
        if let Some(timeout) = env_secs("UNSUB_AGENT_TIMEOUT_SECS") {
            agent.attempt_timeout = timeout;
        }
        if let Some(rounds) = std::env::var("UNSUB_AGENT_MAX_ROUNDS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            if rounds == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "UNSUB_AGENT_MAX_ROUNDS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            agent.max_rounds = rounds;
        }

        Ok(Self {
            one_click_timeout,
            user_agent,
            one_click_policy,
            batch_deadline,
            agent,
        })
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn default_user_agent() -> String {
    format!(
        "unsub-assist/{} (+automated unsubscribe)",
        env!("CARGO_PKG_VERSION")
    )
}
