//! Interactive unsubscribe agent.
//!
//! Drives one isolated browser session through an unknown unsubscribe page:
//!
//! ```text
//! INIT -> NAVIGATE -> PRE_VERIFY -> (DONE_SUCCESS | PLAN -> EXECUTE -> POST_VERIFY
//!                                    -> (DONE_SUCCESS | next round | DONE_FAILURE))
//! ```
//!
//! Rounds are bounded by `AgentConfig::max_rounds`. The post-verify of one
//! round is the pre-verify of the next, so the page is only re-checked after
//! something was done to it. Every exit path closes the session.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::agent::actions::ResolvedAction;
use crate::agent::planner::{PlanInput, PlanOutcome, Planner};
use crate::agent::trace::{AgentPhase, StepEntry, StepTrace};
use crate::agent::verify::{Verifier, capture_page_text};
use crate::browser::{BrowserEngine, ControlInventory, NavigationInfo, PageSession};
use crate::config::AgentConfig;
use crate::error::BrowserError;
use crate::llm::LlmProvider;
use crate::unsubscribe::types::{FailureCode, FailureReason};

/// Bound on a single plan action.
const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one agent attempt. Always carries the trace.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub ok: bool,
    pub error: Option<FailureReason>,
    pub steps: Vec<StepEntry>,
    pub navigation: Option<NavigationInfo>,
}

impl AgentOutcome {
    fn finish(trace: StepTrace, result: Result<(), FailureReason>, navigation: Option<NavigationInfo>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err(),
            steps: trace.into_entries(),
            navigation,
        }
    }

    /// Error string reported to callers.
    pub fn error_string(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Anything that can attempt an unsubscribe at a URL. Never fails; failures are data.
#[async_trait]
pub trait UnsubscribeAgent: Send + Sync {
    async fn unsubscribe(&self, url: &str, user_email: Option<&str>) -> AgentOutcome;
}

/// Browser + planning model agent.
pub struct InteractiveAgent {
    engine: Arc<dyn BrowserEngine>,
    llm: Option<Arc<dyn LlmProvider>>,
    config: AgentConfig,
}

impl InteractiveAgent {
    pub fn new(engine: Arc<dyn BrowserEngine>, llm: Option<Arc<dyn LlmProvider>>, config: AgentConfig) -> Self {
        Self { engine, llm, config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Navigate, then run verify/plan/execute rounds until confirmed or exhausted.
    async fn drive(
        &self,
        session: &dyn PageSession,
        llm: &dyn LlmProvider,
        url: &str,
        user_email: Option<&str>,
        trace: &mut StepTrace,
        navigation: &mut Option<NavigationInfo>,
    ) -> Result<(), FailureReason> {
        let config = &self.config;

        // NAVIGATE
        let info = match session.navigate(url, config.navigation_timeout).await {
            Ok(info) => info,
            Err(e) => {
                let landed = session.location().await.unwrap_or_else(|le| {
                    debug!("Page location unavailable: {le}");
                    NavigationInfo::default()
                });
                warn!(url, final_url = ?landed.final_url, "Navigation failed: {e}");
                trace.push(
                    AgentPhase::Navigate,
                    json!({
                        "ok": false,
                        "url": url,
                        "finalUrl": landed.final_url,
                        "title": landed.title,
                        "error": e.to_string(),
                    }),
                );
                *navigation = Some(landed);
                return Err(FailureCode::TransportFailure.into());
            }
        };
        let idle = settle(session, config.settle_after_navigation).await;
        info!(
            url,
            status = ?info.status,
            final_url = ?info.final_url,
            "Navigated"
        );
        trace.push(
            AgentPhase::Navigate,
            json!({
                "ok": true,
                "status": info.status,
                "finalUrl": info.final_url,
                "title": info.title,
                "networkIdle": idle,
            }),
        );
        let current_url = info.final_url.clone().unwrap_or_else(|| url.to_string());
        *navigation = Some(info);

        let verifier = Verifier::new(Some(llm), config.confidence_threshold, config.page_text_limit);
        let planner = Planner::new(llm, config.page_text_limit, config.max_wait);

        // PRE_VERIFY
        let mut page_text = capture_page_text(session).await;
        let verdict = verifier.verify(&current_url, &page_text).await;
        let mut detail = verdict.to_detail();
        detail["textChars"] = page_text.chars().count().into();
        trace.push_round(AgentPhase::PreVerify, 1, detail);
        if verdict.confirmed {
            info!(url, source = verdict.source.as_str(), "Page already confirms unsubscribe");
            trace.push(AgentPhase::DoneSuccess, json!({"round": 1, "stage": "pre_verify"}));
            return Ok(());
        }

        for round in 1..=config.max_rounds {
            // PLAN
            let raw = match session.collect_controls(round, &config.control_caps).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(round, "Control scan failed: {e}");
                    Vec::new()
                }
            };
            let inventory = ControlInventory::from_raw(round, raw);

            let outcome = planner
                .plan(PlanInput {
                    url: &current_url,
                    page_text: &page_text,
                    user_email,
                    inventory: &inventory,
                    round,
                })
                .await;
            let actions = match outcome {
                PlanOutcome::Ready(actions) => actions,
                PlanOutcome::Unavailable(reason) => {
                    trace.push_round(
                        AgentPhase::Plan,
                        round,
                        json!({"ok": false, "controls": inventory.len(), "reason": reason}),
                    );
                    return Err(FailureCode::AiPlanUnavailable.into());
                }
            };
            info!(round, actions = actions.len(), controls = inventory.len(), "Plan accepted");
            trace.push_round(
                AgentPhase::Plan,
                round,
                json!({
                    "ok": true,
                    "controls": inventory.len(),
                    "kinds": inventory.kind_counts(),
                    "actions": actions.iter().map(|a| a.describe()).collect::<Vec<_>>(),
                }),
            );

            // EXECUTE
            for action in &actions {
                let result = apply_action(session, action).await;
                let mut detail = action.describe();
                detail["ok"] = result.is_ok().into();
                match &result {
                    Ok(()) => debug!(round, action = ?action, "Action applied"),
                    Err(e) => {
                        warn!(round, action = ?action, "Action failed, continuing: {e}");
                        detail["error"] = e.to_string().into();
                    }
                }
                trace.push_round(AgentPhase::Execute, round, detail);
            }
            settle(session, config.settle_after_actions).await;

            // POST_VERIFY
            page_text = capture_page_text(session).await;
            let verdict = verifier.verify(&current_url, &page_text).await;
            let mut detail = verdict.to_detail();
            detail["textChars"] = page_text.chars().count().into();
            trace.push_round(AgentPhase::PostVerify, round, detail);
            if verdict.confirmed {
                info!(url, round, source = verdict.source.as_str(), "Unsubscribe confirmed");
                trace.push(AgentPhase::DoneSuccess, json!({"round": round, "stage": "post_verify"}));
                return Ok(());
            }
        }

        Err(FailureCode::AgentDidNotConfirmUnsubscribe.into())
    }
}

#[async_trait]
impl UnsubscribeAgent for InteractiveAgent {
    async fn unsubscribe(&self, url: &str, user_email: Option<&str>) -> AgentOutcome {
        let mut trace = StepTrace::new();
        trace.push(
            AgentPhase::Init,
            json!({"url": url, "maxRounds": self.config.max_rounds}),
        );

        if !is_http_url(url) {
            return fail(trace, FailureCode::InvalidUrl.into(), None);
        }
        let Some(llm) = self.llm.as_deref() else {
            return fail(trace, FailureCode::OpenaiNotConfigured.into(), None);
        };

        let deadline = Instant::now() + self.config.attempt_timeout;
        let work_deadline = deadline
            .checked_sub(self.config.teardown_timeout)
            .filter(|d| *d > Instant::now())
            .unwrap_or(deadline);

        let session = match tokio::time::timeout_at(work_deadline, self.engine.open_session()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!("Browser unavailable: {e}");
                trace.push(AgentPhase::Navigate, json!({"ok": false, "error": e.to_string()}));
                return fail(trace, FailureCode::PlaywrightNotInstalled.into(), None);
            }
            Err(_) => return fail(trace, FailureCode::AgentTimeout.into(), None),
        };

        let mut navigation = None;
        let driven = tokio::time::timeout_at(
            work_deadline,
            AssertUnwindSafe(self.drive(
                session.as_ref(),
                llm,
                url,
                user_email,
                &mut trace,
                &mut navigation,
            ))
            .catch_unwind(),
        )
        .await;

        let result = match driven {
            Ok(Ok(result)) => result,
            Ok(Err(panic_payload)) => {
                let msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "agent panicked".to_string());
                error!(url, "Agent attempt panicked: {msg}");
                Err(FailureReason::Other(msg))
            }
            Err(_) => {
                warn!(url, timeout = ?self.config.attempt_timeout, "Agent attempt timed out");
                Err(FailureCode::AgentTimeout.into())
            }
        };

        match tokio::time::timeout(self.config.teardown_timeout, session.close()).await {
            Ok(Ok(())) => debug!("Browser session closed"),
            Ok(Err(e)) => warn!("Browser session close failed: {e}"),
            Err(_) => warn!("Browser session close timed out"),
        }

        match result {
            Ok(()) => AgentOutcome::finish(trace, Ok(()), navigation),
            Err(reason) => fail(trace, reason, navigation),
        }
    }
}

fn fail(mut trace: StepTrace, reason: FailureReason, navigation: Option<NavigationInfo>) -> AgentOutcome {
    trace.push(AgentPhase::DoneFailure, json!({"error": reason.to_string()}));
    AgentOutcome::finish(trace, Err(reason), navigation)
}

fn is_http_url(url: &str) -> bool {
    url::Url::parse(url.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Best-effort network idle wait. Returns whether idle was observed.
async fn settle(session: &dyn PageSession, wait: Duration) -> bool {
    match session.wait_for_network_idle(wait).await {
        Ok(()) => true,
        Err(e) => {
            debug!("No network idle signal: {e}");
            false
        }
    }
}

async fn apply_action(session: &dyn PageSession, action: &ResolvedAction) -> Result<(), BrowserError> {
    let run = async {
        match action {
            ResolvedAction::Click { id, .. } => session.click_control(*id).await,
            ResolvedAction::ClickText { text } => session.click_text(text).await,
            ResolvedAction::ClickRole { role, name } => session.click_role(role, name).await,
            ResolvedAction::Fill { id, value, .. } => session.fill(*id, value).await,
            ResolvedAction::Select { id, value, .. } => session.select_option(*id, value).await,
            ResolvedAction::SetChecked { id, checked, .. } => session.set_checked(*id, *checked).await,
            ResolvedAction::Press { key } => session.press_key(key).await,
            ResolvedAction::Wait { duration } => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
        }
    };
    tokio::time::timeout(ACTION_TIMEOUT, run)
        .await
        .map_err(|_| BrowserError::Timeout(ACTION_TIMEOUT))?
}
