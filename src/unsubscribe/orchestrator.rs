//! Resolution orchestrator: one strategy chain per message.
//!
//! For each message: extract (or reuse) candidates, then try one-click,
//! then the interactive agent, then report mailto-only or nothing found.
//! Exactly one attempt record is appended per processed message, and a
//! failure on one message never stops the rest of the batch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::agent::interactive::UnsubscribeAgent;
use crate::config::OneClickPolicy;
use crate::error::UnsubscribeError;
use crate::store::{MessageStatus, StoredMessage, UnsubscribeStore};
use crate::unsubscribe::links::extract_links;
use crate::unsubscribe::one_click::{OneClickSender, is_one_click};
use crate::unsubscribe::types::{
    AttemptRecord, AttemptStatus, FailureCode, FailureReason, UnsubscribeLinks, UnsubscribeMethod,
    UnsubscribeOutcome,
};

/// Drives unsubscribe resolution for batches of messages.
pub struct Orchestrator {
    store: Arc<dyn UnsubscribeStore>,
    one_click: Arc<dyn OneClickSender>,
    agent: Arc<dyn UnsubscribeAgent>,
    policy: OneClickPolicy,
    batch_deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn UnsubscribeStore>,
        one_click: Arc<dyn OneClickSender>,
        agent: Arc<dyn UnsubscribeAgent>,
    ) -> Self {
        Self {
            store,
            one_click,
            agent,
            policy: OneClickPolicy::default(),
            batch_deadline: None,
        }
    }

    pub fn with_policy(mut self, policy: OneClickPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound a whole batch. Messages not started before the deadline are
    /// reported as `deadline_exceeded` without an attempt.
    pub fn with_batch_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.batch_deadline = deadline;
        self
    }

    /// Resolve every message in `message_ids`, in order, one at a time.
    ///
    /// Returns one outcome per input id.
    pub async fn resolve_batch(&self, user_id: &str, message_ids: &[String]) -> Vec<UnsubscribeOutcome> {
        let deadline = self.batch_deadline.map(|d| Instant::now() + d);
        let mut outcomes = Vec::with_capacity(message_ids.len());

        for id in message_ids {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(id = %id, "Batch deadline passed, skipping message");
                outcomes.push(UnsubscribeOutcome::failure(
                    id,
                    UnsubscribeMethod::None,
                    None,
                    &FailureCode::DeadlineExceeded.into(),
                ));
                continue;
            }

            let outcome = match AssertUnwindSafe(self.resolve_message(user_id, id))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic_payload) => {
                    let msg = panic_payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "resolution panicked".to_string());
                    error!(id = %id, "Resolution panicked: {msg}");
                    self.record_fault(id, &msg).await
                }
            };
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.ok).count();
        info!(
            user_id,
            total = outcomes.len(),
            succeeded,
            "Unsubscribe batch finished"
        );
        outcomes
    }

    /// Resolve a single message owned by `user_id`. Never fails; failures are data.
    pub async fn resolve_message(&self, user_id: &str, message_id: &str) -> UnsubscribeOutcome {
        match self.try_resolve(user_id, message_id).await {
            Ok(outcome) => outcome,
            Err(UnsubscribeError::MessageNotFound { id }) => {
                warn!(id = %id, user_id, "Message not found for user");
                UnsubscribeOutcome::failure(
                    message_id,
                    UnsubscribeMethod::None,
                    None,
                    &FailureCode::MessageNotFound.into(),
                )
            }
            Err(e) => {
                error!(id = %message_id, "Resolution failed: {e}");
                self.record_fault(message_id, &e.to_string()).await
            }
        }
    }

    async fn try_resolve(&self, user_id: &str, message_id: &str) -> Result<UnsubscribeOutcome, UnsubscribeError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .filter(|m| m.user_id == user_id)
            .ok_or_else(|| UnsubscribeError::MessageNotFound {
                id: message_id.to_string(),
            })?;

        let links = self.links_for(&message).await?;
        let candidate = links.first_http_candidate().map(str::to_string);

        // One-click first; a failure falls through to the agent.
        let mut one_click_failures = Vec::new();
        for url in self.one_click_targets(&links, candidate.as_deref()) {
            info!(id = %message_id, url = %url, "Trying one-click unsubscribe");
            let result = self.one_click.send(&url).await;
            if result.ok {
                self.record(
                    message_id,
                    UnsubscribeMethod::OneClickPost,
                    AttemptStatus::Succeeded,
                    json!({
                        "url": url,
                        "status": result.status,
                        "finalUrl": result.final_url,
                        "failed": one_click_failures,
                    }),
                )
                .await?;
                self.mark_unsubscribed(message_id).await;
                return Ok(UnsubscribeOutcome::success(
                    message_id,
                    UnsubscribeMethod::OneClickPost,
                    Some(url),
                ));
            }
            warn!(
                id = %message_id,
                url = %url,
                status = ?result.status,
                error = ?result.error,
                "One-click failed"
            );
            one_click_failures.push(json!({
                "url": url,
                "status": result.status,
                "error": result.error,
            }));
        }
        let one_click_failure = (!one_click_failures.is_empty()).then_some(one_click_failures);

        if let Some(url) = candidate {
            info!(id = %message_id, url = %url, "Running interactive agent");
            let outcome = self
                .agent
                .unsubscribe(&url, message.user_email.as_deref())
                .await;
            let status = if outcome.ok {
                AttemptStatus::Succeeded
            } else {
                AttemptStatus::Failed
            };
            self.record(
                message_id,
                UnsubscribeMethod::Agent,
                status,
                json!({
                    "url": url,
                    "navigation": outcome.navigation,
                    "steps": outcome.steps,
                    "error": outcome.error_string(),
                    "oneClick": one_click_failure,
                }),
            )
            .await?;

            if outcome.ok {
                self.mark_unsubscribed(message_id).await;
                return Ok(
                    UnsubscribeOutcome::success(message_id, UnsubscribeMethod::Agent, Some(url))
                        .with_steps(outcome.steps),
                );
            }
            let reason = outcome
                .error
                .clone()
                .unwrap_or(FailureCode::AgentDidNotConfirmUnsubscribe.into());
            return Ok(
                UnsubscribeOutcome::failure(message_id, UnsubscribeMethod::Agent, Some(url), &reason)
                    .with_steps(outcome.steps),
            );
        }

        if let Some(mailto) = links.first_mailto() {
            info!(id = %message_id, "Only a mailto unsubscribe is available");
            let reason: FailureReason = FailureCode::MailtoUnsubscribeNotSupported.into();
            self.record(
                message_id,
                UnsubscribeMethod::Mailto,
                AttemptStatus::Failed,
                json!({"mailto": mailto, "error": reason.to_string()}),
            )
            .await?;
            return Ok(UnsubscribeOutcome::failure(
                message_id,
                UnsubscribeMethod::Mailto,
                Some(mailto.to_string()),
                &reason,
            ));
        }

        info!(id = %message_id, "No unsubscribe link found");
        let reason: FailureReason = FailureCode::NoUnsubscribeLinkFound.into();
        self.record(
            message_id,
            UnsubscribeMethod::None,
            AttemptStatus::Failed,
            json!({"error": reason.to_string()}),
        )
        .await?;
        Ok(UnsubscribeOutcome::failure(
            message_id,
            UnsubscribeMethod::None,
            None,
            &reason,
        ))
    }

    /// Cached extraction when present and well-formed, else compute and cache.
    async fn links_for(&self, message: &StoredMessage) -> Result<UnsubscribeLinks, UnsubscribeError> {
        if let Some(links) = message.stored_links() {
            return Ok(links);
        }
        let links = extract_links(
            message.list_unsubscribe.as_deref(),
            message.list_unsubscribe_post.as_deref(),
            message.body_text.as_deref(),
            message.body_html.as_deref(),
        );
        self.store.save_links(&message.id, &links).await?;
        Ok(links)
    }

    /// URLs to POST a one-click request to, in order, as the policy allows.
    fn one_click_targets(&self, links: &UnsubscribeLinks, candidate: Option<&str>) -> Vec<String> {
        if !is_one_click(links.list_unsubscribe_post.as_deref()) {
            return Vec::new();
        }
        match self.policy {
            OneClickPolicy::FirstHttpLink => links
                .http_links
                .first()
                .filter(|url| candidate == Some(url.as_str()))
                .cloned()
                .into_iter()
                .collect(),
            OneClickPolicy::AnyHttpLink => links.http_links.clone(),
        }
    }

    async fn record(
        &self,
        message_id: &str,
        method: UnsubscribeMethod,
        status: AttemptStatus,
        detail: serde_json::Value,
    ) -> Result<(), UnsubscribeError> {
        let record = AttemptRecord::new(message_id, method, status, detail);
        self.store.record_attempt(&record).await?;
        info!(
            id = %message_id,
            method = %method,
            status = status.as_str(),
            "Unsubscribe attempt recorded"
        );
        Ok(())
    }

    /// Status update after a confirmed unsubscribe. The attempt is already
    /// recorded, so a failure here is logged, not reported.
    async fn mark_unsubscribed(&self, message_id: &str) {
        if let Err(e) = self
            .store
            .update_message_status(message_id, MessageStatus::Unsubscribed)
            .await
        {
            warn!(id = %message_id, "Failed to mark message unsubscribed: {e}");
        }
    }

    /// Record an unexpected fault as a failed attempt and report it.
    async fn record_fault(&self, message_id: &str, fault: &str) -> UnsubscribeOutcome {
        let record = AttemptRecord::new(
            message_id,
            UnsubscribeMethod::None,
            AttemptStatus::Failed,
            json!({"error": fault}),
        );
        if let Err(e) = self.store.record_attempt(&record).await {
            warn!(id = %message_id, "Failed to record fault attempt: {e}");
        }
        UnsubscribeOutcome::failure(
            message_id,
            UnsubscribeMethod::None,
            None,
            &FailureReason::Other(fault.to_string()),
        )
    }
}
