//! Plan requests to the planning model.

use std::time::Duration;

use tracing::{debug, warn};

use crate::agent::actions::{MAX_PLAN_ACTIONS, PlanResponse, ResolvedAction, validate_plan};
use crate::agent::verify::truncate_chars;
use crate::browser::ControlInventory;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, parse_json_response};

/// Marker line identifying planning prompts.
pub const PLAN_PROMPT_MARKER: &str = "You plan browser actions to unsubscribe from a mailing list.";

/// Inputs for one planning request.
pub struct PlanInput<'a> {
    pub url: &'a str,
    pub page_text: &'a str,
    pub user_email: Option<&'a str>,
    pub inventory: &'a ControlInventory,
    pub round: u32,
}

/// Result of a planning request.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Ready(Vec<ResolvedAction>),
    /// The model failed, answered garbage, or proposed an invalid plan.
    Unavailable(String),
}

pub struct Planner<'a> {
    llm: &'a dyn LlmProvider,
    text_limit: usize,
    max_wait: Duration,
}

impl<'a> Planner<'a> {
    pub fn new(llm: &'a dyn LlmProvider, text_limit: usize, max_wait: Duration) -> Self {
        Self {
            llm,
            text_limit,
            max_wait,
        }
    }

    pub async fn plan(&self, input: PlanInput<'_>) -> PlanOutcome {
        let request = build_request(&input, self.text_limit);

        let response = match self.llm.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(round = input.round, "Planner request failed: {e}");
                return PlanOutcome::Unavailable(e.to_string());
            }
        };
        debug!(
            round = input.round,
            output_tokens = response.output_tokens,
            "Planner answered"
        );

        let parsed = match parse_json_response::<PlanResponse>(&response.content) {
            Ok(p) => p,
            Err(e) => {
                warn!(round = input.round, "Planner answer unusable: {e}");
                return PlanOutcome::Unavailable(e);
            }
        };

        match validate_plan(parsed, input.inventory, self.max_wait) {
            Ok(actions) => PlanOutcome::Ready(actions),
            Err(e) => {
                warn!(round = input.round, "Plan rejected: {e}");
                PlanOutcome::Unavailable(e)
            }
        }
    }
}

fn build_request(input: &PlanInput<'_>, text_limit: usize) -> CompletionRequest {
    let system = format!(
        "{PLAN_PROMPT_MARKER}\n\
         You see the visible text of the current page and an inventory of its interactive controls.\n\
         Emit between 1 and {MAX_PLAN_ACTIONS} actions that complete the unsubscribe. \
         Prefer choosing \"unsubscribe from all\" over managing individual preferences. \
         Never create accounts, log in, or solve CAPTCHAs.\n\
         Respond with JSON only, shaped as {{\"actions\": [...]}}. Allowed actions:\n\
         - {{\"type\":\"click\",\"id\":\"<control id>\"}}\n\
         - {{\"type\":\"click_text\",\"text\":\"<visible text>\"}}\n\
         - {{\"type\":\"click_role\",\"role\":\"<aria role>\",\"name\":\"<accessible name>\"}}\n\
         - {{\"type\":\"fill\",\"id\":\"<control id>\",\"value\":\"<text>\"}}\n\
         - {{\"type\":\"select\",\"id\":\"<control id>\",\"value\":\"<option>\"}}\n\
         - {{\"type\":\"check\",\"id\":\"<control id>\"}}\n\
         - {{\"type\":\"uncheck\",\"id\":\"<control id>\"}}\n\
         - {{\"type\":\"press\",\"key\":\"<key name, e.g. Enter>\"}}\n\
         - {{\"type\":\"wait\",\"ms\":<milliseconds up to 5000>}}\n\
         Control ids must be copied exactly from the inventory."
    );

    let controls: Vec<serde_json::Value> = input.inventory.iter().map(|c| c.to_prompt_json()).collect();
    let controls_json = serde_json::Value::Array(controls).to_string();

    let user = format!(
        "URL: {}\nROUND: {}\nUSER EMAIL: {}\n\nPAGE TEXT:\n{}\n\nCONTROLS:\n{}",
        input.url,
        input.round,
        input.user_email.unwrap_or("unknown"),
        truncate_chars(input.page_text, text_limit),
        controls_json,
    );

    CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .with_temperature(0.1)
        .with_max_tokens(600)
        .with_json_mode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{ControlKind, RawControl};
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingLlm {
        answer: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            Ok(CompletionResponse {
                content: self.answer.clone(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn inventory() -> ControlInventory {
        ControlInventory::from_raw(
            1,
            vec![RawControl {
                kind: Some(ControlKind::Button),
                index: 0,
                ordinal: 0,
                text: Some("Unsubscribe".into()),
                ..Default::default()
            }],
        )
    }

    fn llm(answer: &str) -> RecordingLlm {
        RecordingLlm {
            answer: answer.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn prompt_carries_url_email_text_and_controls() {
        let llm = llm(r#"{"actions":[{"type":"click","id":"button:0"}]}"#);
        let inventory = inventory();
        let long_text = "x".repeat(7000);
        let outcome = Planner::new(&llm, 6000, Duration::from_secs(5))
            .plan(PlanInput {
                url: "https://list.example/u/1",
                page_text: &long_text,
                user_email: Some("me@example.com"),
                inventory: &inventory,
                round: 1,
            })
            .await;
        assert!(matches!(outcome, PlanOutcome::Ready(ref a) if a.len() == 1));

        let seen = llm.seen.lock().unwrap();
        let request = &seen[0];
        assert!(request.json_mode);
        assert!(request.system_prompt().unwrap().starts_with(PLAN_PROMPT_MARKER));
        let user = &request.messages[1].content;
        assert!(user.contains("https://list.example/u/1"));
        assert!(user.contains("me@example.com"));
        assert!(user.contains("\"id\":\"button:0\""));
        assert!(!user.contains(&"x".repeat(6001)));
    }

    #[tokio::test]
    async fn invalid_plans_are_unavailable() {
        let inventory = inventory();
        for answer in [
            "no idea",
            r#"{"actions":[]}"#,
            r#"{"actions":[{"type":"click","id":"link:4"}]}"#,
            r#"{"actions":[{"type":"teleport"}]}"#,
        ] {
            let llm = llm(answer);
            let outcome = Planner::new(&llm, 6000, Duration::from_secs(5))
                .plan(PlanInput {
                    url: "https://list.example",
                    page_text: "",
                    user_email: None,
                    inventory: &inventory,
                    round: 1,
                })
                .await;
            assert!(
                matches!(outcome, PlanOutcome::Unavailable(_)),
                "answer {answer} should be rejected"
            );
        }
    }
}
