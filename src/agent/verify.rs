//! Outcome verification: did the page confirm the unsubscribe?
//!
//! The verifier model is asked first. When it is unavailable or its answer
//! does not parse, a keyword heuristic over the page text decides instead.
//! A parsed "not yet" from the model is final for that check.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::browser::PageSession;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, parse_json_response};
use crate::unsubscribe::links::strip_html;

/// Marker line identifying verification prompts.
pub const VERIFY_PROMPT_MARKER: &str = "You verify unsubscribe outcomes.";

/// Phrases that confirm an unsubscribe on their own.
const CONFIRMATION_PHRASES: &[&str] = &[
    "you have been unsubscribed",
    "you've been unsubscribed",
    "you have successfully unsubscribed",
    "successfully unsubscribed",
    "unsubscribed successfully",
    "you are now unsubscribed",
    "you have been removed",
    "removed from our mailing list",
    "removed from this list",
    "preferences have been updated",
    "your preferences have been saved",
    "subscription has been cancelled",
    "you will no longer receive",
    "unsubscribe successful",
];

/// Model answer schema.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub unsubscribed: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Which path produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Ai,
    Heuristic,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Heuristic => "heuristic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub confirmed: bool,
    pub source: VerdictSource,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn to_detail(&self) -> serde_json::Value {
        serde_json::json!({
            "confirmed": self.confirmed,
            "source": self.source.as_str(),
            "confidence": self.confidence,
            "reason": self.reason,
        })
    }
}

/// Case-insensitive check for any confirmation phrase.
pub fn heuristic_confirms(page_text: &str) -> Option<&'static str> {
    let folded = page_text.to_lowercase().replace('\u{2019}', "'");
    CONFIRMATION_PHRASES
        .iter()
        .copied()
        .find(|phrase| folded.contains(phrase))
}

/// Verifier over an optional model.
pub struct Verifier<'a> {
    llm: Option<&'a dyn LlmProvider>,
    threshold: f64,
    text_limit: usize,
}

impl<'a> Verifier<'a> {
    pub fn new(llm: Option<&'a dyn LlmProvider>, threshold: f64, text_limit: usize) -> Self {
        Self {
            llm,
            threshold,
            text_limit,
        }
    }

    /// Decide whether `page_text` confirms the unsubscribe.
    pub async fn verify(&self, url: &str, page_text: &str) -> Verdict {
        if let Some(llm) = self.llm {
            match self.ask(llm, url, page_text).await {
                Ok(answer) => {
                    return Verdict {
                        confirmed: answer.unsubscribed && answer.confidence >= self.threshold,
                        source: VerdictSource::Ai,
                        confidence: Some(answer.confidence),
                        reason: answer.reason,
                    };
                }
                Err(e) => warn!("Verifier declined, using heuristic: {e}"),
            }
        }

        let hit = heuristic_confirms(page_text);
        Verdict {
            confirmed: hit.is_some(),
            source: VerdictSource::Heuristic,
            confidence: None,
            reason: hit.map(|p| format!("matched \"{p}\"")),
        }
    }

    async fn ask(&self, llm: &dyn LlmProvider, url: &str, page_text: &str) -> Result<VerifyResponse, String> {
        let system = format!(
            "{VERIFY_PROMPT_MARKER}\n\
             Given the text of a web page reached while unsubscribing from a mailing list, \
             decide whether the page confirms the recipient is now unsubscribed.\n\
             Respond with JSON only: {{\"unsubscribed\": boolean, \"confidence\": number between 0 and 1, \"reason\": string}}.\n\
             A page that merely offers an unsubscribe button is NOT confirmed."
        );
        let user = format!(
            "URL: {url}\n\nPAGE TEXT:\n{}",
            truncate_chars(page_text, self.text_limit)
        );

        let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .with_temperature(0.0)
            .with_max_tokens(200)
            .with_json_mode();

        let response = llm.complete(request).await.map_err(|e| e.to_string())?;
        debug!(output_tokens = response.output_tokens, "Verifier answered");
        parse_json_response::<VerifyResponse>(&response.content)
    }
}

/// Capture the page's text: rendered text, then raw text, then stripped HTML.
///
/// Each source is tried independently; a failure yields an empty string.
pub async fn capture_page_text(session: &dyn PageSession) -> String {
    match session.inner_text().await {
        Ok(text) if !text.trim().is_empty() => return text,
        Ok(_) => {}
        Err(e) => debug!("innerText unavailable: {e}"),
    }
    match session.text_content().await {
        Ok(text) if !text.trim().is_empty() => return text,
        Ok(_) => {}
        Err(e) => debug!("textContent unavailable: {e}"),
    }
    match session.html().await {
        Ok(html) => strip_html(&html),
        Err(e) => {
            debug!("HTML unavailable: {e}");
            String::new()
        }
    }
}

/// First `limit` chars of `text`, on a char boundary.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
