//! LLM integration for unsub-assist.
//!
//! The planning/verification service is reached through the `LlmProvider`
//! trait. OpenAI is reached via rig-core, with `RigAdapter` bridging rig's
//! `CompletionModel` to `LlmProvider`. Tests substitute scripted providers.

pub mod json;
pub mod provider;
mod rig_adapter;

pub use json::{extract_json_object, parse_json_response};
pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Default model for planning and verification.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Build config from environment variables.
    /// Returns `None` if `OPENAI_API_KEY` is not set (planning disabled).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;

        let model = std::env::var("UNSUB_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Some(Self {
            api_key: SecretString::from(api_key),
            model,
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_reports_model() {
        // rig clients accept any key at construction; auth fails on first request.
        let config = LlmConfig {
            api_key: SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
    }
}
