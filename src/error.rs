//! Error types for unsub-assist.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Planning/verification service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Headless browser errors.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to navigate to {url}: {details}")]
    NavigateFailed { url: String, details: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Browser operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Driver internal error: {0}")]
    Internal(String),
}

/// Errors raised while resolving a single message.
#[derive(Debug, thiserror::Error)]
pub enum UnsubscribeError {
    #[error("message_not_found")]
    MessageNotFound { id: String },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] DatabaseError),
}
