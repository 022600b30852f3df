//! Error types for the agrag domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; pipeline failures always
//! carry the [`Stage`] that produced them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all agrag operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Pipeline errors ---
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::RateLimited { .. }
            | Self::StreamInterrupted(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Search index not configured: {0}")]
    NotConfigured(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("Search request to {index} failed: {reason}")]
    RequestFailed { index: String, reason: String },

    #[error("Search request to {index} returned status {status_code}: {message}")]
    Status {
        index: String,
        status_code: u16,
        message: String,
    },

    #[error("Malformed search response from {index}: {reason}")]
    MalformedResponse { index: String, reason: String },

    #[error("Search timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// A step of a turn, used to attribute failures and label stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Triage,
    QueryGeneration,
    Retrieval,
    Synthesis,
    Routing,
    Generation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::QueryGeneration => "query_generation",
            Self::Retrieval => "retrieval",
            Self::Synthesis => "synthesis",
            Self::Routing => "routing",
            Self::Generation => "generation",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that terminates a turn.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// An external call made by `stage` errored.
    #[error("{stage} failed: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    /// The stage got output it could not use.
    #[error("{stage} produced unusable output: {reason}")]
    Malformed { stage: Stage, reason: String },

    /// An external call made by `stage` exceeded its timeout.
    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: Stage, timeout_ms: u64 },

    #[error("Invalid turn transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}

impl PipelineError {
    pub fn provider(stage: Stage, source: ProviderError) -> Self {
        Self::Provider { stage, source }
    }

    pub fn malformed(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Malformed {
            stage,
            reason: reason.into(),
        }
    }

    pub fn timeout(stage: Stage, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            stage,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// The stage this failure is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Provider { stage, .. }
            | Self::Malformed { stage, .. }
            | Self::Timeout { stage, .. } => Some(*stage),
            Self::InvalidTransition { .. } => None,
            Self::UnknownAgent(_) => Some(Stage::Routing),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source, .. } => source.is_retryable(),
            // Model output varies between calls.
            Self::Malformed { .. } | Self::Timeout { .. } => true,
            Self::InvalidTransition { .. } | Self::UnknownAgent(_) => false,
        }
    }

    /// The text shown to the end user when a turn could not complete.
    pub fn user_message(&self) -> String {
        let retry = if self.is_retryable() {
            " Por favor, intenta de nuevo."
        } else {
            ""
        };
        match self.stage() {
            Some(stage) => format!(
                "No pude completar tu solicitud (fallo en la etapa '{stage}').{retry}"
            ),
            None => format!("No pude completar tu solicitud.{retry}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn pipeline_error_keeps_stage() {
        let err = PipelineError::provider(
            Stage::Synthesis,
            ProviderError::Network("connection reset".into()),
        );
        assert_eq!(err.stage(), Some(Stage::Synthesis));
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("synthesis failed"));
    }

    #[test]
    fn timeout_is_attributed_and_retryable() {
        let err = PipelineError::timeout(Stage::Triage, std::time::Duration::from_millis(1500));
        assert_eq!(err.stage(), Some(Stage::Triage));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn auth_failures_are_not_retryable() {
        let err = PipelineError::provider(
            Stage::Triage,
            ProviderError::AuthenticationFailed("bad key".into()),
        );
        assert!(!err.is_retryable());
        assert!(!err.user_message().contains("intenta de nuevo"));
    }

    #[test]
    fn user_message_names_stage() {
        let err = PipelineError::malformed(Stage::Triage, "no label");
        let msg = err.user_message();
        assert!(msg.contains("No pude completar"));
        assert!(msg.contains("triage"));
    }

    #[test]
    fn server_errors_are_retryable() {
        let e500 = ProviderError::ApiError {
            status_code: 503,
            message: "unavailable".into(),
        };
        let e400 = ProviderError::ApiError {
            status_code: 400,
            message: "bad request".into(),
        };
        assert!(e500.is_retryable());
        assert!(!e400.is_retryable());
    }
}
