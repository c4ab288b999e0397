//! Provider adapter contract.
//!
//! An adapter wraps one external AI backend (Gemini, OpenAI, Anthropic, ...)
//! behind a single `call` capability. Adapters report failures through
//! [`ProviderError`], whose `retryable` classification drives the orchestrator's
//! retry and failover decisions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Caller-supplied generation parameters.
///
/// Unset fields fall back to the adapter's configured defaults. These
/// parameters participate in the cache fingerprint, so two requests differing
/// only in `temperature` are distinct cache entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Result of a successful provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    /// Filled in by the orchestrator from the observed call latency
    #[serde(default)]
    pub latency_ms: u64,
}

/// Failure modes of one provider call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Error response from the provider API
    #[error("{provider} API error: {message}")]
    Api {
        provider: String,
        message: String,
        retryable: bool,
    },

    /// The call exceeded the provider's configured timeout
    #[error("{provider} call timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// Network-level failure before a response was received
    #[error("{provider} transport failure: {message}")]
    Transport { provider: String, message: String },

    /// The request itself is malformed; retrying the same provider is pointless
    #[error("{provider} rejected request: {message}")]
    InvalidRequest { provider: String, message: String },

    /// The provider returned a well-formed but empty response
    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: String },
}

impl ProviderError {
    /// Whether the orchestrator may retry this error against the same provider.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Api { retryable, .. } => *retryable,
            ProviderError::Timeout { .. }
            | ProviderError::Transport { .. }
            | ProviderError::EmptyResponse { .. } => true,
            ProviderError::InvalidRequest { .. } => false,
        }
    }

    /// Name of the provider that produced this error.
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Api { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::InvalidRequest { provider, .. }
            | ProviderError::EmptyResponse { provider } => provider,
        }
    }
}

/// Uniform capability interface over one AI text-generation backend.
///
/// Implementations must be safe to share across workers; the registry holds
/// them behind `Arc`. The per-call timeout is enforced by the orchestrator from
/// the provider descriptor, but adapters whose SDKs surface their own timeouts
/// should map them to [`ProviderError::Timeout`].
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable provider name; must match the registered descriptor.
    fn name(&self) -> &str;

    /// Generate text for the prompt.
    async fn call(&self, prompt: &str, params: &GenerationParams)
        -> Result<AiResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        let transient = ProviderError::Api {
            provider: "gemini".into(),
            message: "rate limited".into(),
            retryable: true,
        };
        let permanent = ProviderError::InvalidRequest {
            provider: "gemini".into(),
            message: "unknown model".into(),
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(ProviderError::Timeout {
            provider: "x".into(),
            timeout_ms: 100
        }
        .is_retryable());
        assert!(ProviderError::EmptyResponse {
            provider: "x".into()
        }
        .is_retryable());
    }
}
