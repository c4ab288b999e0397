//! Generation request and its deterministic cache fingerprint.
//!
//! The fingerprint is a pure function of the request content and generation
//! parameters. It is provider-agnostic: a preferred-provider routing hint never
//! changes the key, so the same logical request served by different backends
//! shares one cache entry.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::provider::GenerationParams;

/// Key namespace for cached generation responses.
const CACHE_NAMESPACE: &str = "ai_responses";

/// A logical text-generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Deterministic cache key: namespace plus the SHA-256 of the canonical
    /// serialized request.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prompt.as_bytes());
        hasher.update(b"\x00");
        hasher.update(self.params.model.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\x00");
        hasher.update(self.params.max_tokens.unwrap_or(0).to_be_bytes());
        hasher.update(b"\x00");
        hasher.update(self.params.temperature.unwrap_or(0.0).to_be_bytes());
        format!("{CACHE_NAMESPACE}:{}", hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_request_same_key() {
        let a = GenerationRequest::new("plan a lesson on fractions");
        let b = GenerationRequest::new("plan a lesson on fractions");
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with("ai_responses:"));
    }

    #[test]
    fn prompt_changes_key() {
        let a = GenerationRequest::new("fractions");
        let b = GenerationRequest::new("decimals");
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn params_change_key() {
        let base = GenerationRequest::new("fractions");
        let warmer = GenerationRequest::new("fractions").with_params(GenerationParams {
            temperature: Some(0.9),
            ..Default::default()
        });
        let bigger = GenerationRequest::new("fractions").with_params(GenerationParams {
            max_tokens: Some(8192),
            ..Default::default()
        });
        assert_ne!(base.cache_key(), warmer.cache_key());
        assert_ne!(base.cache_key(), bigger.cache_key());
        assert_ne!(warmer.cache_key(), bigger.cache_key());
    }
}
