//! Shared test fixtures: a scripted provider adapter and descriptor builders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use learnwords_core::config::{BackoffConfig, ProviderConfig, RetryConfig};
use learnwords_core::provider::{AiProvider, AiResponse, GenerationParams, ProviderError};

/// One scripted provider call outcome.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedCall {
    Succeed(&'static str),
    FailRetryable,
    FailPermanent,
    /// Never resolves within any test timeout
    Hang,
}

/// Provider adapter that plays back a fixed script, then repeats `otherwise`.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<ScriptedCall>>,
    otherwise: ScriptedCall,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(
        name: &str,
        script: impl IntoIterator<Item = ScriptedCall>,
        otherwise: ScriptedCall,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into_iter().collect()),
            otherwise,
            calls: AtomicUsize::new(0),
        })
    }

    /// Provider that always plays the same outcome.
    pub fn always(name: &str, outcome: ScriptedCall) -> Arc<Self> {
        Self::new(name, [], outcome)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        _prompt: &str,
        params: &GenerationParams,
    ) -> Result<AiResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().pop_front().unwrap_or(self.otherwise);
        match outcome {
            ScriptedCall::Succeed(content) => Ok(AiResponse {
                content: content.to_string(),
                provider: self.name.clone(),
                model: params.model.clone().unwrap_or_else(|| "scripted".into()),
                tokens_used: content.len() as u64,
                latency_ms: 0,
            }),
            ScriptedCall::FailRetryable => Err(ProviderError::Transport {
                provider: self.name.clone(),
                message: "connection reset".into(),
            }),
            ScriptedCall::FailPermanent => Err(ProviderError::InvalidRequest {
                provider: self.name.clone(),
                message: "prompt rejected".into(),
            }),
            ScriptedCall::Hang => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Err(ProviderError::EmptyResponse {
                    provider: self.name.clone(),
                })
            }
        }
    }
}

/// Descriptor with a short per-call timeout suitable for tests.
pub fn descriptor(name: &str, weight: f64, timeout_ms: u64) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        priority_weight: weight,
        timeout_ms,
        model: format!("{name}-test"),
        max_tokens: 1024,
        temperature: 0.7,
        cost_per_1k_tokens: 0.1,
    }
}

/// Retry policy with near-zero backoff so tests run fast.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        backoff: BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_enabled: false,
        },
    }
}
