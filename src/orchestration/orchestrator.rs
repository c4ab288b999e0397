//! Provider selection, bounded retry, and failover for generation requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::config::RetryConfig;
use crate::error::{CoreError, Result};
use crate::metrics::{MetricsAggregator, SeriesSnapshot};
use crate::orchestration::GenerationRequest;
use crate::provider::{AiResponse, ProviderEntry, ProviderError, ProviderRegistry};
use crate::resilience::{BackoffPolicy, CircuitBreakerRegistry, CircuitState};

/// Per-provider entry in the health check snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub circuit_state: CircuitState,
    /// Success rate over the breaker's bounded recent-outcome window
    pub recent_success_rate: f64,
    pub p95_latency_ms: Option<u64>,
    pub total_calls: u64,
}

/// Dispatches generation work to the first healthy provider, with caching in
/// front and circuit breaking plus backoff around every call.
pub struct AiOrchestrator {
    registry: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<CacheLayer>,
    metrics: Arc<MetricsAggregator>,
    max_attempts: u32,
    backoff: BackoffPolicy,
    response_ttl: Duration,
}

impl AiOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<CacheLayer>,
        metrics: Arc<MetricsAggregator>,
        retry: &RetryConfig,
        response_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            breakers,
            cache,
            metrics,
            max_attempts: retry.max_attempts,
            backoff: BackoffPolicy::new(&retry.backoff),
            response_ttl,
        }
    }

    /// Resolve a generation request to a response.
    ///
    /// Consults the cache first (coalesced per key, so concurrent identical
    /// requests trigger one provider call), then walks the candidate list in
    /// priority order: preferred provider first if supplied, skipping providers
    /// whose circuit rejects the call, retrying transient failures with
    /// exponential backoff before failing over.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        preferred_provider: Option<&str>,
    ) -> Result<AiResponse> {
        let key = request.cache_key();
        let value = self
            .cache
            .get_or_compute(&key, self.response_ttl, || {
                self.generate_uncached(request, preferred_provider)
            })
            .await?;
        let response: AiResponse = serde_json::from_value(value)?;
        Ok(response)
    }

    async fn generate_uncached(
        &self,
        request: &GenerationRequest,
        preferred_provider: Option<&str>,
    ) -> Result<serde_json::Value> {
        let candidates = self.registry.candidates(preferred_provider);
        let mut attempted: Vec<String> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        for entry in candidates {
            let name = entry.descriptor.name.clone();
            let breaker = self.breakers.breaker(&name);

            if !breaker.allow_request() {
                debug!(provider = %name, "Circuit rejects request, skipping provider");
                continue;
            }

            attempted.push(name.clone());
            match self.call_with_retry(&entry, request).await {
                Ok(response) => {
                    breaker.record_success();
                    info!(
                        provider = %name,
                        latency_ms = response.latency_ms,
                        tokens_used = response.tokens_used,
                        "🟢 Generation succeeded"
                    );
                    return Ok(serde_json::to_value(response)?);
                }
                Err(e) => {
                    breaker.record_failure();
                    warn!(provider = %name, error = %e, "🔴 Provider exhausted, failing over");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(CoreError::ProvidersExhausted {
                attempted,
                last_error: Box::new(e),
            }),
            None => {
                warn!("No eligible provider: registry empty or all circuits open");
                Err(CoreError::NoEligibleProvider)
            }
        }
    }

    /// Try one provider up to the configured attempt limit.
    ///
    /// Only retryable errors and timeouts burn attempts; a non-retryable error
    /// returns immediately so the caller can fail over. Every attempt, success
    /// or failure, is recorded in metrics; the circuit breaker is updated once
    /// by the caller from the terminal outcome.
    async fn call_with_retry(
        &self,
        entry: &ProviderEntry,
        request: &GenerationRequest,
    ) -> std::result::Result<AiResponse, ProviderError> {
        let name = &entry.descriptor.name;
        let timeout = entry.descriptor.timeout();
        let mut last_error = ProviderError::Transport {
            provider: name.clone(),
            message: "no attempt made".to_string(),
        };

        for attempt in 0..self.max_attempts {
            let start = Instant::now();
            let outcome =
                match tokio::time::timeout(timeout, entry.adapter.call(&request.prompt, &request.params))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        provider: name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
            let latency = start.elapsed();

            match outcome {
                Ok(mut response) => {
                    response.latency_ms = latency.as_millis() as u64;
                    self.metrics.record_provider_attempt(name, true, latency);
                    return Ok(response);
                }
                Err(e) => {
                    self.metrics.record_provider_attempt(name, false, latency);
                    if !e.is_retryable() {
                        debug!(provider = %name, error = %e, "Non-retryable error, not burning retries");
                        return Err(e);
                    }
                    warn!(
                        provider = %name,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Provider attempt failed"
                    );
                    last_error = e;
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Read-only per-provider health snapshot; does not mutate circuit state.
    pub fn health_check(&self) -> HashMap<String, ProviderHealth> {
        self.registry
            .names()
            .into_iter()
            .map(|name| {
                let circuit = self.breakers.breaker(&name).snapshot();
                let series: Option<SeriesSnapshot> = self.metrics.provider_series(&name);
                let health = ProviderHealth {
                    circuit_state: circuit.state,
                    recent_success_rate: circuit.recent_success_rate,
                    p95_latency_ms: series.as_ref().and_then(|s| s.p95_latency_ms),
                    total_calls: circuit.total_calls,
                };
                (name, health)
            })
            .collect()
    }
}
