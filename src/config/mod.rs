//! # Core Configuration System
//!
//! Explicit, validated configuration for every component of the execution core.
//! Defaults carry the documented constants (circuit-breaker threshold and open
//! timeout, backoff base/cap, cache TTLs, worker count); `from_env` applies
//! `LEARNWORDS_*` overrides for deployment tuning. There are no module-level
//! singletons: a `CoreConfig` is built once at startup and handed to
//! [`ExecutionCore`](crate::core::ExecutionCore).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level configuration for the execution core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreConfig {
    /// Provider descriptors, registered in declaration order
    pub providers: Vec<ProviderConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Provider-level retry policy applied inside the orchestrator
    pub provider_retry: RetryConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
}

/// Static configuration for one AI provider backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Candidates are tried in descending weight order
    pub priority_weight: f64,
    pub timeout_ms: u64,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Cost hint for monitoring; not used for routing decisions
    pub cost_per_1k_tokens: f64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-provider circuit breaker tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens (fixed-count window)
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing the half-open probe
    pub open_timeout_secs: u64,
    /// Bounded recent-outcome window used for success-rate reporting
    pub history_size: usize,
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 60,
            history_size: 100,
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts against a single candidate before failing over
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff policy parameters.
///
/// Delay for attempt `n` (0-based) is `min(base * multiplier^n, max)` plus, when
/// jitter is enabled, a uniform random component in `[0, base)`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

/// Two-tier cache tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Bounded size of the in-process tier (LRU eviction)
    pub local_max_entries: usize,
    /// TTL applied when callers do not specify one, and on local promotion
    pub default_ttl_secs: u64,
    /// TTL for cached AI generation responses
    pub ai_response_ttl_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn ai_response_ttl(&self) -> Duration {
        Duration::from_secs(self.ai_response_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_max_entries: 1000,
            default_ttl_secs: 300,
            ai_response_ttl_secs: 3600,
        }
    }
}

/// Worker pool and task retry tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Fixed number of concurrent workers pulling from the priority queues
    pub worker_count: usize,
    /// Task-level retry backoff, independent of the provider-level policy
    pub task_backoff: BackoffConfig,
    /// Capacity of the task event broadcast channel
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            task_backoff: BackoffConfig::default(),
            event_capacity: 1000,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            provider_retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Build a configuration from defaults plus `LEARNWORDS_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(workers) = std::env::var("LEARNWORDS_WORKER_COUNT") {
            config.scheduler.worker_count = workers
                .parse()
                .map_err(|e| CoreError::Configuration(format!("Invalid worker_count: {e}")))?;
        }

        if let Ok(threshold) = std::env::var("LEARNWORDS_CB_FAILURE_THRESHOLD") {
            config.circuit_breaker.failure_threshold = threshold.parse().map_err(|e| {
                CoreError::Configuration(format!("Invalid cb failure_threshold: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("LEARNWORDS_CB_OPEN_TIMEOUT_SECS") {
            config.circuit_breaker.open_timeout_secs = timeout
                .parse()
                .map_err(|e| CoreError::Configuration(format!("Invalid cb open_timeout: {e}")))?;
        }

        if let Ok(attempts) = std::env::var("LEARNWORDS_PROVIDER_MAX_ATTEMPTS") {
            config.provider_retry.max_attempts = attempts.parse().map_err(|e| {
                CoreError::Configuration(format!("Invalid provider max_attempts: {e}"))
            })?;
        }

        if let Ok(ttl) = std::env::var("LEARNWORDS_AI_RESPONSE_TTL_SECS") {
            config.cache.ai_response_ttl_secs = ttl
                .parse()
                .map_err(|e| CoreError::Configuration(format!("Invalid ai_response_ttl: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the components cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.worker_count == 0 {
            return Err(CoreError::Configuration(
                "scheduler.worker_count must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(CoreError::Configuration(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.provider_retry.max_attempts == 0 {
            return Err(CoreError::Configuration(
                "provider_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.cache.local_max_entries == 0 {
            return Err(CoreError::Configuration(
                "cache.local_max_entries must be at least 1".to_string(),
            ));
        }
        for provider in &self.providers {
            if provider.timeout_ms == 0 {
                return Err(CoreError::Configuration(format!(
                    "provider '{}' must have a non-zero timeout",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}
