//! # Circuit Breaker Implementation
//!
//! Per-provider failure isolation with three states: Closed (normal operation),
//! Open (failing fast), and HalfOpen (testing recovery). Recovery never skips
//! HalfOpen, and exactly one probing call is admitted while the probe is
//! outstanding so a recovering backend is not hit by a thundering herd.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls are allowed through
    Closed,
    /// Failure mode - calls are rejected without reaching the provider
    Open,
    /// Testing recovery - a single probing call is in flight
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Read-only view of one breaker, exposed through the health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Success rate over the bounded recent-outcome window
    pub recent_success_rate: f64,
    /// Milliseconds since the circuit opened, if it is currently open
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    /// Recent outcomes, newest last, bounded by config.history_size
    history: VecDeque<bool>,
}

/// Per-provider circuit breaker with internal synchronization.
///
/// State transitions are monotone within a cycle:
/// Closed → Open → HalfOpen → {Closed | Open}.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            provider = %name,
            failure_threshold = config.failure_threshold,
            open_timeout_secs = config.open_timeout_secs,
            "🛡️ Circuit breaker initialized"
        );
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                total_calls: 0,
                success_count: 0,
                failure_count: 0,
                history: VecDeque::new(),
            }),
        }
    }

    /// Decide whether a call may be dispatched to this provider right now.
    ///
    /// An Open circuit whose timeout has elapsed transitions to HalfOpen and
    /// admits exactly one probing call; concurrent callers are denied until the
    /// probe resolves through [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed >= self.config.open_timeout() => {
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        info!(
                            provider = %self.name,
                            open_for_ms = elapsed.as_millis() as u64,
                            "🟡 Circuit breaker half-open (dispatching probe)"
                        );
                        true
                    }
                    Some(_) => false,
                    None => {
                        // Open without a timestamp should not happen; fail safe
                        warn!(provider = %self.name, "Circuit open but no timestamp recorded");
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful provider outcome.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.success_count += 1;
        inner.consecutive_failures = 0;
        Self::push_history(&mut inner, self.config.history_size, true);

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.probe_in_flight = false;
            inner.opened_at = None;
            info!(
                provider = %self.name,
                total_calls = inner.total_calls,
                "🟢 Circuit breaker closed (recovered)"
            );
        } else {
            debug!(provider = %self.name, "🟢 Provider call succeeded");
        }
    }

    /// Record a failed provider outcome (error response, timeout, or transport failure).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.failure_count += 1;
        inner.consecutive_failures += 1;
        Self::push_history(&mut inner, self.config.history_size, false);

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        provider = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        failure_threshold = self.config.failure_threshold,
                        "🔴 Circuit breaker opened (failing fast)"
                    );
                } else {
                    debug!(
                        provider = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        "🔴 Provider call failed"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: back to Open for another timeout cycle
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                inner.opened_at = Some(Instant::now());
                warn!(provider = %self.name, "🔴 Half-open probe failed, circuit reopened");
            }
            CircuitState::Open => {
                debug!(provider = %self.name, "Failure recorded while circuit already open");
            }
        }
    }

    /// Current state without transition side effects (used by the health check).
    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Read-only snapshot; does not mutate circuit state.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        let recent_success_rate = if inner.history.is_empty() {
            1.0
        } else {
            inner.history.iter().filter(|ok| **ok).count() as f64 / inner.history.len() as f64
        };
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            recent_success_rate,
            open_for_ms: match inner.state {
                CircuitState::Closed => None,
                _ => inner.opened_at.map(|t| t.elapsed().as_millis() as u64),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn push_history(inner: &mut BreakerInner, cap: usize, ok: bool) {
        inner.history.push_back(ok);
        while inner.history.len() > cap {
            inner.history.pop_front();
        }
    }
}

/// Lazily-created circuit breakers keyed by provider name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker for a provider.
    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(provider.to_string(), self.config.clone()))
            })
            .clone()
    }

    /// Read-only snapshots of every known breaker.
    pub fn snapshot_all(&self) -> std::collections::HashMap<String, CircuitSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
