//! # Resilience Module
//!
//! Failure isolation and recovery primitives shared by the orchestrator and the
//! task scheduler:
//!
//! - **Circuit breakers**: per-provider state machines that stop traffic to a
//!   failing backend and gate recovery behind a single half-open probe
//! - **Backoff**: exponential delay with jitter, applied at both provider-retry
//!   and task-retry granularity with independent budgets

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
