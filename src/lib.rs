//! # learnwords-core
//!
//! Resilient multi-provider AI task execution core: background task scheduling
//! with priorities, retries, and cooperative cancellation; failover across AI
//! text-generation providers behind per-provider circuit breakers; a two-tier
//! response cache with request coalescing; and in-process metrics for external
//! monitoring to poll.
//!
//! The crate is transport-agnostic. A web layer embeds it by building one
//! [`ExecutionCore`](core::ExecutionCore) at startup and calling its submission
//! and monitoring surface; nothing here does HTTP, persistence, or document
//! parsing.
//!
//! ## Module map
//!
//! - [`core`] — the `ExecutionCore` context object wiring everything together
//! - [`scheduler`] — task state machine, priority queues, worker pool, events
//! - [`orchestration`] — provider failover with bounded retry and caching
//! - [`provider`] — the `AiProvider` adapter trait and the ordered registry
//! - [`resilience`] — circuit breakers and exponential backoff
//! - [`cache`] — two-tier cache (local LRU + distributed backend trait)
//! - [`metrics`] — per-provider and per-task-kind counters and percentiles
//! - [`config`] — validated configuration with environment overrides
//! - [`error`] — the central [`CoreError`](error::CoreError) type
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use learnwords_core::config::{CoreConfig, ProviderConfig};
//! use learnwords_core::core::{ExecutionCore, AI_GENERATION_KIND};
//! use learnwords_core::scheduler::TaskPriority;
//! # use learnwords_core::provider::AiProvider;
//! # fn adapter() -> Arc<dyn AiProvider> { unimplemented!() }
//!
//! # async fn run() -> learnwords_core::error::Result<()> {
//! let descriptor = ProviderConfig {
//!     name: "gemini".into(),
//!     priority_weight: 2.0,
//!     timeout_ms: 30_000,
//!     model: "gemini-pro".into(),
//!     max_tokens: 4096,
//!     temperature: 0.7,
//!     cost_per_1k_tokens: 0.5,
//! };
//! let core = ExecutionCore::builder(CoreConfig::from_env()?)
//!     .provider(descriptor, adapter())
//!     .build()?;
//! core.start();
//!
//! let task_id = core.submit_task(
//!     AI_GENERATION_KIND,
//!     serde_json::json!({"prompt": "fractions for 4th grade"}),
//!     TaskPriority::High,
//!     2,
//!     None,
//! )?;
//! let status = core.task_status(task_id)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestration;
pub mod provider;
pub mod resilience;
pub mod scheduler;

pub use crate::core::{ExecutionCore, ExecutionCoreBuilder, CoreMetrics, AI_GENERATION_KIND};
pub use crate::error::{CoreError, ErrorCategory, Result};
pub use crate::orchestration::{AiOrchestrator, GenerationRequest, ProviderHealth};
pub use crate::provider::{AiProvider, AiResponse, GenerationParams, ProviderError};
pub use crate::scheduler::{TaskId, TaskPriority, TaskSnapshot, TaskState};
