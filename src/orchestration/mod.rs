//! # AI Orchestration
//!
//! Resolves a text-generation request into a provider call: cache first, then
//! circuit-breaker-filtered candidate selection, bounded retry with backoff,
//! and failover down the priority order. Callers always receive an explicit
//! success or failure result; nothing escapes silently.

pub mod orchestrator;
pub mod request;

pub use orchestrator::{AiOrchestrator, ProviderHealth};
pub use request::GenerationRequest;
