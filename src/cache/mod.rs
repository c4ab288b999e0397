//! # Two-Tier Cache Layer
//!
//! In-process LRU tier in front of a distributed key/value backend, with TTL,
//! explicit invalidation, and per-key request coalescing. The distributed tier
//! may be unavailable at any time; that is degraded mode (treated as a miss,
//! logged), never a hard failure.

pub mod backend;
pub mod layer;
pub mod local;

pub use backend::{BackendError, CacheBackend, InMemoryBackend};
pub use layer::{CacheLayer, CacheStatsSnapshot};
pub use local::LocalTier;
