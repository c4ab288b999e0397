//! # Provider Module
//!
//! The uniform adapter seam over external AI text-generation backends plus the
//! ordered registry the orchestrator routes through. Providers are modeled as a
//! fixed set of adapters behind one capability trait, registered explicitly at
//! startup; there is no runtime type inspection.

pub mod adapter;
pub mod registry;

pub use adapter::{AiProvider, AiResponse, GenerationParams, ProviderError};
pub use registry::{ProviderEntry, ProviderRegistry};
