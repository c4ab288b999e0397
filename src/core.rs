//! # Execution Core
//!
//! The explicit context object wiring the whole core together: configuration,
//! two-tier cache, circuit breakers, provider registry, orchestrator, metrics,
//! and the task scheduler. There are no globals; callers build one
//! [`ExecutionCore`] at startup and pass it where needed. The built-in
//! `ai_generation` task handler routes task payloads through the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use crate::cache::{CacheBackend, CacheLayer, CacheStatsSnapshot, InMemoryBackend};
use crate::config::{CoreConfig, ProviderConfig};
use crate::error::{CoreError, Result};
use crate::logging;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::orchestration::{AiOrchestrator, GenerationRequest, ProviderHealth};
use crate::provider::{AiProvider, GenerationParams, ProviderRegistry};
use crate::resilience::CircuitBreakerRegistry;
use crate::scheduler::{
    HandlerRegistry, ProgressHandle, QueueDepths, TaskEvent, TaskEventPublisher, TaskHandler,
    TaskId, TaskPriority, TaskScheduler, TaskSnapshot,
};

/// Kind string of the built-in AI generation task handler.
pub const AI_GENERATION_KIND: &str = "ai_generation";

/// Combined read-only view for external monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreMetrics {
    pub providers: HashMap<String, crate::metrics::SeriesSnapshot>,
    pub task_kinds: HashMap<String, crate::metrics::SeriesSnapshot>,
    pub cache: CacheStatsSnapshot,
    /// Queue depth per priority, most urgent first
    pub queue_depths: Vec<(TaskPriority, usize)>,
    pub task_count: usize,
}

/// Builder for [`ExecutionCore`]; providers and extra handlers are registered
/// here, before anything starts running.
pub struct ExecutionCoreBuilder {
    config: CoreConfig,
    backend: Option<Arc<dyn CacheBackend>>,
    providers: Vec<(ProviderConfig, Arc<dyn AiProvider>)>,
    handlers: Vec<Arc<dyn TaskHandler>>,
}

impl ExecutionCoreBuilder {
    /// Distributed cache tier. Defaults to the in-memory backend when unset.
    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Register an AI provider adapter with its descriptor.
    pub fn provider(mut self, descriptor: ProviderConfig, adapter: Arc<dyn AiProvider>) -> Self {
        self.providers.push((descriptor, adapter));
        self
    }

    /// Register an additional task handler beyond the built-in ones.
    pub fn handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<Arc<ExecutionCore>> {
        self.config.validate()?;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(InMemoryBackend::new()));
        let cache = Arc::new(CacheLayer::new(&self.config.cache, backend));
        let breakers = Arc::new(CircuitBreakerRegistry::new(self.config.circuit_breaker.clone()));
        let metrics = Arc::new(MetricsAggregator::new());

        let mut registry = ProviderRegistry::new();
        for (descriptor, adapter) in self.providers {
            registry.register(descriptor, adapter);
        }
        let registry = Arc::new(registry);

        let orchestrator = Arc::new(AiOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&cache),
            Arc::clone(&metrics),
            &self.config.provider_retry,
            self.config.cache.ai_response_ttl(),
        ));

        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(Arc::new(AiGenerationHandler {
            orchestrator: Arc::clone(&orchestrator),
        }));
        for handler in self.handlers {
            handlers.register(handler);
        }

        let events = TaskEventPublisher::new(self.config.scheduler.event_capacity);
        let scheduler = Arc::new(TaskScheduler::new(
            self.config.scheduler.clone(),
            handlers,
            events.clone(),
            Arc::clone(&metrics),
        ));

        info!(
            providers = registry.len(),
            workers = self.config.scheduler.worker_count,
            "Execution core built"
        );
        Ok(Arc::new(ExecutionCore {
            config: self.config,
            cache,
            breakers,
            registry,
            orchestrator,
            metrics,
            scheduler,
            events,
        }))
    }
}

/// The assembled execution core. One instance per process.
pub struct ExecutionCore {
    config: CoreConfig,
    cache: Arc<CacheLayer>,
    breakers: Arc<CircuitBreakerRegistry>,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<AiOrchestrator>,
    metrics: Arc<MetricsAggregator>,
    scheduler: Arc<TaskScheduler>,
    events: TaskEventPublisher,
}

impl ExecutionCore {
    pub fn builder(config: CoreConfig) -> ExecutionCoreBuilder {
        ExecutionCoreBuilder {
            config,
            backend: None,
            providers: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Initialize logging and spawn the scheduler worker pool.
    pub fn start(&self) {
        logging::init();
        self.scheduler.start();
    }

    /// Stop the worker pool; running attempts finish first.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// Submit a background task. See [`TaskScheduler::submit`].
    pub fn submit_task(
        &self,
        kind: &str,
        payload: Value,
        priority: TaskPriority,
        max_retries: u32,
        deadline: Option<Duration>,
    ) -> Result<TaskId> {
        self.scheduler.submit(kind, payload, priority, max_retries, deadline)
    }

    /// Submit a task held until every task in `depends_on` succeeds.
    /// See [`TaskScheduler::submit_with_dependencies`].
    pub fn submit_task_with_dependencies(
        &self,
        kind: &str,
        payload: Value,
        priority: TaskPriority,
        max_retries: u32,
        deadline: Option<Duration>,
        depends_on: &[TaskId],
    ) -> Result<TaskId> {
        self.scheduler
            .submit_with_dependencies(kind, payload, priority, max_retries, deadline, depends_on)
    }

    pub fn task_status(&self, id: TaskId) -> Result<TaskSnapshot> {
        self.scheduler.status(id)
    }

    pub fn cancel_task(&self, id: TaskId) -> Result<()> {
        self.scheduler.cancel(id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Direct (non-task) generation through the orchestrator.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        preferred_provider: Option<&str>,
    ) -> Result<crate::provider::AiResponse> {
        self.orchestrator.generate(request, preferred_provider).await
    }

    /// Read-only per-provider health snapshot.
    pub fn health_check(&self) -> HashMap<String, ProviderHealth> {
        self.orchestrator.health_check()
    }

    /// Combined metrics: provider and task series, cache counters, queue depths.
    pub fn metrics_snapshot(&self) -> CoreMetrics {
        let MetricsSnapshot { providers, task_kinds } = self.metrics.snapshot();
        let depths: QueueDepths = self.scheduler.queue_depths();
        CoreMetrics {
            providers,
            task_kinds,
            cache: self.cache.stats(),
            queue_depths: depths.to_vec(),
            task_count: self.scheduler.task_count(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<AiOrchestrator> {
        &self.orchestrator
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn provider_registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }
}

/// Payload accepted by the built-in `ai_generation` handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct AiGenerationPayload {
    prompt: String,
    #[serde(default)]
    params: GenerationParams,
    #[serde(default)]
    preferred_provider: Option<String>,
}

/// Built-in handler routing generation tasks through the orchestrator.
struct AiGenerationHandler {
    orchestrator: Arc<AiOrchestrator>,
}

#[async_trait]
impl TaskHandler for AiGenerationHandler {
    fn kind(&self) -> &str {
        AI_GENERATION_KIND
    }

    async fn run(&self, payload: &Value, progress: &ProgressHandle) -> Result<Value> {
        let payload: AiGenerationPayload = serde_json::from_value(payload.clone())?;

        // Cancellation checkpoint before committing to a provider call
        if progress.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        progress.update(10, Some("dispatching to provider"));

        let request = GenerationRequest::new(payload.prompt).with_params(payload.params);
        let response = self
            .orchestrator
            .generate(&request, payload.preferred_provider.as_deref())
            .await?;

        progress.update(90, Some("response received"));
        Ok(serde_json::to_value(response)?)
    }
}
