//! # Task Scheduler and Worker Pool
//!
//! A fixed pool of workers drains the strict-priority queue, dispatching each
//! task to its registered handler. Failures spend the task's own retry budget
//! (independent of provider-level retry inside a handler) with delayed
//! re-enqueue; cancellation is cooperative for running tasks and immediate for
//! queued ones. Tasks may depend on other tasks: a dependent is held out of
//! the queue until every dependency succeeds, and fails without running when
//! any dependency reaches a non-success terminal state. Every terminal outcome
//! is recorded in metrics and broadcast on the event channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{CoreError, Result};
use crate::metrics::MetricsAggregator;
use crate::resilience::BackoffPolicy;
use crate::scheduler::events::TaskEventPublisher;
use crate::scheduler::handler::{HandlerRegistry, ProgressHandle, TaskHandler};
use crate::scheduler::queue::{PriorityQueue, QueueDepths};
use crate::scheduler::task::{TaskError, TaskId, TaskPriority, TaskRecord, TaskSnapshot, TaskState};

/// Dependency bookkeeping for held tasks.
///
/// A held task appears in `waiting` with its unresolved-dependency count and in
/// the `dependents` list of each unresolved dependency. Both maps are updated
/// under one lock so releases and failures observe a consistent view.
#[derive(Debug, Default)]
struct DependencyTracker {
    /// Dependency id -> held tasks waiting on it
    dependents: HashMap<TaskId, Vec<TaskId>>,
    /// Held task id -> number of dependencies not yet succeeded
    waiting: HashMap<TaskId, usize>,
}

/// Priority-based task scheduler with bounded concurrency.
pub struct TaskScheduler {
    config: SchedulerConfig,
    store: DashMap<TaskId, Arc<TaskRecord>>,
    queue: PriorityQueue,
    handlers: Arc<HandlerRegistry>,
    events: TaskEventPublisher,
    metrics: Arc<MetricsAggregator>,
    backoff: BackoffPolicy,
    deps: Mutex<DependencyTracker>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        handlers: Arc<HandlerRegistry>,
        events: TaskEventPublisher,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        let backoff = BackoffPolicy::new(&config.task_backoff);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store: DashMap::new(),
            queue: PriorityQueue::new(),
            handlers,
            events,
            metrics,
            backoff,
            deps: Mutex::new(DependencyTracker::default()),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Idempotent: calling twice does not double the pool.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("Scheduler already started, ignoring");
            return;
        }
        for worker_id in 0..self.config.worker_count {
            let scheduler = Arc::clone(self);
            let shutdown_rx = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(scheduler.worker_loop(worker_id, shutdown_rx)));
        }
        info!(worker_count = self.config.worker_count, "🟢 Task scheduler started");
    }

    /// Stop accepting dequeues and wait for workers to park.
    ///
    /// Tasks already running finish their current attempt; queued tasks remain
    /// Pending in the store.
    pub async fn shutdown(&self) {
        info!("Task scheduler shutting down");
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock());
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker join failed during shutdown");
            }
        }
        info!("🔴 Task scheduler stopped");
    }

    /// Submit a task for execution.
    ///
    /// Rejects kinds with no registered handler; accepted tasks are durable in
    /// the in-process store and queued immediately.
    pub fn submit(
        &self,
        kind: &str,
        payload: Value,
        priority: TaskPriority,
        max_retries: u32,
        deadline: Option<Duration>,
    ) -> Result<TaskId> {
        self.submit_with_dependencies(kind, payload, priority, max_retries, deadline, &[])
    }

    /// Submit a task gated on other tasks succeeding first.
    ///
    /// The task is held out of the queue until every id in `depends_on` reaches
    /// `Succeeded`. A dependency that fails or is cancelled fails the task
    /// immediately with [`ErrorCategory::DependencyFailed`](crate::error::ErrorCategory::DependencyFailed),
    /// without it ever running; unknown dependency ids are rejected at submit.
    pub fn submit_with_dependencies(
        &self,
        kind: &str,
        payload: Value,
        priority: TaskPriority,
        max_retries: u32,
        deadline: Option<Duration>,
        depends_on: &[TaskId],
    ) -> Result<TaskId> {
        if !self.handlers.contains(kind) {
            return Err(CoreError::HandlerNotRegistered(kind.to_string()));
        }
        let mut dep_records = Vec::with_capacity(depends_on.len());
        for dep_id in depends_on {
            dep_records.push(self.record(*dep_id)?);
        }

        let record = Arc::new(TaskRecord::new(kind, payload, priority, max_retries, deadline));
        let id = record.id;
        self.store.insert(id, Arc::clone(&record));

        // Classify dependencies under the tracker lock: terminal transitions
        // resolve their dependents only after taking this same lock, so a
        // dependency observed as live here cannot slip past unresolved.
        let (dead_dependency, unresolved) = {
            let mut deps = self.deps.lock();
            let dead = dep_records
                .iter()
                .find(|d| matches!(d.state(), TaskState::Failed | TaskState::Cancelled))
                .map(|d| d.id);
            if dead.is_some() {
                (dead, 0)
            } else {
                let live: Vec<TaskId> = dep_records
                    .iter()
                    .filter(|d| d.state() != TaskState::Succeeded)
                    .map(|d| d.id)
                    .collect();
                let count = live.len();
                for dep_id in live {
                    deps.dependents.entry(dep_id).or_default().push(id);
                }
                if count > 0 {
                    deps.waiting.insert(id, count);
                }
                (None, count)
            }
        };

        if let Some(dep_id) = dead_dependency {
            info!(task_id = %id, kind = %kind, dependency = %dep_id, "Task submitted");
            self.fail_dependent(id, dep_id);
        } else if unresolved > 0 {
            info!(
                task_id = %id,
                kind = %kind,
                priority = %priority,
                unresolved_dependencies = unresolved,
                "Task submitted, held on dependencies"
            );
        } else {
            self.queue.push(priority, id);
            info!(task_id = %id, kind = %kind, priority = %priority, "Task submitted");
        }
        Ok(id)
    }

    /// Point-in-time status of a task.
    pub fn status(&self, id: TaskId) -> Result<TaskSnapshot> {
        Ok(self.record(id)?.snapshot())
    }

    /// Cancel a task.
    ///
    /// Pending and Retrying tasks are cancelled immediately. Running tasks get
    /// the cooperative flag raised and keep running until the handler observes
    /// it; there is no hard kill. Terminal tasks reject cancellation.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        let record = self.record(id)?;
        let state = record.state();
        if state.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "task {id} is already {state}"
            )));
        }

        record.request_cancel();
        if state == TaskState::Running {
            // No hard kill: the handler observes the flag at its next
            // checkpoint and the run path settles Cancelled.
            info!(task_id = %id, "Cancellation requested for running task");
            return Ok(());
        }
        match record.transition(TaskState::Cancelled) {
            Ok(from) => {
                info!(task_id = %id, from = %from, "Task cancelled");
                self.events
                    .state_changed(id, &record.kind, from, TaskState::Cancelled, None);
                self.metrics
                    .record_task(&record.kind, false, self.age_of(&record));
                self.deps.lock().waiting.remove(&id);
                self.resolve_dependents(id, false);
            }
            // A worker claimed it between the state read and here: the flag is
            // up and the run path settles the final state.
            Err(_) => {
                info!(task_id = %id, "Cancellation requested for running task");
            }
        }
        Ok(())
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<super::events::TaskEvent> {
        self.events.subscribe()
    }

    /// Per-priority queue depths, most urgent first.
    pub fn queue_depths(&self) -> QueueDepths {
        self.queue.depths()
    }

    /// Number of tasks tracked in the store, terminal states included.
    pub fn task_count(&self) -> usize {
        self.store.len()
    }

    fn record(&self, id: TaskId) -> Result<Arc<TaskRecord>> {
        self.store
            .get(&id)
            .map(|r| Arc::clone(&r))
            .ok_or(CoreError::TaskNotFound(id))
    }

    fn age_of(&self, record: &TaskRecord) -> Duration {
        (Utc::now() - record.created_at()).to_std().unwrap_or_default()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(worker_id, "Worker started");
        loop {
            let id = tokio::select! {
                _ = shutdown_rx.changed() => break,
                id = self.queue.next() => id,
            };
            self.run_task(id).await;
        }
        debug!(worker_id, "Worker stopped");
    }

    async fn run_task(self: &Arc<Self>, id: TaskId) {
        let record = match self.record(id) {
            Ok(record) => record,
            Err(_) => {
                warn!(task_id = %id, "Dequeued task missing from store");
                return;
            }
        };

        // Cancelled while queued: the cancel path already settled it.
        let attempt = match record.begin_attempt() {
            Ok(attempt) => attempt,
            Err(_) => {
                debug!(task_id = %id, state = %record.state(), "Skipping dequeued task not in Pending");
                return;
            }
        };
        self.events
            .state_changed(id, &record.kind, TaskState::Pending, TaskState::Running, None);
        debug!(
            task_id = %id,
            kind = %record.kind,
            attempt,
            max_retries = record.max_retries,
            "Task attempt starting"
        );

        let handler = match self.handlers.get(&record.kind) {
            Some(handler) => handler,
            // Handlers cannot be deregistered, so this is unreachable in
            // practice; settle the task rather than wedging it in Running.
            None => {
                self.settle_failed(&record, &CoreError::HandlerNotRegistered(record.kind.clone()));
                return;
            }
        };

        let started = Instant::now();
        let outcome = self.run_attempt(&record, handler).await;
        let duration = started.elapsed();

        match outcome {
            Ok(result) => {
                if let Err(e) = record.mark_succeeded(result) {
                    warn!(task_id = %id, error = %e, "Could not record success");
                    return;
                }
                info!(task_id = %id, kind = %record.kind, attempt, "🟢 Task succeeded");
                self.events
                    .state_changed(id, &record.kind, TaskState::Running, TaskState::Succeeded, None);
                self.metrics.record_task(&record.kind, true, duration);
                self.resolve_dependents(id, true);
            }
            Err(CoreError::Cancelled) => {
                if record.transition(TaskState::Cancelled).is_ok() {
                    info!(task_id = %id, kind = %record.kind, "Task cancelled during run");
                    self.events
                        .state_changed(id, &record.kind, TaskState::Running, TaskState::Cancelled, None);
                    self.metrics.record_task(&record.kind, false, duration);
                    self.resolve_dependents(id, false);
                }
            }
            // A blown deadline is final regardless of remaining retry budget
            Err(e @ CoreError::DeadlineExceeded) => {
                self.settle_failed(&record, &e);
                self.metrics.record_task(&record.kind, false, duration);
            }
            Err(e) if e.is_retryable() && attempt <= record.max_retries => {
                let delay = self.backoff.delay_for(attempt - 1);
                let next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                if let Err(err) = record.mark_retrying(TaskError::from_core(&e), next_attempt_at) {
                    warn!(task_id = %id, error = %err, "Could not record retry");
                    return;
                }
                warn!(
                    task_id = %id,
                    kind = %record.kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "🟡 Task attempt failed, retry scheduled"
                );
                self.events
                    .state_changed(id, &record.kind, TaskState::Running, TaskState::Retrying, None);

                let scheduler = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    scheduler.requeue(id);
                });
            }
            Err(e) => {
                self.settle_failed(&record, &e);
                self.metrics.record_task(&record.kind, false, duration);
            }
        }
    }

    /// Run one attempt, enforcing the overall deadline when the task has one.
    async fn run_attempt(&self, record: &Arc<TaskRecord>, handler: Arc<dyn TaskHandler>) -> Result<Value> {
        let progress = ProgressHandle::new(Arc::clone(record), self.events.clone());

        match record.deadline {
            Some(deadline) => {
                let Some(remaining) = deadline.checked_sub(self.age_of(record)) else {
                    return Err(CoreError::DeadlineExceeded);
                };
                match tokio::time::timeout(remaining, handler.run(&record.payload, &progress)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(CoreError::DeadlineExceeded),
                }
            }
            None => handler.run(&record.payload, &progress).await,
        }
    }

    /// Move a Retrying task back to Pending and put it on the queue.
    fn requeue(&self, id: TaskId) {
        let Ok(record) = self.record(id) else {
            return;
        };
        match record.transition(TaskState::Pending) {
            Ok(_) => {
                self.events
                    .state_changed(id, &record.kind, TaskState::Retrying, TaskState::Pending, None);
                self.queue.push(record.priority, id);
                debug!(task_id = %id, "Task re-enqueued for retry");
            }
            // Cancelled while waiting out the backoff delay
            Err(_) => {
                debug!(task_id = %id, state = %record.state(), "Retry re-enqueue skipped");
            }
        }
    }

    fn settle_failed(&self, record: &Arc<TaskRecord>, error: &CoreError) {
        let task_error = TaskError::from_core(error);
        let category = task_error.category;
        if let Err(e) = record.mark_failed(task_error) {
            warn!(task_id = %record.id, error = %e, "Could not record failure");
            return;
        }
        warn!(
            task_id = %record.id,
            kind = %record.kind,
            category = ?category,
            error = %error,
            "🔴 Task failed"
        );
        self.events.state_changed(
            record.id,
            &record.kind,
            TaskState::Running,
            TaskState::Failed,
            Some(category),
        );
        self.resolve_dependents(record.id, false);
    }

    /// Fail a held task because one of its dependencies did not succeed.
    fn fail_dependent(&self, id: TaskId, failed_dep: TaskId) {
        let Ok(record) = self.record(id) else {
            return;
        };
        let error = CoreError::DependencyFailed(failed_dep);
        let task_error = TaskError::from_core(&error);
        let category = task_error.category;
        match record.mark_failed(task_error) {
            Ok(()) => {
                warn!(
                    task_id = %id,
                    kind = %record.kind,
                    dependency = %failed_dep,
                    "🔴 Task failed before running: dependency did not succeed"
                );
                self.events.state_changed(
                    id,
                    &record.kind,
                    TaskState::Pending,
                    TaskState::Failed,
                    Some(category),
                );
                self.metrics
                    .record_task(&record.kind, false, self.age_of(&record));
                self.resolve_dependents(id, false);
            }
            // Cancelled while held
            Err(e) => {
                debug!(task_id = %id, error = %e, "Dependency failure skipped, task already terminal");
            }
        }
    }

    /// Resolve tasks held on `id` after it reached a terminal state.
    ///
    /// Success releases each dependent whose last unresolved dependency this
    /// was; any other terminal state fails every held dependent, cascading
    /// through their own dependents in turn.
    fn resolve_dependents(&self, id: TaskId, succeeded: bool) {
        let (released, doomed) = {
            let mut deps = self.deps.lock();
            let Some(dependents) = deps.dependents.remove(&id) else {
                return;
            };
            let mut released = Vec::new();
            let mut doomed = Vec::new();
            for dep_id in dependents {
                if succeeded {
                    // Absent from `waiting` means already settled (cancelled
                    // or failed through another dependency)
                    if let Some(remaining) = deps.waiting.get_mut(&dep_id) {
                        *remaining -= 1;
                        if *remaining == 0 {
                            deps.waiting.remove(&dep_id);
                            released.push(dep_id);
                        }
                    }
                } else if deps.waiting.remove(&dep_id).is_some() {
                    doomed.push(dep_id);
                }
            }
            (released, doomed)
        };

        for dep_id in released {
            let Ok(record) = self.record(dep_id) else {
                continue;
            };
            debug!(task_id = %dep_id, dependency = %id, "Dependencies satisfied, task queued");
            self.queue.push(record.priority, dep_id);
        }
        for dep_id in doomed {
            self.fail_dependent(dep_id, id);
        }
    }
}
