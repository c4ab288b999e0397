//! Task handler seam: the trait workers dispatch through, the registry of
//! known task kinds, and the progress handle handlers use to report progress
//! and observe cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::scheduler::events::TaskEventPublisher;
use crate::scheduler::task::TaskRecord;

/// Executes one kind of background task.
///
/// Handlers are registered once at startup; the scheduler rejects submissions
/// for kinds with no handler. A handler reports progress and polls for
/// cancellation through the [`ProgressHandle`]; returning an error surfaces it
/// to the retry logic with its classification intact.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task kind this handler executes.
    fn kind(&self) -> &str;

    async fn run(&self, payload: &Value, progress: &ProgressHandle) -> Result<Value>;
}

/// Known task kinds, keyed by name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn TaskHandler>) {
        let kind = handler.kind().to_string();
        info!(kind = %kind, "Task handler registered");
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).map(|h| h.clone())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }
}

/// Handed to a running handler for progress reporting and cancellation checks.
///
/// Progress is monotonically non-decreasing and only accepted while the task is
/// Running; accepted updates are also broadcast on the event channel.
#[derive(Clone)]
pub struct ProgressHandle {
    record: Arc<TaskRecord>,
    events: TaskEventPublisher,
}

impl ProgressHandle {
    pub(crate) fn new(record: Arc<TaskRecord>, events: TaskEventPublisher) -> Self {
        Self { record, events }
    }

    /// Report progress. Ignored (with a warning) when the task is no longer
    /// Running or the percent would decrease.
    pub fn update(&self, percent: u8, message: Option<&str>) {
        let message = message.map(str::to_string);
        if self.record.update_progress(percent, message.clone()) {
            self.events
                .progress(self.record.id, &self.record.kind, percent.min(100), message);
        }
    }

    /// Cooperative cancellation checkpoint; handlers should poll this at
    /// natural boundaries and return [`CoreError::Cancelled`](crate::error::CoreError::Cancelled)
    /// when it turns true.
    pub fn is_cancelled(&self) -> bool {
        self.record.is_cancel_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::TaskPriority;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn kind(&self) -> &str {
            "echo"
        }

        async fn run(&self, payload: &Value, _progress: &ProgressHandle) -> Result<Value> {
            Ok(payload.clone())
        }
    }

    #[test]
    fn registry_lookup_by_kind() {
        let registry = HandlerRegistry::new();
        assert!(!registry.contains("echo"));
        registry.register(Arc::new(EchoHandler));
        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[tokio::test]
    async fn progress_handle_publishes_accepted_updates() {
        let record = Arc::new(TaskRecord::new(
            "echo",
            json!({}),
            TaskPriority::Normal,
            0,
            None,
        ));
        let events = TaskEventPublisher::new(16);
        let mut rx = events.subscribe();
        let handle = ProgressHandle::new(record.clone(), events);

        // Rejected before the task runs: nothing published
        handle.update(10, None);

        record.begin_attempt().unwrap();
        handle.update(30, Some("working"));

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            crate::scheduler::events::TaskEvent::Progress {
                task_id: record.id,
                kind: "echo".into(),
                percent: 30,
                message: Some("working".into()),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_flag_visible_through_handle() {
        let record = Arc::new(TaskRecord::new(
            "echo",
            json!({}),
            TaskPriority::Normal,
            0,
            None,
        ));
        let handle = ProgressHandle::new(record.clone(), TaskEventPublisher::new(4));
        assert!(!handle.is_cancelled());
        record.request_cancel();
        assert!(handle.is_cancelled());
    }
}
