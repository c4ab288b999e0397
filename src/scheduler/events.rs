//! Task lifecycle event side channel.
//!
//! Best-effort broadcast of state changes and progress updates. Ordering is
//! guaranteed by construction (progress is monotone, each task has exactly one
//! terminal transition); delivery is not — a lagging subscriber loses the
//! oldest events, never the channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ErrorCategory;
use crate::scheduler::task::{TaskId, TaskState};

/// One observable task lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    StateChanged {
        task_id: TaskId,
        kind: String,
        from: TaskState,
        to: TaskState,
        /// Present when `to` is Failed
        error_category: Option<ErrorCategory>,
    },
    Progress {
        task_id: TaskId,
        kind: String,
        percent: u8,
        message: Option<String>,
    },
}

/// Fan-out publisher over a bounded broadcast channel.
#[derive(Debug, Clone)]
pub struct TaskEventPublisher {
    sender: broadcast::Sender<TaskEvent>,
}

impl TaskEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is normal and not an error.
    pub fn publish(&self, event: TaskEvent) {
        if let Err(e) = self.sender.send(event) {
            debug!("No active event subscribers: {e}");
        }
    }

    pub fn state_changed(
        &self,
        task_id: TaskId,
        kind: &str,
        from: TaskState,
        to: TaskState,
        error_category: Option<ErrorCategory>,
    ) {
        self.publish(TaskEvent::StateChanged {
            task_id,
            kind: kind.to_string(),
            from,
            to,
            error_category,
        });
    }

    pub fn progress(&self, task_id: TaskId, kind: &str, percent: u8, message: Option<String>) {
        self.publish(TaskEvent::Progress {
            task_id,
            kind: kind.to_string(),
            percent,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let publisher = TaskEventPublisher::new(16);
        let mut rx = publisher.subscribe();

        let id = TaskId::new();
        publisher.state_changed(id, "ai_generation", TaskState::Pending, TaskState::Running, None);
        publisher.progress(id, "ai_generation", 50, Some("halfway".into()));

        match rx.recv().await.unwrap() {
            TaskEvent::StateChanged { task_id, to, .. } => {
                assert_eq!(task_id, id);
                assert_eq!(to, TaskState::Running);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            TaskEvent::Progress { percent, .. } => assert_eq!(percent, 50),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let publisher = TaskEventPublisher::new(16);
        // Must not panic or error
        publisher.progress(TaskId::new(), "ai_generation", 10, None);
    }
}
