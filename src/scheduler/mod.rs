//! # Task Scheduling
//!
//! Priority-based background task execution: an explicit task state machine,
//! strict-priority FIFO queues, a fixed worker pool, task-level retry with
//! backoff, cooperative cancellation, and a broadcast event side channel.
//! Task-level retry is a separate budget from the provider-level retry a
//! handler may perform internally.

pub mod events;
pub mod handler;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use events::{TaskEvent, TaskEventPublisher};
pub use handler::{HandlerRegistry, ProgressHandle, TaskHandler};
pub use queue::{PriorityQueue, QueueDepths};
pub use scheduler::TaskScheduler;
pub use task::{TaskError, TaskId, TaskPriority, TaskRecord, TaskSnapshot, TaskState};
