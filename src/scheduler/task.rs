//! # Task Data Model and State Machine
//!
//! A task is a unit of background work: a kind, a JSON payload, a priority, and
//! a retry budget. Its lifecycle is an explicit state machine with validated
//! transitions; `Succeeded`, `Failed`, and `Cancelled` are terminal and a task
//! enters exactly one of them exactly once. Mutable lifecycle state sits behind
//! a short mutex inside [`TaskRecord`]; callers observe tasks only through
//! [`TaskSnapshot`].

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, ErrorCategory, Result};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Higher priorities are always drained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    /// All priorities from most to least urgent, matching dequeue order.
    pub const DESCENDING: [TaskPriority; 4] = [
        TaskPriority::Urgent,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    /// Bucket index used by the priority queue (0 = most urgent).
    pub fn bucket(self) -> usize {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for TaskPriority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(CoreError::Configuration(format!(
                "Unknown task priority: {other}"
            ))),
        }
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, waiting for a worker
    Pending,
    /// A worker is executing the handler
    Running,
    /// Handler completed; result available
    Succeeded,
    /// Retry budget exhausted or error non-retryable; terminal
    Failed,
    /// Failed attempt awaiting its delayed re-enqueue
    Retrying,
    /// Cancelled by the caller; terminal
    Cancelled,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is a legal lifecycle transition.
    ///
    /// `Pending -> Failed` exists for dependency failure: a held task whose
    /// prerequisite did not succeed fails without ever running.
    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Retrying)
                | (Running, Cancelled)
                | (Retrying, Pending)
                | (Retrying, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::Configuration(format!(
                "Unknown task state: {other}"
            ))),
        }
    }
}

/// Last terminal error of a task, category plus rendered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub category: ErrorCategory,
    pub message: String,
}

impl TaskError {
    pub fn from_core(e: &CoreError) -> Self {
        Self {
            category: e.category(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug)]
struct TaskLifecycle {
    state: TaskState,
    attempt_count: u32,
    progress_percent: u8,
    progress_message: Option<String>,
    last_error: Option<TaskError>,
    result: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    /// When a Retrying task becomes eligible to run again
    next_attempt_at: Option<DateTime<Utc>>,
}

/// Shared, internally synchronized task record.
#[derive(Debug)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: String,
    pub priority: TaskPriority,
    pub max_retries: u32,
    pub payload: Value,
    /// Overall wall-clock budget measured from submission
    pub deadline: Option<Duration>,
    cancel_requested: AtomicBool,
    lifecycle: Mutex<TaskLifecycle>,
}

impl TaskRecord {
    pub fn new(
        kind: impl Into<String>,
        payload: Value,
        priority: TaskPriority,
        max_retries: u32,
        deadline: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            priority,
            max_retries,
            payload,
            deadline,
            cancel_requested: AtomicBool::new(false),
            lifecycle: Mutex::new(TaskLifecycle {
                state: TaskState::Pending,
                attempt_count: 0,
                progress_percent: 0,
                progress_message: None,
                last_error: None,
                result: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
                next_attempt_at: None,
            }),
        }
    }

    pub fn state(&self) -> TaskState {
        self.lifecycle.lock().state
    }

    pub fn attempt_count(&self) -> u32 {
        self.lifecycle.lock().attempt_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.lifecycle.lock().created_at
    }

    /// Raise the cooperative cancellation flag.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Validated state transition; rejects anything outside the lifecycle graph.
    pub fn transition(&self, to: TaskState) -> Result<TaskState> {
        let mut lifecycle = self.lifecycle.lock();
        let from = lifecycle.state;
        if !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition(format!(
                "task {} cannot move {from} -> {to}",
                self.id
            )));
        }
        lifecycle.state = to;
        lifecycle.updated_at = Utc::now();
        if to.is_terminal() {
            lifecycle.completed_at = Some(lifecycle.updated_at);
        }
        Ok(from)
    }

    /// Move Pending -> Running and charge one attempt against the retry budget.
    pub fn begin_attempt(&self) -> Result<u32> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != TaskState::Pending {
            return Err(CoreError::InvalidTransition(format!(
                "task {} cannot start from {}",
                self.id, lifecycle.state
            )));
        }
        lifecycle.state = TaskState::Running;
        lifecycle.attempt_count += 1;
        let now = Utc::now();
        lifecycle.updated_at = now;
        if lifecycle.started_at.is_none() {
            lifecycle.started_at = Some(now);
        }
        lifecycle.next_attempt_at = None;
        Ok(lifecycle.attempt_count)
    }

    /// Record a completed run: result stored, progress forced to 100.
    pub fn mark_succeeded(&self, result: Value) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.state.can_transition_to(TaskState::Succeeded) {
            return Err(CoreError::InvalidTransition(format!(
                "task {} cannot succeed from {}",
                self.id, lifecycle.state
            )));
        }
        lifecycle.state = TaskState::Succeeded;
        lifecycle.progress_percent = 100;
        lifecycle.result = Some(result);
        lifecycle.updated_at = Utc::now();
        lifecycle.completed_at = Some(lifecycle.updated_at);
        Ok(())
    }

    /// Record a terminal failure with its classified error.
    pub fn mark_failed(&self, error: TaskError) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.state.can_transition_to(TaskState::Failed) {
            return Err(CoreError::InvalidTransition(format!(
                "task {} cannot fail from {}",
                self.id, lifecycle.state
            )));
        }
        lifecycle.state = TaskState::Failed;
        lifecycle.last_error = Some(error);
        lifecycle.updated_at = Utc::now();
        lifecycle.completed_at = Some(lifecycle.updated_at);
        Ok(())
    }

    /// Record a failed attempt that still has retry budget.
    pub fn mark_retrying(&self, error: TaskError, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.state.can_transition_to(TaskState::Retrying) {
            return Err(CoreError::InvalidTransition(format!(
                "task {} cannot retry from {}",
                self.id, lifecycle.state
            )));
        }
        lifecycle.state = TaskState::Retrying;
        lifecycle.last_error = Some(error);
        lifecycle.next_attempt_at = Some(next_attempt_at);
        lifecycle.updated_at = Utc::now();
        Ok(())
    }

    /// Progress update while Running; monotonically non-decreasing.
    ///
    /// Out-of-order or post-terminal updates are ignored with a warning rather
    /// than failing the handler.
    pub fn update_progress(&self, percent: u8, message: Option<String>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != TaskState::Running {
            // A handler racing its own cancellation is expected, not noteworthy
            if self.is_cancel_requested() {
                debug!(
                    task_id = %self.id,
                    state = %lifecycle.state,
                    "Progress update ignored: task cancelled"
                );
            } else {
                warn!(
                    task_id = %self.id,
                    state = %lifecycle.state,
                    "Progress update ignored: task is not running"
                );
            }
            return false;
        }
        let percent = percent.min(100);
        if percent < lifecycle.progress_percent {
            warn!(
                task_id = %self.id,
                current = lifecycle.progress_percent,
                requested = percent,
                "Progress update ignored: percent would decrease"
            );
            return false;
        }
        lifecycle.progress_percent = percent;
        if message.is_some() {
            lifecycle.progress_message = message;
        }
        lifecycle.updated_at = Utc::now();
        true
    }

    /// Point-in-time view for status queries and events.
    pub fn snapshot(&self) -> TaskSnapshot {
        let lifecycle = self.lifecycle.lock();
        TaskSnapshot {
            id: self.id,
            kind: self.kind.clone(),
            priority: self.priority,
            state: lifecycle.state,
            attempt_count: lifecycle.attempt_count,
            max_retries: self.max_retries,
            progress_percent: lifecycle.progress_percent,
            progress_message: lifecycle.progress_message.clone(),
            last_error: lifecycle.last_error.clone(),
            result: lifecycle.result.clone(),
            created_at: lifecycle.created_at,
            updated_at: lifecycle.updated_at,
            started_at: lifecycle.started_at,
            completed_at: lifecycle.completed_at,
            next_attempt_at: lifecycle.next_attempt_at,
        }
    }
}

/// Read-only view of a task, returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub kind: String,
    pub priority: TaskPriority,
    pub state: TaskState,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub progress_percent: u8,
    pub progress_message: Option<String>,
    pub last_error: Option<TaskError>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}
