//! End-to-end scheduling through the execution core: priority draining, the
//! independence of task-level and provider-level retry, the event stream, and
//! queue-depth reporting.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use learnwords_core::config::CoreConfig;
use learnwords_core::core::{ExecutionCore, AI_GENERATION_KIND};
use learnwords_core::error::{CoreError, Result};
use learnwords_core::scheduler::{
    ProgressHandle, TaskEvent, TaskHandler, TaskId, TaskPriority, TaskSnapshot, TaskState,
};

use common::{descriptor, fast_retry, ScriptedCall, ScriptedProvider};

/// Handler that records the order tasks were executed in.
struct RecordingHandler {
    order: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    fn kind(&self) -> &str {
        "record"
    }

    async fn run(&self, payload: &Value, _progress: &ProgressHandle) -> Result<Value> {
        let label = payload["label"].as_str().unwrap_or("?").to_string();
        self.order.lock().push(label);
        Ok(json!(null))
    }
}

/// Handler that fails a fixed number of times before succeeding.
struct FlakyHandler {
    failures_left: Mutex<u32>,
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    fn kind(&self) -> &str {
        "flaky"
    }

    async fn run(&self, _payload: &Value, progress: &ProgressHandle) -> Result<Value> {
        progress.update(25, Some("starting"));
        let mut left = self.failures_left.lock();
        if *left > 0 {
            *left -= 1;
            return Err(CoreError::Handler("not yet".into()));
        }
        drop(left);
        progress.update(75, Some("almost"));
        Ok(json!("stable"))
    }
}

fn fast_config(worker_count: usize) -> CoreConfig {
    let mut config = CoreConfig::default();
    config.scheduler.worker_count = worker_count;
    config.scheduler.task_backoff.base_delay_ms = 1;
    config.scheduler.task_backoff.max_delay_ms = 5;
    config.scheduler.task_backoff.jitter_enabled = false;
    config.provider_retry = fast_retry(1);
    config
}

async fn wait_terminal(core: &ExecutionCore, id: TaskId) -> TaskSnapshot {
    for _ in 0..500 {
        let snapshot = core.task_status(id).unwrap();
        if snapshot.state.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached a terminal state");
}

#[tokio::test]
async fn single_worker_drains_in_strict_priority_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let core = ExecutionCore::builder(fast_config(1))
        .handler(Arc::new(RecordingHandler { order: order.clone() }))
        .build()
        .unwrap();

    // Enqueue before starting workers so priority fully decides the order
    let mut ids = Vec::new();
    for (label, priority) in [
        ("low", TaskPriority::Low),
        ("urgent", TaskPriority::Urgent),
        ("normal", TaskPriority::Normal),
        ("high", TaskPriority::High),
    ] {
        ids.push(
            core.submit_task("record", json!({"label": label}), priority, 0, None)
                .unwrap(),
        );
    }
    core.start();

    for id in ids {
        assert_eq!(wait_terminal(&core, id).await.state, TaskState::Succeeded);
    }
    core.shutdown().await;

    assert_eq!(*order.lock(), vec!["urgent", "high", "normal", "low"]);
}

#[tokio::test]
async fn task_retry_budget_is_independent_of_provider_retry() {
    // Provider fails its single attempt twice, then recovers. Each task attempt
    // exhausts the provider once; the task's own retry budget carries it
    // through to the third attempt.
    let provider = ScriptedProvider::new(
        "wobbly",
        [ScriptedCall::FailRetryable, ScriptedCall::FailRetryable],
        ScriptedCall::Succeed("third time lucky"),
    );
    let core = ExecutionCore::builder(fast_config(1))
        .provider(descriptor("wobbly", 1.0, 1000), provider.clone())
        .build()
        .unwrap();
    core.start();

    let id = core
        .submit_task(
            AI_GENERATION_KIND,
            json!({"prompt": "fractions"}),
            TaskPriority::Normal,
            2,
            None,
        )
        .unwrap();
    let snapshot = wait_terminal(&core, id).await;
    core.shutdown().await;

    assert_eq!(snapshot.state, TaskState::Succeeded);
    assert_eq!(snapshot.attempt_count, 3);
    assert_eq!(provider.calls(), 3);
    assert_eq!(
        snapshot.result.unwrap()["content"],
        json!("third time lucky")
    );
}

#[tokio::test]
async fn event_stream_follows_the_lifecycle() {
    let core = ExecutionCore::builder(fast_config(1))
        .handler(Arc::new(FlakyHandler {
            failures_left: Mutex::new(1),
        }))
        .build()
        .unwrap();
    let mut rx = core.subscribe_events();
    core.start();

    let id = core
        .submit_task("flaky", json!({}), TaskPriority::Normal, 1, None)
        .unwrap();
    wait_terminal(&core, id).await;
    core.shutdown().await;

    let mut transitions = Vec::new();
    let mut progress = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            TaskEvent::StateChanged { task_id, from, to, .. } if task_id == id => {
                transitions.push((from, to));
            }
            TaskEvent::Progress { task_id, percent, .. } if task_id == id => {
                progress.push(percent);
            }
            _ => {}
        }
    }

    assert_eq!(
        transitions,
        vec![
            (TaskState::Pending, TaskState::Running),
            (TaskState::Running, TaskState::Retrying),
            (TaskState::Retrying, TaskState::Pending),
            (TaskState::Pending, TaskState::Running),
            (TaskState::Running, TaskState::Succeeded),
        ]
    );
    // Progress within the successful attempt is monotone
    assert_eq!(progress, vec![25, 25, 75]);
}

#[tokio::test]
async fn queue_depths_surface_backlog() {
    let core = ExecutionCore::builder(fast_config(1))
        .handler(Arc::new(RecordingHandler {
            order: Arc::new(Mutex::new(Vec::new())),
        }))
        .build()
        .unwrap();

    // Workers not started yet: everything stays queued
    let mut ids = Vec::new();
    for priority in [TaskPriority::Urgent, TaskPriority::Low, TaskPriority::Low] {
        ids.push(
            core.submit_task("record", json!({"label": "x"}), priority, 0, None)
                .unwrap(),
        );
    }

    let metrics = core.metrics_snapshot();
    let total: usize = metrics.queue_depths.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 3);
    assert_eq!(metrics.task_count, 3);

    core.start();
    for id in ids {
        wait_terminal(&core, id).await;
    }
    core.shutdown().await;

    let drained = core.metrics_snapshot();
    let total: usize = drained.queue_depths.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 0);
    assert_eq!(drained.task_kinds["record"].success, 3);
}

#[tokio::test]
async fn dependency_chain_runs_in_order_and_fails_forward() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let core = ExecutionCore::builder(fast_config(2))
        .handler(Arc::new(RecordingHandler { order: order.clone() }))
        .handler(Arc::new(FlakyHandler {
            failures_left: Mutex::new(u32::MAX),
        }))
        .build()
        .unwrap();
    core.start();

    // extract -> summarize: the dependent only runs once the first succeeds
    let extract = core
        .submit_task("record", json!({"label": "extract"}), TaskPriority::Normal, 0, None)
        .unwrap();
    let summarize = core
        .submit_task_with_dependencies(
            "record",
            json!({"label": "summarize"}),
            TaskPriority::Urgent,
            0,
            None,
            &[extract],
        )
        .unwrap();

    assert_eq!(wait_terminal(&core, summarize).await.state, TaskState::Succeeded);
    assert_eq!(*order.lock(), vec!["extract", "summarize"]);

    // A failing dependency fails its dependent without running it
    let doomed = core
        .submit_task("flaky", json!({}), TaskPriority::Normal, 0, None)
        .unwrap();
    let orphan = core
        .submit_task_with_dependencies(
            "record",
            json!({"label": "orphan"}),
            TaskPriority::Normal,
            0,
            None,
            &[doomed],
        )
        .unwrap();

    let snapshot = wait_terminal(&core, orphan).await;
    core.shutdown().await;

    assert_eq!(snapshot.state, TaskState::Failed);
    assert_eq!(snapshot.attempt_count, 0);
    assert_eq!(
        snapshot.last_error.unwrap().category,
        learnwords_core::error::ErrorCategory::DependencyFailed
    );
    assert!(!order.lock().contains(&"orphan".to_string()));
}

#[tokio::test]
async fn provider_exhaustion_fails_task_with_category() {
    let provider = ScriptedProvider::always("down", ScriptedCall::FailRetryable);
    let core = ExecutionCore::builder(fast_config(1))
        .provider(descriptor("down", 1.0, 1000), provider.clone())
        .build()
        .unwrap();
    core.start();

    let id = core
        .submit_task(
            AI_GENERATION_KIND,
            json!({"prompt": "fractions"}),
            TaskPriority::High,
            1,
            None,
        )
        .unwrap();
    let snapshot = wait_terminal(&core, id).await;
    core.shutdown().await;

    assert_eq!(snapshot.state, TaskState::Failed);
    assert_eq!(snapshot.attempt_count, 2);
    assert_eq!(
        snapshot.last_error.unwrap().category,
        learnwords_core::error::ErrorCategory::ProviderExhausted
    );
}
