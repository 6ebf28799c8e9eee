//! Task queue integration tests: priority draining, lane independence,
//! event-driven completion and deadlines.

use quorum_core::{
    Error, EventBus, Lane, OrchestratorEvent, Result, Task, TaskQueue, TaskRequest, TaskRunner,
    TaskStatus,
};
use quorum_llm::Intent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

fn request(prompt: &str, priority: u8, is_local: bool) -> TaskRequest {
    TaskRequest {
        prompt: prompt.to_string(),
        intent: Intent::SimpleQuestion,
        priority,
        is_local,
    }
}

/// Runner that only proceeds when the test grants a permit, recording
/// execution order.
struct GatedRunner {
    gate: Arc<Semaphore>,
    log: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl TaskRunner for GatedRunner {
    async fn run(&self, task: &Task) -> Result<String> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.log
            .lock()
            .unwrap()
            .push(task.prompt.clone());
        Ok(format!("done: {}", task.prompt))
    }
}

#[tokio::test]
async fn test_lane_drains_in_priority_order_and_reevaluates_mid_drain() {
    let runner = Arc::new(GatedRunner {
        gate: Arc::new(Semaphore::new(0)),
        log: Mutex::new(Vec::new()),
    });
    let queue = TaskQueue::new(runner.clone(), EventBus::default());

    // The plug occupies the lane's single running slot so the later
    // enqueues are all pending when draining reaches them.
    let plug = queue.enqueue(request("plug", 100, false));
    let p1 = queue.enqueue(request("p1", 1, false));
    let p5 = queue.enqueue(request("p5", 5, false));
    let p3 = queue.enqueue(request("p3", 3, false));

    runner.gate.add_permits(1);
    queue.wait_for_task(plug, Duration::from_secs(5)).await.unwrap();

    // p5 is now the in-flight task; p10 arrives mid-drain and must be
    // served before the remaining lower-priority pending tasks.
    while queue.get_task(p5).unwrap().status != TaskStatus::Running {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let p10 = queue.enqueue(request("p10", 10, false));

    for id in [p5, p10, p3, p1] {
        runner.gate.add_permits(1);
        let task = queue.wait_for_task(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    let log = runner.log.lock().unwrap().clone();
    assert_eq!(log, vec!["plug", "p5", "p10", "p3", "p1"]);
}

/// Runner that blocks local tasks until notified and completes cloud
/// tasks immediately.
struct LaneRunner {
    release_local: Arc<Notify>,
}

#[async_trait::async_trait]
impl TaskRunner for LaneRunner {
    async fn run(&self, task: &Task) -> Result<String> {
        if task.is_local {
            self.release_local.notified().await;
        }
        Ok("ok".to_string())
    }
}

#[tokio::test]
async fn test_lanes_progress_independently() {
    let release_local = Arc::new(Notify::new());
    let runner = Arc::new(LaneRunner {
        release_local: release_local.clone(),
    });
    let queue = TaskQueue::new(runner, EventBus::default());

    let local = queue.enqueue(request("local work", 50, true));
    let cloud = queue.enqueue(request("cloud work", 50, false));

    // The cloud lane finishes while the local lane is still blocked.
    let cloud_task = queue.wait_for_task(cloud, Duration::from_secs(5)).await.unwrap();
    assert_eq!(cloud_task.status, TaskStatus::Completed);
    assert_ne!(
        queue.get_task(local).unwrap().status,
        TaskStatus::Completed
    );

    release_local.notify_one();
    let local_task = queue.wait_for_task(local, Duration::from_secs(5)).await.unwrap();
    assert_eq!(local_task.status, TaskStatus::Completed);
}

struct SlowRunner;

#[async_trait::async_trait]
impl TaskRunner for SlowRunner {
    async fn run(&self, _task: &Task) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok("too late".to_string())
    }
}

#[tokio::test]
async fn test_task_fails_on_deadline() {
    let queue = TaskQueue::with_task_timeout(
        Arc::new(SlowRunner),
        EventBus::default(),
        Duration::from_millis(50),
    );

    let id = queue.enqueue(request("slow", 50, false));
    let task = queue.wait_for_task(id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("timed out"));
}

struct EchoRunner;

#[async_trait::async_trait]
impl TaskRunner for EchoRunner {
    async fn run(&self, task: &Task) -> Result<String> {
        Ok(task.prompt.clone())
    }
}

#[tokio::test]
async fn test_completed_tasks_survive_until_cleared() {
    let queue = TaskQueue::new(Arc::new(EchoRunner), EventBus::default());

    let id = queue.enqueue(request("keep me", 50, false));
    let task = queue.wait_for_task(id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(task.output.as_deref(), Some("keep me"));

    // Terminal tasks stay visible until the explicit clear.
    assert!(queue.get_task(id).is_some());
    queue.clear_completed();
    assert!(queue.get_task(id).is_none());
}

#[tokio::test]
async fn test_wait_after_completion_resolves_immediately() {
    let queue = TaskQueue::new(Arc::new(EchoRunner), EventBus::default());
    let id = queue.enqueue(request("fast", 50, false));

    queue.wait_for_task(id, Duration::from_secs(5)).await.unwrap();
    // A second wait must see the stored terminal state, not hang.
    let again = queue.wait_for_task(id, Duration::from_millis(100)).await.unwrap();
    assert_eq!(again.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_wait_for_unknown_task_errors() {
    let queue = TaskQueue::new(Arc::new(EchoRunner), EventBus::default());
    let result = queue
        .wait_for_task(uuid::Uuid::new_v4(), Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(Error::TaskFailed(_))));
}

#[tokio::test]
async fn test_queue_updates_pushed_to_subscribers() {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let queue = TaskQueue::new(Arc::new(EchoRunner), events);

    let id = queue.enqueue(request("observable", 50, true));
    queue.wait_for_task(id, Duration::from_secs(5)).await.unwrap();

    let mut saw_queued = false;
    let mut saw_snapshot_with_task = false;
    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            OrchestratorEvent::TaskQueued { task_id, lane } => {
                assert_eq!(task_id, id);
                assert_eq!(lane, Lane::Local);
                saw_queued = true;
            }
            OrchestratorEvent::QueueUpdated(snapshot) => {
                if snapshot.local_queue.iter().any(|t| t.id == id) {
                    saw_snapshot_with_task = true;
                }
            }
            OrchestratorEvent::TaskCompleted { task_id, .. } => {
                assert_eq!(task_id, id);
                saw_completed = true;
            }
            _ => {}
        }
    }
    assert!(saw_queued);
    assert!(saw_snapshot_with_task);
    assert!(saw_completed);
}
