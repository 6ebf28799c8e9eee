//! Dual-lane task queue
//!
//! Durable work is appended to one of two independent lanes, local and
//! cloud, each kept sorted by descending priority. A lane drains strictly
//! sequentially: one in-flight task at a time, highest-priority pending
//! task re-evaluated after every completion. The two lanes progress in
//! parallel. Completion is event-driven through one-shot channels keyed by
//! task id; registrations are cleared on every exit path so the map cannot
//! grow without bound.

use crate::error::{Error, Result};
use crate::events::{EventBus, OrchestratorEvent};
use chrono::{DateTime, Utc};
use quorum_llm::Intent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wall-clock deadline for one task execution
pub const TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Queue lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Locally-hosted backends; drained sequentially to bound local compute
    Local,
    /// Cloud backends; drained sequentially to bound spend
    Cloud,
}

impl Lane {
    fn index(self) -> usize {
        match self {
            Self::Local => 0,
            Self::Cloud => 1,
        }
    }
}

/// Task lifecycle state; transitions are linear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in a lane
    Pending,
    /// The lane's single in-flight slot
    Running,
    /// Finished with output
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A queued unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: Uuid,
    /// The prompt to execute
    pub prompt: String,
    /// Classified intent
    pub intent: Intent,
    /// Priority, higher drains first
    pub priority: u8,
    /// Which lane owns the task
    pub is_local: bool,
    /// Lifecycle state
    pub status: TaskStatus,
    /// When the task was enqueued
    pub created_at: DateTime<Utc>,
    /// When execution began
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Output on success
    pub output: Option<String>,
    /// Error on failure
    pub error: Option<String>,
}

impl Task {
    fn lane(&self) -> Lane {
        if self.is_local {
            Lane::Local
        } else {
            Lane::Cloud
        }
    }
}

/// What to enqueue
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// The prompt to execute
    pub prompt: String,
    /// Classified intent
    pub intent: Intent,
    /// Priority, higher drains first
    pub priority: u8,
    /// Target lane
    pub is_local: bool,
}

/// Snapshot pushed to subscribers after every queue state change
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// Local lane, priority order
    pub local_queue: Vec<Task>,
    /// Cloud lane, priority order
    pub cloud_queue: Vec<Task>,
    /// Whether the local lane has an in-flight task
    pub is_local_running: bool,
}

/// Executes one task's provider call. Implemented by the orchestrator;
/// the queue stays ignorant of routing.
#[async_trait::async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    /// Run the task to completion and return its output
    async fn run(&self, task: &Task) -> Result<String>;
}

#[derive(Default)]
struct LaneState {
    tasks: Vec<Task>,
    running: bool,
}

/// Dual-lane priority queue with sequential per-lane draining
pub struct TaskQueue {
    lanes: [Mutex<LaneState>; 2],
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<Task>>>,
    runner: Arc<dyn TaskRunner>,
    events: EventBus,
    shutdown: CancellationToken,
    task_timeout: Duration,
}

impl TaskQueue {
    /// Create a queue draining through `runner`
    #[must_use]
    pub fn new(runner: Arc<dyn TaskRunner>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            lanes: [Mutex::default(), Mutex::default()],
            waiters: Mutex::new(HashMap::new()),
            runner,
            events,
            shutdown: CancellationToken::new(),
            task_timeout: TASK_TIMEOUT,
        })
    }

    /// Create a queue with a custom per-task deadline (tests)
    #[must_use]
    pub fn with_task_timeout(
        runner: Arc<dyn TaskRunner>,
        events: EventBus,
        task_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            lanes: [Mutex::default(), Mutex::default()],
            waiters: Mutex::new(HashMap::new()),
            runner,
            events,
            shutdown: CancellationToken::new(),
            task_timeout,
        })
    }

    /// Append a task to its lane and kick the lane's drain loop.
    /// Returns the new task's id.
    pub fn enqueue(self: &Arc<Self>, request: TaskRequest) -> Uuid {
        let task = Task {
            id: Uuid::new_v4(),
            prompt: request.prompt,
            intent: request.intent,
            priority: request.priority,
            is_local: request.is_local,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        };
        let id = task.id;
        let lane = task.lane();

        {
            let mut state = self.lane(lane);
            // Insert sorted by descending priority; equal priorities keep
            // insertion order.
            let position = state
                .tasks
                .partition_point(|t| t.priority >= task.priority);
            state.tasks.insert(position, task);
        }

        debug!(task_id = %id, ?lane, priority = request.priority, "Task enqueued");
        self.events
            .publish(OrchestratorEvent::TaskQueued { task_id: id, lane });
        self.publish_snapshot();
        self.ensure_draining(lane);
        id
    }

    /// Get a task by id from either lane
    #[must_use]
    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        for lane in [Lane::Local, Lane::Cloud] {
            let state = self.lane(lane);
            if let Some(task) = state.tasks.iter().find(|t| t.id == id) {
                return Some(task.clone());
            }
        }
        None
    }

    /// Count of pending tasks across both lanes
    #[must_use]
    pub fn pending_count(&self) -> usize {
        [Lane::Local, Lane::Cloud]
            .into_iter()
            .map(|lane| {
                self.lane(lane)
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .count()
            })
            .sum()
    }

    /// Drop completed tasks from both lanes. The queue itself never
    /// destroys tasks.
    pub fn clear_completed(&self) {
        for lane in [Lane::Local, Lane::Cloud] {
            let mut state = self.lane(lane);
            state.tasks.retain(|t| t.status != TaskStatus::Completed);
        }
        self.publish_snapshot();
    }

    /// Current queue snapshot
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let local = self.lane(Lane::Local);
        let cloud = self.lane(Lane::Cloud);
        QueueSnapshot {
            local_queue: local.tasks.clone(),
            cloud_queue: cloud.tasks.clone(),
            is_local_running: local.running,
        }
    }

    /// Await a task's terminal state, bounded by `timeout`.
    ///
    /// Resolution is pushed by the drain loop; nothing polls.
    pub async fn wait_for_task(&self, id: Uuid, timeout: Duration) -> Result<Task> {
        if let Some(task) = self.get_task(id) {
            if task.status.is_terminal() {
                return Ok(task);
            }
        } else {
            return Err(Error::TaskFailed(format!("unknown task {id}")));
        }

        let rx = {
            let (tx, rx) = oneshot::channel();
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            waiters.insert(id, tx);
            rx
        };

        // Double-check after registering: the drain loop may have finished
        // the task between the first check and the insert.
        if let Some(task) = self.get_task(id) {
            if task.status.is_terminal() {
                self.remove_waiter(id);
                return Ok(task);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(task)) => Ok(task),
            Ok(Err(_)) => Err(Error::TaskFailed(format!("task {id} notification dropped"))),
            Err(_) => {
                self.remove_waiter(id);
                Err(Error::TaskTimeout(timeout.as_secs()))
            }
        }
    }

    /// Stop draining; in-flight tasks fail as cancelled
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn lane(&self, lane: Lane) -> std::sync::MutexGuard<'_, LaneState> {
        self.lanes[lane.index()]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn remove_waiter(&self, id: Uuid) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.remove(&id);
    }

    fn notify_waiter(&self, task: &Task) {
        let waiter = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            waiters.remove(&task.id)
        };
        if let Some(tx) = waiter {
            // Receiver may have timed out; dropping the send is fine.
            let _ = tx.send(task.clone());
        }
    }

    fn ensure_draining(self: &Arc<Self>, lane: Lane) {
        {
            let mut state = self.lane(lane);
            if state.running {
                return;
            }
            state.running = true;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.drain(lane).await });
    }

    /// Lane drain loop: at most one in-flight execution per lane.
    async fn drain(self: Arc<Self>, lane: Lane) {
        loop {
            // Pop the highest-priority pending task; the list is kept
            // sorted, so the first pending entry wins. Re-evaluated every
            // iteration because higher-priority work may have arrived.
            let task = {
                let mut state = self.lane(lane);
                match state
                    .tasks
                    .iter_mut()
                    .find(|t| t.status == TaskStatus::Pending)
                {
                    Some(task) => {
                        task.status = TaskStatus::Running;
                        task.started_at = Some(Utc::now());
                        task.clone()
                    }
                    None => {
                        state.running = false;
                        drop(state);
                        self.publish_snapshot();
                        return;
                    }
                }
            };

            self.events
                .publish(OrchestratorEvent::TaskStarted { task_id: task.id });
            self.publish_snapshot();

            let started = std::time::Instant::now();
            let outcome = tokio::select! {
                result = tokio::time::timeout(self.task_timeout, self.runner.run(&task)) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(Error::TaskTimeout(self.task_timeout.as_secs())),
                    }
                }
                () = self.shutdown.cancelled() => Err(Error::Cancelled),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let terminal = {
                let mut state = self.lane(lane);
                let stored = state.tasks.iter_mut().find(|t| t.id == task.id);
                match (stored, &outcome) {
                    (Some(stored), Ok(output)) => {
                        stored.status = TaskStatus::Completed;
                        stored.output = Some(output.clone());
                        stored.completed_at = Some(Utc::now());
                        Some(stored.clone())
                    }
                    (Some(stored), Err(error)) => {
                        stored.status = TaskStatus::Failed;
                        stored.error = Some(error.to_string());
                        stored.completed_at = Some(Utc::now());
                        Some(stored.clone())
                    }
                    (None, _) => None,
                }
            };

            if let Some(terminal) = terminal {
                match terminal.status {
                    TaskStatus::Completed => {
                        info!(task_id = %terminal.id, duration_ms, "Task completed");
                        self.events.publish(OrchestratorEvent::TaskCompleted {
                            task_id: terminal.id,
                            duration_ms,
                        });
                    }
                    _ => {
                        warn!(task_id = %terminal.id, error = terminal.error.as_deref().unwrap_or(""), "Task failed");
                        self.events.publish(OrchestratorEvent::TaskFailed {
                            task_id: terminal.id,
                            error: terminal.error.clone().unwrap_or_default(),
                        });
                    }
                }
                self.notify_waiter(&terminal);
            }
            self.publish_snapshot();

            if self.shutdown.is_cancelled() {
                let mut state = self.lane(lane);
                state.running = false;
                return;
            }
        }
    }

    fn publish_snapshot(&self) {
        self.events
            .publish(OrchestratorEvent::QueueUpdated(self.snapshot()));
    }
}
