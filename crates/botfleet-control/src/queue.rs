//! In-process task queue with polled status.
//!
//! Deploy and teardown requests are queued here and drained by the worker
//! pool. Callers keep the returned [`TaskId`] and poll
//! [`TaskQueue::status`] until the task reaches a terminal state.
//!
//! Each task claims [`FlightKey`]s for the bot it touches. While a task is
//! queued or running, another submission claiming one of its keys is
//! rejected, so two tasks never race on the same function or stored
//! configuration. Finished statuses are dropped after a retention period.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::botconfig::extract_bot_name;
use crate::error::{ControlError, ControlResult};
use crate::naming::function_name;
use crate::types::{
    DeployOutput, DeploymentId, DeploymentRequest, OperationOutcome, TeardownOutput, UserId,
};

/// Unique identifier for a queued task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique task ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work to perform.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Deploy a bot.
    Deploy {
        /// Owning user.
        user_id: UserId,
        /// What to deploy.
        request: DeploymentRequest,
    },
    /// Tear down a deployment.
    Teardown {
        /// Owning user.
        user_id: UserId,
        /// Deployment to remove.
        deployment_id: DeploymentId,
        /// Function recorded on the deployment.
        function_name: String,
    },
}

impl TaskKind {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Deploy { .. } => "deploy",
            Self::Teardown { .. } => "teardown",
        }
    }

    /// Keys this task holds while queued or running.
    ///
    /// A deploy whose config cannot be read claims no function key; it
    /// fails before touching anything.
    #[must_use]
    pub fn flight_keys(&self) -> Vec<FlightKey> {
        match self {
            Self::Deploy { user_id, request } => {
                let bot_name = match &request.display_name {
                    Some(name) => Some(name.clone()),
                    None => extract_bot_name(&request.config, *user_id).ok(),
                };
                let function = bot_name.map(|name| FlightKey::Function {
                    user_id: *user_id,
                    function_name: function_name(*user_id, &name),
                });
                let config = request.config_ref.as_ref().map(|config_ref| FlightKey::Config {
                    user_id: *user_id,
                    config_ref: config_ref.clone(),
                });
                function.into_iter().chain(config).collect()
            }
            Self::Teardown {
                user_id,
                function_name,
                ..
            } => vec![FlightKey::Function {
                user_id: *user_id,
                function_name: function_name.clone(),
            }],
        }
    }
}

/// Identity a queued or running task holds exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlightKey {
    /// A user's compute function.
    Function {
        /// Owning user.
        user_id: UserId,
        /// Function name.
        function_name: String,
    },
    /// A user's stored configuration.
    Config {
        /// Owning user.
        user_id: UserId,
        /// Configuration reference.
        config_ref: String,
    },
}

impl fmt::Display for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function { function_name, .. } => write!(f, "function {function_name}"),
            Self::Config {
                user_id,
                config_ref,
            } => write!(f, "config {config_ref} of user {user_id}"),
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task identifier.
    pub id: TaskId,
    /// What to do.
    pub kind: TaskKind,
}

/// Payload of a completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    /// A deploy completed.
    Deploy(DeployOutput),
    /// A teardown completed.
    Teardown(TeardownOutput),
}

/// Status of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Queued,
    /// A worker is running it.
    Running,
    /// Finished successfully.
    Completed {
        /// Task payload.
        result: TaskResult,
    },
    /// Finished with an error.
    Failed {
        /// Human-readable reason.
        error: String,
    },
}

impl TaskStatus {
    /// Returns true if the task will not change state again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Status reached by a finished deploy.
    #[must_use]
    pub fn from_deploy(outcome: OperationOutcome<DeployOutput>) -> Self {
        match outcome {
            OperationOutcome::Completed(output) => Self::Completed {
                result: TaskResult::Deploy(output),
            },
            OperationOutcome::Failed { error } => Self::Failed { error },
        }
    }

    /// Status reached by a finished teardown.
    #[must_use]
    pub fn from_teardown(outcome: OperationOutcome<TeardownOutput>) -> Self {
        match outcome {
            OperationOutcome::Completed(output) => Self::Completed {
                result: TaskResult::Teardown(output),
            },
            OperationOutcome::Failed { error } => Self::Failed { error },
        }
    }
}

/// How long finished statuses stay pollable unless configured otherwise.
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(3600);

/// Queue of pending tasks plus the status of every recent task.
pub struct TaskQueue {
    pending: RwLock<VecDeque<Task>>,
    statuses: DashMap<TaskId, TaskStatus>,
    in_flight: DashMap<FlightKey, TaskId>,
    finished: DashMap<TaskId, Instant>,
    max_queue_size: usize,
    retention: Duration,
    notify: Notify,
}

impl TaskQueue {
    /// Create a new task queue with the specified maximum size.
    #[must_use]
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            pending: RwLock::new(VecDeque::new()),
            statuses: DashMap::new(),
            in_flight: DashMap::new(),
            finished: DashMap::new(),
            max_queue_size,
            retention: DEFAULT_TASK_RETENTION,
            notify: Notify::new(),
        }
    }

    /// Keep finished statuses for `retention` instead of the default.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Submit work to the queue.
    ///
    /// Returns [`ControlError::QueueFull`] when the queue is at capacity,
    /// and [`ControlError::OperationInFlight`] when a queued or running
    /// task already holds one of this task's [`FlightKey`]s.
    pub async fn submit(&self, kind: TaskKind) -> ControlResult<TaskId> {
        self.evict_finished();

        let id = TaskId::generate();
        let name = kind.name();
        let keys = kind.flight_keys();

        {
            let mut pending = self.pending.write().await;
            if pending.len() >= self.max_queue_size {
                return Err(ControlError::QueueFull);
            }
            for key in &keys {
                if let Some(holder) = self.in_flight.get(key) {
                    debug!(key = %key, task_id = %holder.value(), "identity already in flight");
                    return Err(ControlError::OperationInFlight {
                        key: key.to_string(),
                        task_id: holder.value().to_string(),
                    });
                }
            }
            for key in keys {
                self.in_flight.insert(key, id.clone());
            }
            self.statuses.insert(id.clone(), TaskStatus::Queued);
            pending.push_back(Task {
                id: id.clone(),
                kind,
            });
        }

        self.notify.notify_one();

        info!(task_id = %id, kind = name, "task queued");
        Ok(id)
    }

    /// Get the next task, waiting until one is available.
    ///
    /// The task is marked running before it is returned.
    pub async fn next(&self) -> Task {
        loop {
            if let Some(task) = self.try_next().await {
                return task;
            }
            self.notify.notified().await;
        }
    }

    /// Get the next task without waiting.
    ///
    /// Returns `None` if the queue is empty.
    pub async fn try_next(&self) -> Option<Task> {
        let mut pending = self.pending.write().await;
        let task = pending.pop_front()?;
        self.statuses.insert(task.id.clone(), TaskStatus::Running);
        debug!(task_id = %task.id, "task dequeued");
        Some(task)
    }

    /// Update the status of a task.
    ///
    /// A terminal status releases the task's flight keys and starts its
    /// retention period.
    pub fn update_status(&self, id: &TaskId, status: TaskStatus) {
        let terminal = status.is_terminal();
        self.statuses.insert(id.clone(), status);
        if terminal {
            self.in_flight.retain(|_, holder| holder != id);
            self.finished.insert(id.clone(), Instant::now());
        }
    }

    /// Drop statuses of tasks that finished longer ago than the retention
    /// period. Returns how many were dropped.
    pub fn evict_finished(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.finished.retain(|id, finished_at| {
            if now.duration_since(*finished_at) < self.retention {
                return true;
            }
            self.statuses.remove(id);
            evicted += 1;
            false
        });
        if evicted > 0 {
            debug!(evicted, "evicted finished task statuses");
        }
        evicted
    }

    /// Get the current status of a task.
    #[must_use]
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.statuses.get(id).map(|s| s.clone())
    }

    /// Get the number of pending tasks.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("tracked", &self.statuses.len())
            .field("in_flight", &self.in_flight.len())
            .field("max_queue_size", &self.max_queue_size)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn deploy(user: u64) -> TaskKind {
        deploy_bot(user, "support", None)
    }

    fn deploy_bot(user: u64, bot: &str, config_ref: Option<&str>) -> TaskKind {
        let mut request = DeploymentRequest::new(format!("bot_name: {bot}\n").into_bytes());
        if let Some(config_ref) = config_ref {
            request = request.with_config_ref(config_ref);
        }
        TaskKind::Deploy {
            user_id: UserId::new(user),
            request,
        }
    }

    fn teardown(user: u64, function_name: &str) -> TaskKind {
        TaskKind::Teardown {
            user_id: UserId::new(user),
            deployment_id: DeploymentId::generate(),
            function_name: function_name.to_owned(),
        }
    }

    fn finish(queue: &TaskQueue, id: &TaskId) {
        queue.update_status(id, TaskStatus::Failed { error: "boom".to_owned() });
    }

    #[tokio::test]
    async fn submit_and_take_in_order() {
        let queue = TaskQueue::new(10);
        let first = queue.submit(deploy(1)).await.unwrap();
        let second = queue.submit(deploy(2)).await.unwrap();

        assert_eq!(queue.status(&first), Some(TaskStatus::Queued));
        assert_eq!(queue.pending_count().await, 2);

        let task = queue.try_next().await.unwrap();
        assert_eq!(task.id, first);
        assert_eq!(queue.status(&first), Some(TaskStatus::Running));
        assert_eq!(queue.status(&second), Some(TaskStatus::Queued));
    }

    #[tokio::test]
    async fn full_queue_rejects_submissions() {
        let queue = TaskQueue::new(1);
        queue.submit(deploy(1)).await.unwrap();

        let err = queue.submit(deploy(2)).await.unwrap_err();
        assert!(matches!(err, ControlError::QueueFull));
    }

    #[tokio::test]
    async fn next_waits_for_submission() {
        let queue = Arc::new(TaskQueue::new(10));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = queue.submit(deploy(1)).await.unwrap();

        let task = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.id, id);
    }

    #[test]
    fn terminal_statuses_serialise_with_state_tag() {
        let failed = TaskStatus::from_teardown(OperationOutcome::failed("boom"));
        assert!(failed.is_terminal());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "boom");

        let done = TaskStatus::from_teardown(OperationOutcome::Completed(TeardownOutput {
            message: "Teardown successful".to_owned(),
        }));
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["result"]["kind"], "teardown");
        assert_eq!(json["result"]["message"], "Teardown successful");
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[tokio::test]
    async fn same_config_ref_is_rejected_while_in_flight() {
        let queue = TaskQueue::new(10);
        let first = queue
            .submit(deploy_bot(7, "support", Some("configs/7/support.yaml")))
            .await
            .unwrap();

        let err = queue
            .submit(deploy_bot(7, "helpdesk", Some("configs/7/support.yaml")))
            .await
            .unwrap_err();
        let ControlError::OperationInFlight { key, task_id } = err else {
            panic!("expected in-flight rejection");
        };
        assert_eq!(key, "config configs/7/support.yaml of user 7");
        assert_eq!(task_id, first.as_str());

        // Still held while running.
        queue.try_next().await.unwrap();
        assert!(queue
            .submit(deploy_bot(7, "helpdesk", Some("configs/7/support.yaml")))
            .await
            .is_err());

        finish(&queue, &first);
        queue
            .submit(deploy_bot(7, "helpdesk", Some("configs/7/support.yaml")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn same_function_is_rejected_while_in_flight() {
        let queue = TaskQueue::new(10);
        queue.submit(deploy_bot(7, "my bot", None)).await.unwrap();

        // Sanitizes to the same function.
        let err = queue.submit(deploy_bot(7, "mybot", None)).await.unwrap_err();
        assert!(matches!(err, ControlError::OperationInFlight { .. }));

        let err = queue
            .submit(teardown(7, "user-app-7-mybot"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("function user-app-7-mybot"));
        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn different_bots_run_side_by_side() {
        let queue = TaskQueue::new(10);
        queue.submit(deploy_bot(7, "support", None)).await.unwrap();
        queue.submit(deploy_bot(7, "sales", None)).await.unwrap();
        queue.submit(deploy_bot(8, "support", None)).await.unwrap();
        queue.submit(teardown(7, "user-app-7-helpdesk")).await.unwrap();

        assert_eq!(queue.pending_count().await, 4);
    }

    #[tokio::test]
    async fn unreadable_config_claims_no_function() {
        let queue = TaskQueue::new(10);
        let kind = TaskKind::Deploy {
            user_id: UserId::new(7),
            request: DeploymentRequest::new(b"- a\n- list\n".to_vec()),
        };

        assert!(kind.flight_keys().is_empty());
        queue.submit(kind.clone()).await.unwrap();
        queue.submit(kind).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn finished_statuses_are_evicted_after_retention() {
        let queue = TaskQueue::new(10).with_retention(Duration::from_secs(60));
        let done = queue.submit(deploy(1)).await.unwrap();
        let running = queue.submit(deploy(2)).await.unwrap();
        queue.try_next().await.unwrap();
        queue.try_next().await.unwrap();
        finish(&queue, &done);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(queue.evict_finished(), 0);
        assert!(queue.status(&done).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(queue.evict_finished(), 1);
        assert_eq!(queue.status(&done), None);
        assert_eq!(queue.status(&running), Some(TaskStatus::Running));
    }
}
