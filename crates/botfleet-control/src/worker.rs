//! Background task worker.
//!
//! Processes deploy and teardown tasks from the queue.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::deployment::DeploymentManager;
use crate::queue::{Task, TaskKind, TaskQueue, TaskStatus};

/// Worker that drains the task queue.
pub struct TaskWorker {
    id: usize,
    queue: Arc<TaskQueue>,
    manager: Arc<DeploymentManager>,
}

impl TaskWorker {
    /// Create a new worker.
    #[must_use]
    pub fn new(id: usize, queue: Arc<TaskQueue>, manager: Arc<DeploymentManager>) -> Self {
        Self { id, queue, manager }
    }

    /// Run the worker loop until the cancellation token is triggered.
    ///
    /// Cancellation is only observed between tasks. A task that has
    /// started always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker_id = self.id, "task worker started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(worker_id = self.id, "task worker shutting down");
                    break;
                }

                task = self.queue.next() => {
                    self.process(task).await;
                }
            }
        }

        info!(worker_id = self.id, "task worker stopped");
    }

    /// Run one task and record its final status.
    pub async fn process(&self, task: Task) {
        info!(worker_id = self.id, task_id = %task.id, kind = task.kind.name(), "starting task");

        let status = match &task.kind {
            TaskKind::Deploy { user_id, request } => {
                TaskStatus::from_deploy(self.manager.deploy(*user_id, request).await)
            }
            TaskKind::Teardown {
                user_id,
                deployment_id,
                ..
            } => TaskStatus::from_teardown(self.manager.teardown(*user_id, deployment_id).await),
        };

        match &status {
            TaskStatus::Failed { error } => {
                error!(worker_id = self.id, task_id = %task.id, error = %error, "task failed");
            }
            _ => info!(worker_id = self.id, task_id = %task.id, "task completed"),
        }

        self.queue.update_status(&task.id, status);
    }
}
