use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use tracing::{info, error, debug, warn};

use crate::schedule::processors::TaskProcessor;
use crate::schedule::types::{DownloadJob, TaskStatus, TaskUpdate};
use super::{JobRegistry, TaskManager};

pub struct TaskWorker {
    id: usize,
    task_manager: Arc<TaskManager>,
    processor: Arc<dyn TaskProcessor>,
    // shared by every worker of the pool
    queue: Arc<Mutex<mpsc::UnboundedReceiver<DownloadJob>>>,
    jobs: Arc<JobRegistry>,
    timeout: Option<Duration>,
}

enum Outcome {
    Done(anyhow::Result<TaskUpdate>),
    TimedOut(Duration),
    Cancelled,
}

impl TaskWorker {
    pub(crate) fn new(
        id: usize,
        task_manager: Arc<TaskManager>,
        processor: Arc<dyn TaskProcessor>,
        queue: Arc<Mutex<mpsc::UnboundedReceiver<DownloadJob>>>,
        jobs: Arc<JobRegistry>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            task_manager,
            processor,
            queue,
            jobs,
            timeout,
        }
    }

    pub async fn run(&self) {
        loop {
            let job = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            let Some(job) = job else {
                debug!("Worker {} stopping, queue closed", self.id);
                break;
            };

            self.process_job(&job).await;
            self.jobs.finish(&job.task_id);
        }
    }

    async fn process_job(&self, job: &DownloadJob) {
        let Some(token) = self.jobs.start(&job.task_id) else {
            return;
        };
        if token.is_cancelled() {
            debug!("Skipping cancelled task {}", job.task_id);
            return;
        }

        // the task may have been deleted while it was queued
        if let Err(e) = self
            .task_manager
            .update_task(&job.task_id, TaskUpdate::status(TaskStatus::Starting))
            .await
        {
            debug!("Not starting task {}: {}", job.task_id, e);
            return;
        }

        info!("Worker {} processing task {}", self.id, job.task_id);

        let outcome = tokio::select! {
            _ = token.cancelled() => Outcome::Cancelled,
            outcome = self.run_processor(job) => outcome,
        };

        let update = match outcome {
            Outcome::Done(Ok(update)) => update,
            Outcome::Done(Err(e)) => {
                error!("Failed to process task {}: {:#}", job.task_id, e);
                self.cleanup(job).await;
                TaskUpdate::failed(e.to_string())
            }
            Outcome::TimedOut(limit) => {
                warn!("Task {} timed out after {:?}", job.task_id, limit);
                self.cleanup(job).await;
                TaskUpdate::failed(format!("Download timed out after {} seconds", limit.as_secs()))
            }
            Outcome::Cancelled => {
                info!("Task {} cancelled", job.task_id);
                self.cleanup(job).await;
                TaskUpdate::failed("Download was cancelled")
            }
        };

        // a progress error event may already have failed the task
        match self.task_manager.update_task(&job.task_id, update.clone()).await {
            Ok(task) => info!("Task {} finished as {}", task.id, task.status),
            Err(e) => {
                debug!("Final update for task {} dropped: {}", job.task_id, e);
                if update.status == Some(TaskStatus::Completed) {
                    if let Err(e) = self.processor.discard(job, &update).await {
                        warn!("Failed to discard output of task {}: {}", job.task_id, e);
                    }
                }
            }
        }
    }

    async fn run_processor(&self, job: &DownloadJob) -> Outcome {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.processor.process(job)).await {
                Ok(result) => Outcome::Done(result),
                Err(_) => Outcome::TimedOut(limit),
            },
            None => Outcome::Done(self.processor.process(job).await),
        }
    }

    async fn cleanup(&self, job: &DownloadJob) {
        if let Err(e) = self.processor.cleanup(job).await {
            warn!("Failed to clean up after task {}: {}", job.task_id, e);
        }
    }
}
