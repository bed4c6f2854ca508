mod task_manager;
mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use tracing::{info, warn, error};

pub use task_manager::{CleanupStats, TaskManager, TaskStats};
use worker::TaskWorker;
use crate::schedule::processors::TaskProcessor;
use crate::schedule::types::{DownloadJob, Task, TaskStatus, TaskUpdate};

/// How long `cancel` waits for a running job to wind down.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// Upper bound for one extractor run; `None` lets it run as long as it takes.
    pub download_timeout: Option<Duration>,
    /// Finished tasks older than this are swept; `None` keeps them forever.
    pub retention: Option<Duration>,
    pub cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            download_timeout: Some(Duration::from_secs(3600)),
            retention: Some(Duration::from_secs(24 * 3600)),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

struct JobEntry {
    token: CancellationToken,
    running: bool,
}

/// Cancellation tokens of queued and running jobs.
#[derive(Default)]
pub(crate) struct JobRegistry {
    jobs: StdMutex<HashMap<String, JobEntry>>,
    finished: Notify,
}

impl JobRegistry {
    fn register(&self, task_id: &str) {
        if let Ok(mut jobs) = self.jobs.lock() {
            let entry = JobEntry {
                token: CancellationToken::new(),
                running: false,
            };
            jobs.insert(task_id.to_string(), entry);
        }
    }

    /// Marks the job as picked up by a worker and hands out its token.
    pub(crate) fn start(&self, task_id: &str) -> Option<CancellationToken> {
        let mut jobs = self.jobs.lock().ok()?;
        let entry = jobs.get_mut(task_id)?;
        entry.running = true;
        Some(entry.token.clone())
    }

    /// Cancels the job. Returns `None` for unknown jobs, otherwise whether a
    /// worker is currently running it.
    fn cancel(&self, task_id: &str) -> Option<bool> {
        let jobs = self.jobs.lock().ok()?;
        let entry = jobs.get(task_id)?;
        entry.token.cancel();
        Some(entry.running)
    }

    fn contains(&self, task_id: &str) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.contains_key(task_id))
            .unwrap_or(false)
    }

    pub(crate) fn finish(&self, task_id: &str) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.remove(task_id);
        }
        self.finished.notify_waiters();
    }

    fn active(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }
}

/// Bounded pool of workers consuming one job queue.
pub struct TaskScheduler {
    task_manager: Arc<TaskManager>,
    processor: Arc<dyn TaskProcessor>,
    config: SchedulerConfig,
    queue_tx: mpsc::UnboundedSender<DownloadJob>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<DownloadJob>>>,
    jobs: Arc<JobRegistry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(task_manager: Arc<TaskManager>, processor: Arc<dyn TaskProcessor>, config: SchedulerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            task_manager,
            processor,
            config,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            jobs: Arc::new(JobRegistry::default()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    /// Starts the configured number of workers.
    pub async fn spawn_workers(&self) {
        let count = self.config.workers.max(1);
        let mut workers = self.workers.lock().await;
        for id in 0..count {
            let worker = TaskWorker::new(
                id,
                self.task_manager.clone(),
                self.processor.clone(),
                self.queue_rx.clone(),
                self.jobs.clone(),
                self.config.download_timeout,
            );
            workers.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }
        info!("Started {} download workers", count);
    }

    /// Queues a task for download. Returns immediately.
    pub fn submit(&self, task: &Task) -> Result<()> {
        let job = DownloadJob {
            task_id: task.id.clone(),
            source_url: task.source_url.clone(),
            quality: task.quality.clone(),
            output_dir: self.task_manager.layout().task_dir(&task.id),
        };

        self.jobs.register(&job.task_id);
        if let Err(e) = self.queue_tx.send(job) {
            self.jobs.finish(&task.id);
            return Err(anyhow::anyhow!("Download queue is closed: {}", e));
        }
        info!("Queued task {}", task.id);
        Ok(())
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.jobs.contains(task_id)
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.active()
    }

    /// Cancels a queued or running job. A running job is waited for (bounded)
    /// until its worker has let go of it; a queued one is skipped when a
    /// worker reaches it. Returns whether a job was found.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let running = match self.jobs.cancel(task_id) {
            Some(running) => running,
            None => return false,
        };
        info!("Cancelling task {}", task_id);
        if !running {
            return true;
        }

        let wait = async {
            loop {
                let finished = self.jobs.finished.notified();
                tokio::pin!(finished);
                finished.as_mut().enable();
                if !self.jobs.contains(task_id) {
                    break;
                }
                finished.await;
            }
        };
        if tokio::time::timeout(CANCEL_GRACE, wait).await.is_err() {
            warn!("Task {} did not stop within {:?}", task_id, CANCEL_GRACE);
        }
        true
    }

    /// Picks up where a previous process left off: pending tasks are queued
    /// again, tasks that were mid-flight are marked failed.
    pub async fn recover(&self) -> Result<()> {
        for task in self.task_manager.list_tasks().await {
            match task.status {
                TaskStatus::Pending => self.submit(&task)?,
                TaskStatus::Starting | TaskStatus::Downloading | TaskStatus::Converting => {
                    warn!("Task {} was interrupted while {}", task.id, task.status);
                    if let Err(e) = self
                        .task_manager
                        .update_task(&task.id, TaskUpdate::failed("Task was interrupted by a server restart"))
                        .await
                    {
                        error!("Failed to mark task {} as failed: {}", task.id, e);
                    }
                }
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<()> {
        // periodic sweep of expired tasks
        if let Some(retention) = self.config.retention {
            let tm = self.task_manager.clone();
            let interval = self.config.cleanup_interval;
            let retention = chrono::Duration::from_std(retention)?;
            tokio::spawn(async move {
                loop {
                    tm.cleanup_tasks(retention).await;
                    tokio::time::sleep(interval).await;
                }
            });
        }

        // wait for all workers to finish
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            worker.await?;
        }

        Ok(())
    }
}
