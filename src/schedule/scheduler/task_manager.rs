use std::sync::Arc;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tokio::fs;
use anyhow::Result;
use uuid::Uuid;
use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};
use serde::{Serialize, Deserialize};

use crate::schedule::error::StoreError;
use crate::schedule::processors::audio::info_file_path;
use crate::schedule::types::{DownloadLayout, Task, TaskStatus, TaskUpdate};
use crate::storage::task::TaskStorage;

/// The task registry.
///
/// Every operation takes the same store-wide lock and, for mutations, writes
/// the record through `storage` before releasing it, so memory and disk agree
/// for any single task. Persistence failures are logged and never undo the
/// in-memory change.
pub struct TaskManager {
    storage: Arc<dyn TaskStorage>,
    layout: DownloadLayout,
    tasks: Mutex<HashMap<String, Task>>,
}

impl TaskManager {
    pub fn new(storage: Arc<dyn TaskStorage>, layout: DownloadLayout) -> Self {
        Self {
            storage,
            layout,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn TaskStorage> {
        &self.storage
    }

    pub fn layout(&self) -> &DownloadLayout {
        &self.layout
    }

    /// Rebuilds the registry from persisted records. A completed task whose
    /// artifact is gone is downgraded to failed.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.storage.load_all().await?;
        let mut tasks = self.tasks.lock().await;
        let mut restored = 0;

        for mut task in records {
            if task.status == TaskStatus::Completed && !artifact_exists(task.output_file.as_deref()).await {
                warn!("Output file of completed task {} is missing, marking it failed", task.id);
                task.status = TaskStatus::Failed;
                task.output_file = None;
                task.error = Some("Output file is missing".to_string());
                touch(&mut task);
                self.persist(&task).await;
            }

            debug!("Restored task {}: {}", task.id, task.status);
            tasks.insert(task.id.clone(), task);
            restored += 1;
        }

        info!("Restored {} tasks from storage", restored);
        Ok(restored)
    }

    pub async fn create_task(&self, source_url: &str, quality: &str) -> Task {
        let mut tasks = self.tasks.lock().await;

        let mut id = Uuid::new_v4().to_string();
        while tasks.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }

        let task = Task::new(id, source_url.to_string(), quality.to_string());
        tasks.insert(task.id.clone(), task.clone());
        self.persist(&task).await;

        info!("Created task {} for {}", task.id, task.source_url);
        task
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    /// Merges `update` into the task and returns the new snapshot.
    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;

        let next = update.status.unwrap_or(task.status);
        if !task.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: task_id.to_string(),
                from: task.status,
                to: next,
            });
        }

        task.apply(update);
        touch(task);
        let snapshot = task.clone();
        self.persist(&snapshot).await;

        Ok(snapshot)
    }

    /// Removes the task, its record and its artifacts. Returns whether the
    /// task existed.
    pub async fn delete_task(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        let task = match tasks.remove(task_id) {
            Some(task) => task,
            None => return false,
        };

        if let Err(e) = self.storage.remove(task_id).await {
            error!("Failed to delete status record for task {}: {}", task_id, e);
        }

        if let Some(output_file) = &task.output_file {
            remove_file_if_exists(output_file).await;
            remove_file_if_exists(&info_file_path(output_file)).await;
        }

        if self.layout.per_task_dir {
            let dir = self.layout.task_dir(task_id);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Removed download directory {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("Failed to remove download directory {}: {}", dir.display(), e),
            }
        }

        info!("Deleted task {}", task_id);
        true
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        let tasks = self.tasks.lock().await;
        let mut list: Vec<Task> = tasks.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub async fn task_stats(&self) -> TaskStats {
        let tasks = self.tasks.lock().await;
        let mut stats = TaskStats::default();

        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Starting => stats.starting += 1,
                TaskStatus::Downloading => stats.downloading += 1,
                TaskStatus::Converting => stats.converting += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats.total = tasks.len();

        stats
    }

    /// Deletes finished tasks that have not changed for longer than `retention`.
    pub async fn cleanup_tasks(&self, retention: Duration) -> CleanupStats {
        let cutoff = Utc::now() - retention;
        let expired: Vec<(String, TaskStatus)> = {
            let tasks = self.tasks.lock().await;
            tasks
                .values()
                .filter(|t| t.status.is_terminal() && t.updated_at < cutoff)
                .map(|t| (t.id.clone(), t.status))
                .collect()
        };

        let mut stats = CleanupStats::default();
        for (task_id, status) in expired {
            if self.delete_task(&task_id).await {
                match status {
                    TaskStatus::Completed => stats.completed += 1,
                    _ => stats.failed += 1,
                }
            }
        }

        if stats.completed + stats.failed > 0 {
            info!("Cleaned up {} completed and {} failed tasks", stats.completed, stats.failed);
        }
        stats
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.storage.save(task).await {
            error!("Failed to save task status for {}: {}", task.id, e);
        }
    }
}

/// Refreshes `updated_at`, keeping it strictly increasing even when the clock
/// does not advance between two mutations.
fn touch(task: &mut Task) {
    let now = Utc::now();
    task.updated_at = if now > task.updated_at {
        now
    } else {
        task.updated_at + Duration::microseconds(1)
    };
}

async fn artifact_exists(path: Option<&Path>) -> bool {
    match path {
        Some(path) => fs::try_exists(path).await.unwrap_or(false),
        None => false,
    }
}

async fn remove_file_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to delete {}: {}", path.display(), e),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub pending: usize,
    pub starting: usize,
    pub downloading: usize,
    pub converting: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub completed: u64,
    pub failed: u64,
}
