use async_trait::async_trait;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};

use super::TaskStorage;
use crate::schedule::types::Task;

/// Stores each task as `<dir>/<task_id>.json`.
pub struct FileTaskStorage {
    dir: PathBuf,
}

impl FileTaskStorage {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        info!("Initializing file task storage at {}", dir.display());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create status directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    async fn read_record(path: &Path) -> Result<Task> {
        let bytes = fs::read(path).await?;
        let task = serde_json::from_slice(&bytes)?;
        Ok(task)
    }
}

#[async_trait]
impl TaskStorage for FileTaskStorage {
    async fn save(&self, task: &Task) -> Result<()> {
        let path = self.record_path(&task.id);
        let tmp = self.dir.join(format!("{}.json.tmp", task.id));
        let bytes = serde_json::to_vec(task)?;

        // write-then-rename so a crash never leaves a half written record
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move record into place at {}", path.display()))?;
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> Result<()> {
        let path = self.record_path(task_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    async fn load_all(&self) -> Result<Vec<Task>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut tasks = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(task) => {
                    debug!("Loaded task record {}", path.display());
                    tasks.push(task);
                }
                Err(e) => error!("Failed to restore task from {}: {}", path.display(), e),
            }
        }

        Ok(tasks)
    }
}
