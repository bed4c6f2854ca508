use async_trait::async_trait;
use anyhow::Result;
use crate::schedule::types::Task;

pub mod file;
pub mod memory;

pub use file::FileTaskStorage;
pub use memory::InMemoryTaskStorage;

/// Durable mirror of the task registry: one record per task id.
#[async_trait]
pub trait TaskStorage: Send + Sync + 'static {
    /// Writes (or overwrites) the record for `task.id`.
    async fn save(&self, task: &Task) -> Result<()>;
    /// Removes the record. Removing a missing record is not an error.
    async fn remove(&self, task_id: &str) -> Result<()>;
    /// Loads every readable record. Records that cannot be parsed are logged
    /// and skipped.
    async fn load_all(&self) -> Result<Vec<Task>>;
}
