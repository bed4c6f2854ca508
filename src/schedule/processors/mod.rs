pub mod audio;

use async_trait::async_trait;
use anyhow::Result;
use crate::schedule::types::{DownloadJob, TaskUpdate};

pub use audio::AudioProcessor;

#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Runs one job to completion and returns the update that marks it completed.
    async fn process(&self, job: &DownloadJob) -> Result<TaskUpdate>;
    /// Removes leftovers of a job that did not complete.
    async fn cleanup(&self, job: &DownloadJob) -> Result<()>;
    /// Removes the output of a job whose completion the registry refused,
    /// e.g. because an error event already failed the task.
    async fn discard(&self, job: &DownloadJob, update: &TaskUpdate) -> Result<()>;
}
