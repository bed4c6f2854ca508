use std::sync::Arc;

pub mod types;
pub mod error;
pub mod processors;
pub mod scheduler;
pub mod callback;
#[cfg(test)]
mod tests;

pub use types::{Task, TaskStatus, TaskUpdate, DownloadJob, DownloadLayout};
pub use error::StoreError;

pub use crate::storage::task::TaskStorage;

pub use callback::{ProgressCallback, ProgressEvent, ProgressRelay};
pub use processors::{AudioProcessor, TaskProcessor};
pub use scheduler::{SchedulerConfig, TaskManager, TaskScheduler};

use crate::extractor::Extractor;

/// Wires the registry, the audio processor and a scheduler together.
/// Workers are not started yet.
pub fn create_scheduler(
    task_manager: Arc<TaskManager>,
    extractor: Arc<dyn Extractor>,
    config: SchedulerConfig,
) -> TaskScheduler {
    let processor = Arc::new(AudioProcessor::new(extractor, task_manager.clone()));
    TaskScheduler::new(task_manager, processor, config)
}
