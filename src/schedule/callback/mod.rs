use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schedule::scheduler::TaskManager;
use crate::schedule::types::{TaskStatus, TaskUpdate};

/// Progress placeholder shown while the tool post-processes; transcoding
/// progress is not observable.
pub const CONVERTING_PROGRESS: u8 = 95;

/// Highest progress a download can report, leaving room for `CONVERTING_PROGRESS`.
pub const MAX_DOWNLOAD_PROGRESS: u8 = CONVERTING_PROGRESS - 1;

/// What an extractor reports while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ProgressEvent {
    Downloading {
        downloaded_bytes: u64,
        /// Exact size, or the tool's estimate when the exact size is unknown.
        total_bytes: Option<u64>,
        speed: Option<f64>,
        eta: Option<u64>,
    },
    /// The download phase is over and post-processing is about to start.
    Finished { filename: Option<String> },
    Error { message: String },
}

/// Narrow boundary through which an extractor reports progress.
#[async_trait]
pub trait ProgressCallback: Send + Sync {
    async fn on_progress(&self, event: ProgressEvent);
}

/// Feeds progress events of one task into the task registry.
#[derive(Clone)]
pub struct ProgressRelay {
    task_manager: Arc<TaskManager>,
    task_id: String,
}

impl ProgressRelay {
    pub fn new(task_manager: Arc<TaskManager>, task_id: impl Into<String>) -> Self {
        Self {
            task_manager,
            task_id: task_id.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Maps an event onto a registry update. Events that carry nothing usable
    /// (unknown total size) map to `None`.
    pub fn update_for(event: ProgressEvent) -> Option<TaskUpdate> {
        match event {
            ProgressEvent::Downloading { downloaded_bytes, total_bytes, speed, eta } => {
                let total = total_bytes.filter(|t| *t > 0)?;
                let percent = (downloaded_bytes.saturating_mul(100) / total).min(MAX_DOWNLOAD_PROGRESS as u64);
                Some(TaskUpdate {
                    status: Some(TaskStatus::Downloading),
                    progress: Some(percent as u8),
                    downloaded_bytes: Some(downloaded_bytes),
                    total_bytes: Some(total),
                    speed,
                    eta,
                    ..Default::default()
                })
            }
            ProgressEvent::Finished { .. } => {
                Some(TaskUpdate::status(TaskStatus::Converting).with_progress(CONVERTING_PROGRESS))
            }
            ProgressEvent::Error { message } => {
                let message = if message.trim().is_empty() {
                    "Unknown error during download".to_string()
                } else {
                    message
                };
                Some(TaskUpdate::failed(message))
            }
        }
    }
}

#[async_trait]
impl ProgressCallback for ProgressRelay {
    async fn on_progress(&self, event: ProgressEvent) {
        if let ProgressEvent::Finished { filename: Some(ref filename) } = event {
            debug!("Task {} finished downloading {}", self.task_id, filename);
        }

        let Some(update) = Self::update_for(event) else {
            return;
        };

        // the task may have been deleted or finished already; late events are expected
        if let Err(e) = self.task_manager.update_task(&self.task_id, update).await {
            debug!("Ignoring progress for task {}: {}", self.task_id, e);
        }
    }
}

/// Records every event it receives.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingCallback {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl ProgressCallback for RecordingCallback {
    async fn on_progress(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
