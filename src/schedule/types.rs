use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Starting,
    Downloading,
    Converting,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Starting => 1,
            TaskStatus::Downloading => 2,
            TaskStatus::Converting => 3,
            TaskStatus::Completed | TaskStatus::Failed => 4,
        }
    }

    /// Statuses only move forward. Staying in the same non-terminal status is
    /// allowed (repeated progress events), terminal statuses accept nothing.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == TaskStatus::Failed || next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Starting => "starting",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Converting => "converting",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;
    fn try_from(status: String) -> Result<Self, Self::Error> {
        match status.as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "starting" => Ok(TaskStatus::Starting),
            "downloading" => Ok(TaskStatus::Downloading),
            "converting" => Ok(TaskStatus::Converting),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", status)),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One requested conversion job. This is also the persisted document, so
/// optional fields are omitted when unset and the shape follows the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub source_url: String,
    pub quality: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // only while downloading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<u64>,

    // filled in on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: String, source_url: String, quality: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_url,
            quality,
            status: TaskStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            downloaded_bytes: None,
            total_bytes: None,
            speed: None,
            eta: None,
            output_file: None,
            title: None,
            duration: None,
            video_id: None,
            file_size: None,
            error: None,
        }
    }

    /// Merges the supplied fields. The caller is responsible for checking the
    /// status transition first.
    pub fn apply(&mut self, update: TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if update.downloaded_bytes.is_some() {
            self.downloaded_bytes = update.downloaded_bytes;
        }
        if update.total_bytes.is_some() {
            self.total_bytes = update.total_bytes;
        }
        if update.speed.is_some() {
            self.speed = update.speed;
        }
        if update.eta.is_some() {
            self.eta = update.eta;
        }
        if update.output_file.is_some() {
            self.output_file = update.output_file;
        }
        if update.title.is_some() {
            self.title = update.title;
        }
        if update.duration.is_some() {
            self.duration = update.duration;
        }
        if update.video_id.is_some() {
            self.video_id = update.video_id;
        }
        if update.file_size.is_some() {
            self.file_size = update.file_size;
        }
        if update.error.is_some() {
            self.error = update.error;
        }

        // transfer counters are meaningless outside of the download phase
        if self.status != TaskStatus::Downloading {
            self.downloaded_bytes = None;
            self.total_bytes = None;
            self.speed = None;
            self.eta = None;
        }
        if self.status != TaskStatus::Completed {
            self.output_file = None;
        }
        if self.status != TaskStatus::Failed {
            self.error = None;
        }
    }
}

/// Partial set of task fields merged by `TaskManager::update_task`.
/// `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed: Option<f64>,
    pub eta: Option<u64>,
    pub output_file: Option<PathBuf>,
    pub title: Option<String>,
    pub duration: Option<u64>,
    pub video_id: Option<String>,
    pub file_size: Option<u64>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Everything a worker needs to run one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub task_id: String,
    pub source_url: String,
    pub quality: String,
    pub output_dir: PathBuf,
}

/// Where artifacts land: either one shared directory or a subdirectory per task.
#[derive(Debug, Clone)]
pub struct DownloadLayout {
    pub root: PathBuf,
    pub per_task_dir: bool,
}

impl DownloadLayout {
    pub fn new(root: impl Into<PathBuf>, per_task_dir: bool) -> Self {
        Self {
            root: root.into(),
            per_task_dir,
        }
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        if self.per_task_dir {
            self.root.join(task_id)
        } else {
            self.root.clone()
        }
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status")
    }
}
