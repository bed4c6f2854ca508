use super::*;
use crate::extractor::{Dependency, ExtractRequest, ExtractedMedia, Extractor};
use crate::storage::task::InMemoryTaskStorage;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=AAAAAAAAAAA";

/// Storage that remembers every status it was asked to persist.
#[derive(Default)]
struct RecordingStorage {
    inner: InMemoryTaskStorage,
    saved: StdMutex<Vec<(String, TaskStatus, u8)>>,
}

impl RecordingStorage {
    fn history(&self, task_id: &str) -> Vec<(TaskStatus, u8)> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == task_id)
            .map(|(_, status, progress)| (*status, *progress))
            .collect()
    }
}

#[async_trait]
impl TaskStorage for RecordingStorage {
    async fn save(&self, task: &Task) -> Result<()> {
        self.saved
            .lock()
            .unwrap()
            .push((task.id.clone(), task.status, task.progress));
        self.inner.save(task).await
    }

    async fn remove(&self, task_id: &str) -> Result<()> {
        self.inner.remove(task_id).await
    }

    async fn load_all(&self) -> Result<Vec<Task>> {
        self.inner.load_all().await
    }
}

enum Behaviour {
    /// Reports progress and writes `<stem>.mp3`.
    Succeed,
    /// Writes an artifact under an unexpected name and reports no path.
    OddName,
    /// Reports an error event and fails.
    Fail,
    /// Leaves a partial file behind and never finishes on its own.
    Hang,
    /// Reports an error event, yet still writes `<stem>.mp3` and returns `Ok`.
    ErrorThenOk,
}

struct FakeExtractor {
    behaviour: Behaviour,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeExtractor {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn name(&self) -> &str {
        "fake"
    }

    async fn extract(&self, request: &ExtractRequest, progress: &dyn ProgressCallback) -> Result<ExtractedMedia> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = match self.behaviour {
            Behaviour::Succeed | Behaviour::OddName => {
                for downloaded in [250u64, 500, 1000] {
                    progress
                        .on_progress(ProgressEvent::Downloading {
                            downloaded_bytes: downloaded,
                            total_bytes: Some(1000),
                            speed: Some(2048.0),
                            eta: Some(1),
                        })
                        .await;
                    sleep(Duration::from_millis(20)).await;
                }
                progress.on_progress(ProgressEvent::Finished { filename: None }).await;

                if matches!(self.behaviour, Behaviour::Succeed) {
                    let path = request.expected_path();
                    tokio::fs::write(&path, vec![0u8; 4096]).await?;
                    Ok(ExtractedMedia {
                        id: Some(request.output_stem.clone()),
                        title: Some("Test Song".to_string()),
                        uploader: Some("Tester".to_string()),
                        duration: Some(212.6),
                        ext: Some("mp3".to_string()),
                        filepath: Some(path),
                    })
                } else {
                    let path = request.output_dir.join(format!("{}.f251.mp3", request.output_stem));
                    tokio::fs::write(&path, b"mp3").await?;
                    Ok(ExtractedMedia::default())
                }
            }
            Behaviour::Fail => {
                progress
                    .on_progress(ProgressEvent::Error { message: "Video unavailable".to_string() })
                    .await;
                Err(anyhow::anyhow!("Video unavailable"))
            }
            Behaviour::ErrorThenOk => {
                progress
                    .on_progress(ProgressEvent::Error { message: "Postprocessing failed".to_string() })
                    .await;
                let path = request.expected_path();
                tokio::fs::write(&path, b"mp3").await?;
                Ok(ExtractedMedia {
                    filepath: Some(path),
                    ..Default::default()
                })
            }
            Behaviour::Hang => {
                let partial = request.output_dir.join(format!("{}.webm.part", request.output_stem));
                tokio::fs::write(&partial, b"partial").await?;
                progress
                    .on_progress(ProgressEvent::Downloading {
                        downloaded_bytes: 1,
                        total_bytes: Some(100),
                        speed: None,
                        eta: None,
                    })
                    .await;
                sleep(Duration::from_secs(60)).await;
                Err(anyhow::anyhow!("unreachable in tests"))
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }
}

struct Harness {
    _temp_dir: TempDir,
    storage: Arc<RecordingStorage>,
    task_manager: Arc<TaskManager>,
    extractor: Arc<FakeExtractor>,
    scheduler: Arc<TaskScheduler>,
}

async fn setup(behaviour: Behaviour, config: SchedulerConfig) -> Harness {
    setup_with_layout(behaviour, config, true).await
}

async fn setup_with_layout(behaviour: Behaviour, config: SchedulerConfig, per_task_dir: bool) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(RecordingStorage::default());
    let task_manager = Arc::new(TaskManager::new(
        storage.clone(),
        DownloadLayout::new(temp_dir.path(), per_task_dir),
    ));
    let extractor = Arc::new(FakeExtractor::new(behaviour));
    let scheduler = Arc::new(create_scheduler(task_manager.clone(), extractor.clone(), config));
    scheduler.spawn_workers().await;

    Harness {
        _temp_dir: temp_dir,
        storage,
        task_manager,
        extractor,
        scheduler,
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        workers: 2,
        download_timeout: Some(Duration::from_secs(10)),
        retention: None,
        cleanup_interval: Duration::from_secs(60),
    }
}

async fn wait_for<F>(task_manager: &TaskManager, task_id: &str, predicate: F) -> Task
where
    F: Fn(&Task) -> bool,
{
    for _ in 0..500 {
        if let Some(task) = task_manager.get_task(task_id).await {
            if predicate(&task) {
                return task;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached the expected state", task_id);
}

async fn wait_for_terminal(task_manager: &TaskManager, task_id: &str) -> Task {
    wait_for(task_manager, task_id, |t| t.status.is_terminal()).await
}

fn phase(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Pending => 0,
        TaskStatus::Starting => 1,
        TaskStatus::Downloading => 2,
        TaskStatus::Converting => 3,
        TaskStatus::Completed | TaskStatus::Failed => 4,
    }
}

#[tokio::test]
async fn test_successful_download() {
    let h = setup(Behaviour::Succeed, test_config()).await;

    let task = h.task_manager.create_task(VIDEO_URL, "192").await;
    h.scheduler.submit(&task).unwrap();

    let done = wait_for_terminal(&h.task_manager, &task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.video_id.as_deref(), Some("AAAAAAAAAAA"));
    assert_eq!(done.title.as_deref(), Some("Test Song"));
    assert_eq!(done.duration, Some(213));
    assert_eq!(done.file_size, Some(4096));
    assert!(done.error.is_none());
    assert!(done.downloaded_bytes.is_none());

    let output = done.output_file.clone().unwrap();
    assert!(output.exists());
    assert_eq!(output.file_name().unwrap(), "AAAAAAAAAAA.mp3");
    assert!(output.starts_with(h.task_manager.layout().task_dir(&task.id)));

    let info = std::fs::read_to_string(output.with_file_name("AAAAAAAAAAA.info.txt")).unwrap();
    assert!(info.contains("Title: Test Song"));
    assert!(info.contains("Author: Tester"));
    assert!(info.contains("Length: 213 seconds"));
    assert!(info.contains(VIDEO_URL));

    let history = h.storage.history(&task.id);
    let statuses: Vec<TaskStatus> = history.iter().map(|(s, _)| *s).collect();
    assert_eq!(statuses.first(), Some(&TaskStatus::Pending));
    assert!(statuses.contains(&TaskStatus::Starting));
    assert!(statuses.contains(&TaskStatus::Downloading));
    assert!(statuses.contains(&TaskStatus::Converting));
    assert_eq!(statuses.last(), Some(&TaskStatus::Completed));

    // never backwards, neither in phase nor in progress
    for pair in history.windows(2) {
        assert!(phase(pair[0].0) <= phase(pair[1].0), "status went backwards: {:?}", history);
        assert!(pair[0].1 <= pair[1].1, "progress went backwards: {:?}", history);
    }
}

#[tokio::test]
async fn test_artifact_found_by_scan() {
    let h = setup(Behaviour::OddName, test_config()).await;

    let task = h.task_manager.create_task(VIDEO_URL, "128").await;
    h.scheduler.submit(&task).unwrap();

    let done = wait_for_terminal(&h.task_manager, &task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.title.as_deref(), Some("Unknown"));
    assert_eq!(done.duration, Some(0));
    assert_eq!(done.output_file.unwrap().file_name().unwrap(), "AAAAAAAAAAA.f251.mp3");
}

#[tokio::test]
async fn test_failed_download() {
    let h = setup(Behaviour::Fail, test_config()).await;

    let task = h.task_manager.create_task(VIDEO_URL, "192").await;
    h.scheduler.submit(&task).unwrap();

    let done = wait_for_terminal(&h.task_manager, &task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("Video unavailable"));
    assert!(done.output_file.is_none());

    // the error event already failed it; the worker's own update is dropped
    let failures = h
        .storage
        .history(&task.id)
        .into_iter()
        .filter(|(s, _)| *s == TaskStatus::Failed)
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn test_refused_completion_leaves_no_artifact_in_shared_dir() {
    let h = setup_with_layout(Behaviour::ErrorThenOk, test_config(), false).await;
    let root = h.task_manager.layout().root.clone();

    let task = h.task_manager.create_task(VIDEO_URL, "192").await;
    h.scheduler.submit(&task).unwrap();

    let done = wait_for_terminal(&h.task_manager, &task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("Postprocessing failed"));

    // the worker is done once the job leaves the registry
    for _ in 0..500 {
        if !h.scheduler.is_active(&task.id) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.scheduler.is_active(&task.id));

    let failed = h.task_manager.get_task(&task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.output_file.is_none());
    assert!(!root.join("AAAAAAAAAAA.mp3").exists());
    assert!(!root.join("AAAAAAAAAAA.info.txt").exists());
    // the shared directory itself stays
    assert!(root.exists());
}

#[tokio::test]
async fn test_download_timeout() {
    let config = SchedulerConfig {
        download_timeout: Some(Duration::from_millis(200)),
        ..test_config()
    };
    let h = setup(Behaviour::Hang, config).await;

    let task = h.task_manager.create_task(VIDEO_URL, "192").await;
    h.scheduler.submit(&task).unwrap();

    let done = wait_for_terminal(&h.task_manager, &task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("timed out"));

    let partial = h
        .task_manager
        .layout()
        .task_dir(&task.id)
        .join("AAAAAAAAAAA.webm.part");
    assert!(!partial.exists());
}

#[tokio::test]
async fn test_cancel_running_download() {
    let h = setup(Behaviour::Hang, test_config()).await;

    let task = h.task_manager.create_task(VIDEO_URL, "192").await;
    h.scheduler.submit(&task).unwrap();
    wait_for(&h.task_manager, &task.id, |t| t.status == TaskStatus::Downloading).await;
    assert!(h.scheduler.is_active(&task.id));

    assert!(h.scheduler.cancel(&task.id).await);
    assert!(!h.scheduler.is_active(&task.id));

    let cancelled = h.task_manager.get_task(&task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Failed);
    assert_eq!(cancelled.error.as_deref(), Some("Download was cancelled"));

    assert!(h.task_manager.delete_task(&task.id).await);
    assert!(h.task_manager.get_task(&task.id).await.is_none());
    assert!(!h.task_manager.layout().task_dir(&task.id).exists());

    // nothing left to cancel
    assert!(!h.scheduler.cancel(&task.id).await);
}

#[tokio::test]
async fn test_deleted_before_start_is_skipped() {
    let config = SchedulerConfig {
        workers: 1,
        download_timeout: Some(Duration::from_millis(300)),
        ..test_config()
    };
    let h = setup(Behaviour::Hang, config).await;

    let first = h.task_manager.create_task(VIDEO_URL, "192").await;
    let second = h.task_manager.create_task("https://youtu.be/BBBBBBBBBBB", "192").await;
    h.scheduler.submit(&first).unwrap();
    h.scheduler.submit(&second).unwrap();

    // second is still queued behind the single worker
    assert!(h.task_manager.delete_task(&second.id).await);

    wait_for_terminal(&h.task_manager, &first.id).await;
    for _ in 0..100 {
        if !h.scheduler.is_active(&second.id) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.scheduler.is_active(&second.id));
    assert!(h.task_manager.get_task(&second.id).await.is_none());
    assert!(h.storage.history(&second.id).iter().all(|(s, _)| *s == TaskStatus::Pending));
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let config = SchedulerConfig {
        workers: 1,
        ..test_config()
    };
    let h = setup(Behaviour::Succeed, config).await;

    let ids = ["AAAAAAAAAAA", "BBBBBBBBBBB", "CCCCCCCCCCC"];
    let mut tasks = Vec::new();
    for id in ids {
        let task = h
            .task_manager
            .create_task(&format!("https://youtu.be/{}", id), "192")
            .await;
        h.scheduler.submit(&task).unwrap();
        tasks.push(task);
    }

    for task in &tasks {
        let done = wait_for_terminal(&h.task_manager, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
    }
    assert_eq!(h.extractor.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(h.scheduler.active_jobs(), 0);
}

#[tokio::test]
async fn test_recover_after_restart() {
    let h = setup(Behaviour::Succeed, test_config()).await;

    let pending = h.task_manager.create_task(VIDEO_URL, "192").await;
    let interrupted = h.task_manager.create_task("https://youtu.be/BBBBBBBBBBB", "192").await;
    h.task_manager
        .update_task(&interrupted.id, TaskUpdate::status(TaskStatus::Starting))
        .await
        .unwrap();
    h.task_manager
        .update_task(&interrupted.id, TaskUpdate::status(TaskStatus::Downloading).with_progress(40))
        .await
        .unwrap();

    h.scheduler.recover().await.unwrap();

    let done = wait_for_terminal(&h.task_manager, &pending.id).await;
    assert_eq!(done.status, TaskStatus::Completed);

    let failed = h.task_manager.get_task(&interrupted.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.unwrap().contains("interrupted"));
}
