use async_trait::async_trait;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::extractor::{ExtractRequest, Extractor};
use crate::schedule::callback::ProgressRelay;
use crate::schedule::scheduler::TaskManager;
use crate::schedule::types::{DownloadJob, TaskStatus, TaskUpdate};
use crate::utils::url::extract_video_id;
use super::TaskProcessor;

/// Suffixes of files the tool leaves behind when it is interrupted.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// Turns a video URL into an mp3 artifact plus a sidecar info file.
pub struct AudioProcessor {
    extractor: Arc<dyn Extractor>,
    task_manager: Arc<TaskManager>,
}

impl AudioProcessor {
    pub fn new(extractor: Arc<dyn Extractor>, task_manager: Arc<TaskManager>) -> Self {
        Self {
            extractor,
            task_manager,
        }
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }
}

#[async_trait]
impl TaskProcessor for AudioProcessor {
    async fn process(&self, job: &DownloadJob) -> Result<TaskUpdate> {
        let video_id = output_stem(&job.source_url);
        fs::create_dir_all(&job.output_dir)
            .await
            .with_context(|| format!("Failed to create download directory {}", job.output_dir.display()))?;

        let request = ExtractRequest {
            url: job.source_url.clone(),
            output_dir: job.output_dir.clone(),
            output_stem: video_id.clone(),
            quality: job.quality.clone(),
        };
        let relay = ProgressRelay::new(self.task_manager.clone(), job.task_id.clone());

        info!("Processing task {} ({}) with {}", job.task_id, video_id, self.extractor.name());
        let media = self.extractor.extract(&request, &relay).await?;

        let output_file = resolve_artifact(&job.output_dir, &video_id, media.filepath.as_deref()).await?;
        let title = media.title.unwrap_or_else(|| "Unknown".to_string());
        let uploader = media.uploader.unwrap_or_else(|| "Unknown".to_string());
        let duration = media.duration.map(|d| d.max(0.0).round() as u64).unwrap_or(0);

        write_info_file(&output_file, &title, &uploader, duration, &job.source_url).await?;

        let file_size = fs::metadata(&output_file)
            .await
            .with_context(|| format!("Failed to stat {}", output_file.display()))?
            .len();

        info!("Task {} produced {} ({} bytes)", job.task_id, output_file.display(), file_size);
        Ok(TaskUpdate {
            status: Some(TaskStatus::Completed),
            progress: Some(100),
            output_file: Some(output_file),
            title: Some(title),
            duration: Some(duration),
            video_id: Some(video_id),
            file_size: Some(file_size),
            ..Default::default()
        })
    }

    async fn cleanup(&self, job: &DownloadJob) -> Result<()> {
        let stem = output_stem(&job.source_url);
        let mut entries = match fs::read_dir(&job.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&stem) && PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                debug!("Removing partial download {}", entry.path().display());
                if let Err(e) = fs::remove_file(entry.path()).await {
                    warn!("Failed to remove partial download {}: {}", entry.path().display(), e);
                }
            }
        }
        Ok(())
    }

    async fn discard(&self, job: &DownloadJob, update: &TaskUpdate) -> Result<()> {
        if let Some(artifact) = &update.output_file {
            for path in [artifact.clone(), info_file_path(artifact)] {
                match fs::remove_file(&path).await {
                    Ok(()) => debug!("Discarded {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
                }
            }
        }
        self.cleanup(job).await
    }
}

/// File name stem for a URL: the YouTube video id, or a short digest of the
/// URL when no id can be found.
pub fn output_stem(url: &str) -> String {
    extract_video_id(url).unwrap_or_else(|| {
        let digest = format!("{:x}", md5::compute(url.as_bytes()));
        digest[..11].to_string()
    })
}

/// Sidecar metadata file that sits next to an artifact.
pub fn info_file_path(artifact: &Path) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    artifact.with_file_name(format!("{}.info.txt", stem))
}

/// Locates the artifact. The tool's naming is not fully predictable
/// (format ids, different extensions before conversion), so when neither the
/// reported nor the expected path exists, the first `<stem>*.mp3` in `dir`
/// is taken.
pub async fn resolve_artifact(dir: &Path, stem: &str, reported: Option<&Path>) -> Result<PathBuf> {
    let expected = dir.join(format!("{}.mp3", stem));

    let reported = reported.filter(|p| p.extension().and_then(|e| e.to_str()) == Some("mp3"));
    for candidate in reported.into_iter().chain(std::iter::once(expected.as_path())) {
        if fs::try_exists(candidate).await.unwrap_or(false) {
            return Ok(candidate.to_path_buf());
        }
    }

    let mut matches = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(stem) && name.ends_with(".mp3") {
            matches.push(entry.path());
        }
    }
    matches.sort();

    match matches.into_iter().next() {
        Some(found) => {
            debug!("Artifact found by directory scan: {}", found.display());
            Ok(found)
        }
        None => Err(anyhow::anyhow!("MP3 file not found after download: {}", expected.display())),
    }
}

async fn write_info_file(artifact: &Path, title: &str, uploader: &str, duration: u64, url: &str) -> Result<()> {
    let path = info_file_path(artifact);
    let content = format!(
        "Title: {}\nAuthor: {}\nLength: {} seconds\nURL: {}",
        title, uploader, duration, url
    );
    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
