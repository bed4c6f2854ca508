use anyhow::Result;
use serde::{Serialize, Deserialize};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::schedule::callback::ProgressCallback;

pub mod ytdlp;

pub use ytdlp::YtDlpExtractor;

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub url: String,
    /// Directory the artifact must be written into.
    pub output_dir: PathBuf,
    /// File name without extension, normally the video id.
    pub output_stem: String,
    /// Target audio bitrate in kbps.
    pub quality: String,
}

impl ExtractRequest {
    /// Where the artifact is expected when the tool follows the template exactly.
    pub fn expected_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.mp3", self.output_stem))
    }
}

/// Metadata reported by the tool for a finished extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMedia {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
    pub ext: Option<String>,
    /// Final file location as reported by the tool, if it reported one.
    pub filepath: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub installed: bool,
    pub path: Option<PathBuf>,
}

/// An external download/transcode engine.
///
/// Implementations must either fail, or leave an audio artifact named after
/// `request.output_stem` inside `request.output_dir`, reporting progress
/// through `progress` along the way.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, request: &ExtractRequest, progress: &dyn ProgressCallback) -> Result<ExtractedMedia>;
    /// External binaries this extractor relies on.
    fn dependencies(&self) -> Vec<Dependency>;
}
