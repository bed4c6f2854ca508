use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Dependency, ExtractRequest, ExtractedMedia, Extractor};
use crate::schedule::callback::{ProgressCallback, ProgressEvent};

const PROGRESS_MARKER: &str = "[dl-progress]";
const INFO_MARKER: &str = "[dl-info]";

/// Machine readable progress line, one per progress hook call thanks to `--newline`.
/// Missing values are rendered by yt-dlp as `NA`.
const PROGRESS_TEMPLATE: &str = "download:[dl-progress] %(progress.status)s %(progress.downloaded_bytes)s \
%(progress.total_bytes)s %(progress.total_bytes_estimate)s %(progress.speed)s %(progress.eta)s %(progress.filename)s";

/// Printed once the final file has been moved into place.
const INFO_TEMPLATE: &str = "after_move:[dl-info] %(.{id,title,uploader,duration,ext,filepath})j";

/// Runs the `yt-dlp` binary and converts its output into progress events.
pub struct YtDlpExtractor {
    binary_path: PathBuf,
    ffmpeg_path: Option<PathBuf>,
}

/// One classified line of yt-dlp output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ProgressEvent),
    Info(ExtractedMedia),
    Error(String),
    Other,
}

impl YtDlpExtractor {
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            ffmpeg_path: None,
        }
    }

    pub fn with_ffmpeg(mut self, ffmpeg_path: Option<PathBuf>) -> Self {
        self.ffmpeg_path = ffmpeg_path;
        self
    }

    /// Looks up `yt-dlp` and `ffmpeg` in PATH.
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp")
            .ok()
            .map(|path| Self::new(path).with_ffmpeg(find_ffmpeg()))
    }

    pub fn binary_path(&self) -> &PathBuf {
        &self.binary_path
    }

    pub fn build_args(&self, request: &ExtractRequest) -> Vec<String> {
        let output_template = request
            .output_dir
            .join(format!("{}.%(ext)s", request.output_stem));

        let mut args: Vec<String> = [
            "--format", "bestaudio/best",
            "--extract-audio",
            "--audio-format", "mp3",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("--audio-quality".to_string());
        args.push(format!("{}K", request.quality));
        args.extend(
            [
                "--no-playlist",
                "--newline",
                "--progress",
                "--no-simulate",
                "--progress-template", PROGRESS_TEMPLATE,
                "--print", INFO_TEMPLATE,
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push("--output".to_string());
        args.push(output_template.to_string_lossy().into_owned());

        if let Some(ffmpeg) = &self.ffmpeg_path {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }

        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn extract(&self, request: &ExtractRequest, progress: &dyn ProgressCallback) -> Result<ExtractedMedia> {
        let args = self.build_args(request);
        info!("Starting yt-dlp for {}", request.url);
        debug!("yt-dlp command: {} {}", self.binary_path.display(), args.join(" "));

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.binary_path.display()))?;

        // stdout and stderr are merged into one channel so a single loop can
        // drive the callback
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut media = None;
        let mut last_error = None;

        while let Some(line) = rx.recv().await {
            match parse_line(&line) {
                OutputLine::Progress(event) => progress.on_progress(event).await,
                OutputLine::Info(info) => media = Some(info),
                OutputLine::Error(message) => {
                    warn!("yt-dlp reported an error for {}: {}", request.url, message);
                    progress.on_progress(ProgressEvent::Error { message: message.clone() }).await;
                    last_error = Some(message);
                }
                OutputLine::Other => debug!("yt-dlp: {}", line),
            }
        }

        let status = child.wait().await.context("Failed to wait for yt-dlp")?;
        if !status.success() {
            let message = last_error.unwrap_or_else(|| format!("yt-dlp exited with {}", status));
            return Err(anyhow::anyhow!(message));
        }

        Ok(media.unwrap_or_default())
    }

    fn dependencies(&self) -> Vec<Dependency> {
        let ytdlp = which::which(&self.binary_path).ok();
        let ffmpeg = match &self.ffmpeg_path {
            Some(path) => which::which(path).ok(),
            None => find_ffmpeg(),
        };

        vec![
            Dependency {
                name: "yt-dlp".to_string(),
                installed: ytdlp.is_some(),
                path: ytdlp,
            },
            Dependency {
                name: "ffmpeg".to_string(),
                installed: ffmpeg.is_some(),
                path: ffmpeg,
            },
        ]
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Finds ffmpeg in PATH, falling back to the usual container location.
pub fn find_ffmpeg() -> Option<PathBuf> {
    which::which("ffmpeg").ok().or_else(|| {
        let fallback = PathBuf::from("/usr/bin/ffmpeg");
        fallback.exists().then_some(fallback)
    })
}

pub fn parse_line(line: &str) -> OutputLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        return parse_progress(rest.trim())
            .map(OutputLine::Progress)
            .unwrap_or(OutputLine::Other);
    }

    if let Some(rest) = line.strip_prefix(INFO_MARKER) {
        return match serde_json::from_str::<ExtractedMedia>(rest.trim()) {
            Ok(media) => OutputLine::Info(media),
            Err(e) => {
                warn!("Unreadable yt-dlp info line: {}", e);
                OutputLine::Other
            }
        };
    }

    if let Some(message) = line.strip_prefix("ERROR:") {
        return OutputLine::Error(message.trim().to_string());
    }

    OutputLine::Other
}

fn parse_progress(rest: &str) -> Option<ProgressEvent> {
    let mut fields = rest.splitn(7, ' ');
    let status = fields.next()?;
    let downloaded = number(fields.next());
    let total = number(fields.next());
    let estimate = number(fields.next());
    let speed = fields.next().and_then(|v| v.parse::<f64>().ok());
    let eta = number(fields.next());
    let filename = fields
        .next()
        .map(str::to_string)
        .filter(|f| !f.is_empty() && f != "NA");

    match status {
        "downloading" => Some(ProgressEvent::Downloading {
            downloaded_bytes: downloaded.unwrap_or(0),
            total_bytes: total.or(estimate),
            speed,
            eta,
        }),
        "finished" => Some(ProgressEvent::Finished { filename }),
        "error" => Some(ProgressEvent::Error {
            message: "Unknown error during download".to_string(),
        }),
        _ => None,
    }
}

/// yt-dlp prints estimates as floats and missing values as `NA`.
fn number(value: Option<&str>) -> Option<u64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}
