use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};

use crate::schedule::{DownloadLayout, SchedulerConfig};

const DOWNLOAD_DIR: &str = "./downloads";
const LOG_DIR: &str = "./logs";
const HOST: &str = "0.0.0.0";
const PORT: u16 = 5000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub download_dir: PathBuf,
    pub log_dir: String,
    pub host: IpAddr,
    pub port: u16,
    pub max_concurrent_downloads: usize,
    /// `None` when `DOWNLOAD_TIMEOUT_SECS` is `0`.
    pub download_timeout: Option<Duration>,
    /// `0` keeps finished tasks forever.
    pub retention_hours: u64,
    pub per_task_dir: bool,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from(DOWNLOAD_DIR),
            log_dir: LOG_DIR.to_string(),
            host: IpAddr::from([0, 0, 0, 0]),
            port: PORT,
            max_concurrent_downloads: 2,
            download_timeout: Some(Duration::from_secs(3600)),
            retention_hours: 24,
            per_task_dir: true,
            ytdlp_path: None,
            ffmpeg_path: None,
        }
    }
}

/// Process environment first, then `.env`.
fn var(key: &str) -> Option<String> {
    let value = match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    };
    value.filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match var(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(anyhow::anyhow!("Invalid value for {}: {}", key, v)),
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let host = var("HOST").unwrap_or_else(|| HOST.to_string());
        Ok(Self {
            download_dir: var("DOWNLOAD_DIR").unwrap_or_else(|| DOWNLOAD_DIR.to_string()).into(),
            log_dir: var("LOG_DIR").unwrap_or_else(|| LOG_DIR.to_string()),
            host: host
                .parse()
                .with_context(|| format!("Invalid value for HOST: {}", host))?,
            port: parse_var("PORT", PORT)?,
            max_concurrent_downloads: parse_var("MAX_CONCURRENT_DOWNLOADS", 2usize)?.max(1),
            download_timeout: timeout_from_secs(parse_var("DOWNLOAD_TIMEOUT_SECS", 3600u64)?),
            retention_hours: parse_var("RETENTION_HOURS", 24u64)?,
            per_task_dir: parse_bool("PER_TASK_DIR", true)?,
            ytdlp_path: var("YTDLP_PATH").map(PathBuf::from),
            ffmpeg_path: var("FFMPEG_PATH").map(PathBuf::from),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn layout(&self) -> DownloadLayout {
        DownloadLayout::new(self.download_dir.clone(), self.per_task_dir)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.max_concurrent_downloads,
            download_timeout: self.download_timeout,
            retention: (self.retention_hours > 0)
                .then(|| Duration::from_secs(self.retention_hours * 3600)),
            ..SchedulerConfig::default()
        }
    }
}

pub fn init_env() {
    dotenv::dotenv().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.addr().to_string(), "0.0.0.0:5000");
        assert_eq!(config.layout().status_dir(), PathBuf::from("./downloads/status"));

        let scheduler = config.scheduler();
        assert_eq!(scheduler.workers, 2);
        assert_eq!(scheduler.retention, Some(Duration::from_secs(24 * 3600)));
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        assert_eq!(timeout_from_secs(0), None);
        assert_eq!(timeout_from_secs(90), Some(Duration::from_secs(90)));

        let config = AppConfig {
            download_timeout: timeout_from_secs(0),
            ..AppConfig::default()
        };
        assert!(config.scheduler().download_timeout.is_none());
        assert_eq!(AppConfig::default().scheduler().download_timeout, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_zero_retention_disables_sweep() {
        let config = AppConfig {
            retention_hours: 0,
            ..AppConfig::default()
        };
        assert!(config.scheduler().retention.is_none());
    }
}
