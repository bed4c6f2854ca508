#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use tracing::{info, warn};
use std::sync::Arc;
use audio_dl_rs::{
    config::{self, AppConfig},
    extractor::{ytdlp::find_ffmpeg, Extractor, YtDlpExtractor},
    schedule::{self, TaskManager},
    storage::task::FileTaskStorage,
    utils::logger,
    AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    config::init_env();
    let config = AppConfig::from_env()?;

    let _guard = logger::init(config.log_dir.clone())?;
    info!("Starting audio download service ({})", env!("GIT_HASH"));

    let layout = config.layout();
    tokio::fs::create_dir_all(&layout.root).await?;

    info!("Initializing Storage...");
    let storage = FileTaskStorage::new(layout.status_dir()).await?;

    info!("Initializing Task Manager...");
    let task_manager = Arc::new(TaskManager::new(Arc::new(storage), layout));
    let restored = task_manager.restore().await?;
    info!("Restored {} tasks", restored);

    let extractor = match &config.ytdlp_path {
        Some(path) => YtDlpExtractor::new(path.clone()),
        None => YtDlpExtractor::from_path().unwrap_or_else(|| YtDlpExtractor::new("yt-dlp".into())),
    }
    .with_ffmpeg(config.ffmpeg_path.clone().or_else(find_ffmpeg));
    let extractor: Arc<dyn Extractor> = Arc::new(extractor);

    for dependency in extractor.dependencies() {
        if !dependency.installed {
            warn!("{} not found, downloads will fail until it is installed", dependency.name);
        }
    }

    info!("Initializing Scheduler...");
    let scheduler = Arc::new(schedule::create_scheduler(
        task_manager.clone(),
        extractor.clone(),
        config.scheduler(),
    ));
    scheduler.spawn_workers().await;
    scheduler.recover().await?;

    let runner = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!("Scheduler stopped: {}", e);
        }
    });

    let addr = config.addr();
    let ctx = Arc::new(AppContext {
        task_manager,
        scheduler,
        extractor,
        config,
    });

    match audio_dl_rs::web::start_server(ctx, addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
