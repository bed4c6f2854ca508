use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::schedule::{Task, TaskStatus};
use crate::utils::format::ascii_filename;
use crate::utils::http::ApiResponse;
use crate::utils::url::validate_youtube_url;
use crate::web::ApiError;
use crate::AppContext;

const DEFAULT_QUALITY: u32 = 192;
const QUALITY_RANGE: std::ops::RangeInclusive<u32> = 32..=320;

pub fn download_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/request", post(request_download))
        .route("/status/:task_id", get(get_status))
        .route("/file/:task_id", get(get_file))
        .route("/delete/:task_id", delete(delete_download))
        .with_state(ctx)
}

/// Bitrate given either as a number or as a string such as `"192"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Quality {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    url: Option<String>,
    quality: Option<Quality>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadAccepted {
    pub task_id: String,
    pub status_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Deleted {
    pub task_id: String,
    pub cancelled: bool,
}

fn parse_quality(quality: Option<Quality>) -> Result<u32, ApiError> {
    let parsed = match quality {
        None => return Ok(DEFAULT_QUALITY),
        Some(Quality::Number(n)) => u32::try_from(n).ok(),
        Some(Quality::Text(text)) => text.trim().trim_end_matches(['k', 'K']).parse::<u32>().ok(),
    };

    parsed.filter(|q| QUALITY_RANGE.contains(q)).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Quality must be a bitrate between {} and {} kbps",
            QUALITY_RANGE.start(),
            QUALITY_RANGE.end()
        ))
    })
}

async fn request_download(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let url = req
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("URL is required".to_string()))?;
    if !validate_youtube_url(&url) {
        return Err(ApiError::BadRequest("Invalid YouTube URL".to_string()));
    }
    let quality = parse_quality(req.quality)?;

    let task = ctx.task_manager.create_task(&url, &quality.to_string()).await;
    ctx.scheduler.submit(&task)?;
    info!("Accepted download {} for {}", task.id, url);

    let accepted = DownloadAccepted {
        status_url: format!("/download/status/{}", task.id),
        task_id: task.id,
    };
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(accepted))))
}

async fn find_task(ctx: &AppContext, task_id: &str) -> Result<Task, ApiError> {
    ctx.task_manager
        .get_task(task_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))
}

async fn get_status(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = find_task(&ctx, &task_id).await?;
    Ok(Json(ApiResponse::success(task)))
}

async fn get_file(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let task = find_task(&ctx, &task_id).await?;
    if task.status != TaskStatus::Completed {
        return Err(ApiError::BadRequest(format!("Download not completed (status: {})", task.status)));
    }

    let path = task
        .output_file
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found".to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let length = file.metadata().await?.len();

    let title = task.title.as_deref().unwrap_or("audio");
    let fallback = task.video_id.as_deref().unwrap_or("audio");
    let disposition = format!(
        "attachment; filename=\"{}.mp3\"; filename*=UTF-8''{}.mp3",
        ascii_filename(title, fallback),
        urlencoding::encode(title)
    );

    let body = Body::from_stream(ReaderStream::new(file));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(body)
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(response)
}

async fn delete_download(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<Deleted>>, ApiError> {
    find_task(&ctx, &task_id).await?;

    let cancelled = ctx.scheduler.cancel(&task_id).await;
    if !ctx.task_manager.delete_task(&task_id).await {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }

    Ok(Json(ApiResponse::success(Deleted { task_id, cancelled })))
}
