use axum::{
    extract::{Json, State},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::schedule::scheduler::TaskStats;
use crate::schedule::{Task, TaskStatus};
use crate::utils::format::{format_duration, format_file_size};
use crate::utils::http::ApiResponse;
use crate::AppContext;

pub fn tasks_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(list_tasks))
        .route("/stats", get(get_task_stats))
        .with_state(ctx)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub title: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub duration: Option<String>,
    pub file_size: Option<String>,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            duration: task.duration.map(format_duration),
            file_size: task.file_size.map(format_file_size),
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            title: task.title,
            url: task.source_url,
            created_at: task.created_at,
        }
    }
}

async fn list_tasks(State(ctx): State<Arc<AppContext>>) -> Json<ApiResponse<Vec<TaskSummary>>> {
    let tasks = ctx.task_manager.list_tasks().await;
    Json(ApiResponse::success(tasks.into_iter().map(TaskSummary::from).collect()))
}

async fn get_task_stats(State(ctx): State<Arc<AppContext>>) -> Json<ApiResponse<TaskStats>> {
    Json(ApiResponse::success(ctx.task_manager.task_stats().await))
}
