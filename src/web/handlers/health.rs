use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::extractor::Dependency;
use crate::web::ApiError;
use crate::AppContext;

pub fn health_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(ctx)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub active_jobs: usize,
    pub dependencies: Vec<Dependency>,
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Result<impl IntoResponse, ApiError> {
    // PATH lookups hit the filesystem
    let extractor = ctx.extractor.clone();
    let dependencies = tokio::task::spawn_blocking(move || extractor.dependencies())
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    let healthy = dependencies.iter().all(|d| d.installed);

    let report = HealthReport {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: option_env!("GIT_HASH")
            .filter(|v| !v.is_empty())
            .unwrap_or(env!("CARGO_PKG_VERSION"))
            .to_string(),
        active_jobs: ctx.scheduler.active_jobs(),
        dependencies,
    };

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    Ok((status, Json(report)))
}
