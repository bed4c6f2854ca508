use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use crate::AppContext;

pub mod download;
pub mod health;
pub mod tasks;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .nest("/download", download::download_router(ctx.clone()))
        .nest("/tasks", tasks::tasks_router(ctx.clone()))
        .merge(health::health_router(ctx))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
