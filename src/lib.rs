pub mod config;
pub mod extractor;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

use std::sync::Arc;
use config::AppConfig;
use extractor::Extractor;
use schedule::{TaskManager, TaskScheduler};

pub struct AppContext {
    pub task_manager: Arc<TaskManager>,
    pub scheduler: Arc<TaskScheduler>,
    pub extractor: Arc<dyn Extractor>,
    pub config: AppConfig,
}
