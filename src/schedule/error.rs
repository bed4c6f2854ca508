use thiserror::Error;

use crate::schedule::types::TaskStatus;

/// Rejections raised by the task registry.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid status transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}
