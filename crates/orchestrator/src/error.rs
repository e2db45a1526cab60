use std::time::Duration;

use bdd_core::CoreError;
use browser::BrowserError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Browser driver did not start within {}ms", .0.as_millis())]
    StartupTimeout(Duration),

    #[error("Browser session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn session_unavailable(reason: impl Into<String>) -> Self {
        Self::SessionUnavailable(reason.into())
    }

    /// Errors that end a task before any scenario can run.
    pub fn is_fatal_to_task(&self) -> bool {
        matches!(self, Self::StartupTimeout(_) | Self::SessionUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
