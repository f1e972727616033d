//! API request and response types.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::task::{TaskError, TaskId};

/// Request to start a research task.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    /// Product category or free-form request
    pub query: String,

    /// Factors to compare; suggested by clarification when omitted
    #[serde(default)]
    pub comparison_factors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub task_id: TaskId,
}

/// Clarification for a paused task.
#[derive(Debug, Clone, Deserialize)]
pub struct ClarifyRequest {
    #[serde(alias = "clarification")]
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dev_mode: bool,
    pub auth_required: bool,
    /// Whether provider keys are present so tasks can run
    pub providers_configured: bool,
    pub model: String,
}

/// Error half of every fallible handler.
pub type ApiError = (StatusCode, String);

/// Map a request-level task error to its HTTP response.
pub fn api_error(err: TaskError) -> ApiError {
    let status = match err {
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::Conflict { .. } | TaskError::AlreadyRunning(_) => StatusCode::CONFLICT,
        TaskError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
