//! HTTP API.
//!
//! - `POST /analyze` starts a research task
//! - `GET /status/:task_id` returns its public projection
//! - `POST /tasks/:task_id/clarify` resumes a task paused for clarification
//! - `GET /tasks` lists tasks, newest first
//!
//! Everything except `/` and `/health` requires the `x-api-key` header.

mod auth;
mod routes;
pub mod types;

pub use auth::{require_api_key, verify_key_for_config, API_KEY_HEADER};
pub use routes::{router, serve, AppState};
