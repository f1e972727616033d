//! HTTP route handlers.

use std::sync::Arc;

use axum::middleware;
use axum::{
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agents::Agents;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::task::{SharedTaskStore, TaskError, TaskId, TaskStatusResponse, TaskStore, TaskSummary};

use super::auth::{self, API_KEY_HEADER};
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: SharedTaskStore,
    /// Collaborators, or the configuration error that prevents building them.
    /// Checked per request so the server still answers status queries.
    pub agents: Result<Arc<Agents>, TaskError>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let agents = Agents::from_config(&config).map(Arc::new);
        if let Err(e) = &agents {
            tracing::warn!("Research agents unavailable: {}", e);
        }
        Self {
            config,
            store: Arc::new(TaskStore::new()),
            agents,
        }
    }

    pub fn with_agents(config: Config, agents: Agents) -> Self {
        Self {
            config,
            store: Arc::new(TaskStore::new()),
            agents: Ok(Arc::new(agents)),
        }
    }

    pub fn orchestrator(&self) -> Result<Orchestrator, TaskError> {
        let agents = self.agents.clone()?;
        Ok(Orchestrator::new(Arc::clone(&self.store), agents))
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/analyze", post(analyze))
        .route("/status/:task_id", get(get_status))
        .route("/tasks", get(list_tasks))
        .route("/tasks/:task_id/clarify", post(clarify))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)])
        .allow_credentials(true)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Wait for shutdown signal and report runs that are still in flight.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    let running = state
        .store
        .list()
        .await
        .iter()
        .filter(|task| state.store.is_running(task.id))
        .count();
    if running == 0 {
        tracing::info!("Shutdown signal received, no runs in flight");
    } else {
        tracing::info!("Shutdown signal received, abandoning {} runs in flight", running);
    }
}

/// Ids that do not parse name no task, so they are reported as not found.
fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse::<TaskId>()
        .map_err(|_| (StatusCode::NOT_FOUND, format!("Task {} not found", raw)))
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse::new(
        "Welcome to the Agentic Procurement Analysis API",
    ))
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dev_mode: state.config.dev_mode,
        auth_required: state.config.auth.auth_required(state.config.dev_mode),
        providers_configured: state.agents.is_ok(),
        model: state.config.default_model.clone(),
    })
}

/// Start a research task.
async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query must not be empty".to_string()));
    }

    let orchestrator = state.orchestrator().map_err(api_error)?;
    let task_id = orchestrator
        .start(query, req.comparison_factors.unwrap_or_default())
        .await
        .map_err(api_error)?;

    Ok(Json(AnalyzeResponse { task_id }))
}

/// Get a task's public status.
async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let id = parse_task_id(&task_id)?;
    let status = state.store.status(id).await.map_err(api_error)?;
    Ok(Json(status))
}

/// List all tasks, newest first.
async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskSummary>> {
    Json(state.store.summaries().await)
}

/// Resume a task paused for clarification.
async fn clarify(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Json(req): Json<ClarifyRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_task_id(&task_id)?;
    let clarification = req.query.trim();
    if clarification.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Clarification must not be empty".to_string(),
        ));
    }

    let orchestrator = state.orchestrator().map_err(api_error)?;
    orchestrator
        .resume(id, clarification)
        .await
        .map_err(api_error)?;

    Ok(Json(MessageResponse::new(
        "Task clarification received. Resuming analysis.",
    )))
}
