use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use convoy_orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shortest goal accepted by `POST /v1/jobs`.
pub const MIN_GOAL_LEN: usize = 10;

/// Listener settings for the HTTP front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// In-flight request cap across all routes.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_concurrent_requests() -> usize {
    256
}

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
struct SubmitJob {
    goal: String,
}

/// The HTTP gateway in front of the orchestrator.
pub struct GatewayServer;

impl GatewayServer {
    pub fn build(orchestrator: Arc<Orchestrator>) -> Router {
        Self::build_with_config(orchestrator, &ServerConfig::default())
    }

    pub fn build_with_config(orchestrator: Arc<Orchestrator>, config: &ServerConfig) -> Router {
        let state = Arc::new(AppState { orchestrator });

        Router::new()
            .route("/health", get(health_handler))
            .route("/v1/jobs", post(submit_job_handler).get(list_jobs_handler))
            .route("/v1/jobs/{job_id}/status", get(job_status_handler))
            .with_state(state)
            .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests.max(1)))
    }
}

fn bad_request(details: serde_json::Value) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "Invalid request", "details": details})),
    )
        .into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "convoy"}))
}

/// `POST /v1/jobs`: decompose and dispatch a goal, answering once its tasks
/// are published.
async fn submit_job_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitJob>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected job submission body");
            return bad_request(json!([{"field": "body", "message": rejection.body_text()}]));
        }
    };

    if request.goal.trim().chars().count() < MIN_GOAL_LEN {
        return bad_request(json!([{
            "field": "goal",
            "message": format!("goal must be at least {MIN_GOAL_LEN} characters"),
        }]));
    }

    match state.orchestrator.process_goal(&request.goal).await {
        Ok(job_id) => {
            info!(job_id = %job_id, "Job accepted");
            (StatusCode::ACCEPTED, Json(json!({"jobId": job_id}))).into_response()
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "Job submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error"})),
            )
                .into_response()
        }
    }
}

async fn job_status_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let snapshot = match Uuid::parse_str(&job_id) {
        Ok(id) => state.orchestrator.get_job_status(id).await,
        Err(_) => None,
    };
    match snapshot {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("job {job_id} not found")})),
        )
            .into_response(),
    }
}

async fn list_jobs_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"jobs": state.orchestrator.list_jobs().await}))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind, "0.0.0.0:3000");
    }
}
