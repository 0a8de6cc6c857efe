use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::cache::ResultCache;
use super::events::EventSender;
use super::host::fallback_pages_url;
use super::intake::{Acknowledgement, TaskIntake, parse_legacy_request};
use super::models::RepositoryName;
use super::pipeline::{LegacyOutcome, TaskPipeline};
use crate::errors::IntakeError;
use crate::secret::Secret;

pub const SERVICE_NAME: &str = "pageforge";

const ENDPOINTS: &[&str] = &[
    "/api/generate-and-deploy-task",
    "/api/generate-and-deploy",
    "/api/status/<repo_name>",
    "/api/health",
    "/api/cache/info",
    "/api/cache/clear-expired",
    "/api/cache/<key>",
    "/ws",
];

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub intake: TaskIntake,
    pub pipeline: Arc<TaskPipeline>,
    pub cache: Option<Arc<ResultCache>>,
    pub events: EventSender,
}

impl AppState {
    pub fn new(intake: TaskIntake) -> Self {
        let pipeline = Arc::clone(intake.runner().pipeline());
        let cache = pipeline.cache().cloned();
        let events = pipeline.events().clone();
        Self {
            intake,
            pipeline,
            cache,
            events,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"success": false, "error": message}))).into_response()
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Validation(_) => ApiError::BadRequest(err.to_string()),
            IntakeError::Unauthorized => ApiError::Unauthorized(err.to_string()),
            IntakeError::AlreadyRunning { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/generate-and-deploy-task", post(generate_and_deploy_task))
        .route("/api/generate-and-deploy", post(generate_and_deploy))
        .route("/api/status/{repo_name}", get(deployment_status))
        .route("/api/cache/info", get(cache_info))
        .route("/api/cache/clear-expired", post(cache_clear_expired))
        .route("/api/cache/{key}", delete(cache_delete))
        .route("/api/health", get(health_check))
        .route("/health", get(health_check))
}

// ── Task intake ───────────────────────────────────────────────────────

async fn generate_and_deploy_task(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<Acknowledgement>, ApiError> {
    let submission = state.intake.accept(&body)?;
    // The run is detached; its outcome only reaches the caller via callback.
    drop(submission.handle);
    Ok(Json(submission.acknowledgement))
}

async fn generate_and_deploy(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let job = parse_legacy_request(&body)?;
    let repo_name = job.repo_name.clone();
    let outcome = state.pipeline.run_legacy(job).await.map_err(|e| {
        error!(repo = %repo_name, error = %e, "generate-and-deploy failed");
        ApiError::Internal(e.to_string())
    })?;
    Ok((StatusCode::CREATED, Json(legacy_response(&repo_name, &outcome))))
}

fn legacy_response(repo_name: &RepositoryName, outcome: &LegacyOutcome) -> Value {
    let site = outcome.site.value();
    let note = if outcome.site.is_degraded() {
        "Static hosting could not be enabled automatically; enable GitHub Pages in the repository settings"
    } else {
        "Static web application deployed to GitHub Pages"
    };
    let seconds = (outcome.elapsed.as_secs_f64() * 100.0).round() / 100.0;
    json!({
        "success": true,
        "repository": {
            "name": outcome.repository.name,
            "full_name": outcome.repository.full_name,
            "html_url": outcome.repository.html_url,
            "clone_url": outcome.repository.clone_url,
        },
        "deployment": {
            "type": "static_site",
            "pages_url": site.url,
            "pages_status": site.status,
            "workflow_runs": outcome.workflow_runs,
            "note": note,
        },
        "generated_files": outcome.files,
        "metadata": {
            "language": outcome.language.as_str(),
            "framework": outcome.framework.as_str(),
            "tests_count": outcome.tests_count,
            "files_count": outcome.files.len(),
            "execution_time_seconds": seconds,
            "deployment_type": "github_pages",
        },
        "message": format!("Successfully created and deployed {} to GitHub Pages!", repo_name),
    })
}

// ── Deployment status ─────────────────────────────────────────────────

fn bearer_token(headers: &HeaderMap) -> Option<Secret> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Secret::new)
}

async fn deployment_status(
    State(state): State<SharedState>,
    Path(repo_name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| {
        ApiError::Unauthorized("GitHub token required in Authorization header".to_string())
    })?;
    let name = RepositoryName::new(repo_name);

    let host = state
        .pipeline
        .connector()
        .connect(&token)
        .map_err(|e| ApiError::Internal(format!("Failed to get deployment status: {}", e)))?;
    let owner = host.owner().await.map_err(|e| {
        error!(repo = %name, error = %e, "status lookup failed");
        ApiError::Internal(format!("Failed to get deployment status: {}", e))
    })?;

    let workflow_runs = host.list_recent_runs(&name).await.unwrap_or_else(|e| {
        warn!(repo = %name, error = %e, "could not list workflow runs");
        Vec::new()
    });

    let (pages_url, pages_status) = match host.static_site(&name).await {
        Ok(site) if !site.url.is_empty() => (site.url, site.status),
        Ok(_) => (fallback_pages_url(&owner, &name), "unknown".to_string()),
        Err(e) => {
            debug!(repo = %name, error = %e, "static hosting configuration unavailable");
            (fallback_pages_url(&owner, &name), "unknown".to_string())
        }
    };

    Ok(Json(json!({
        "success": true,
        "repository_name": name,
        "deployment": {
            "pages_url": pages_url,
            "pages_status": pages_status,
            "workflow_runs": workflow_runs,
        },
    })))
}

// ── Cache administration ──────────────────────────────────────────────

fn cache(state: &AppState) -> Result<&ResultCache, ApiError> {
    state
        .cache
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("Cache is not enabled".to_string()))
}

async fn cache_info(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let info = cache(&state)?
        .info()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"success": true, "cache": info})))
}

async fn cache_clear_expired(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let cleared = cache(&state)?
        .clear_expired()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"success": true, "cleared": cleared})))
}

async fn cache_delete(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = cache(&state)?
        .delete(&key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !deleted {
        return Err(ApiError::NotFound(format!("No cache entry for '{}'", key)));
    }
    Ok(Json(json!({"success": true, "key": key, "deleted": true})))
}

// ── Health ────────────────────────────────────────────────────────────

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "endpoints": ENDPOINTS,
    }))
}
