//! Routes and handlers.

use crate::auth::{AdminToken, require_token};
use crate::error::ApiError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use kiln_core::{Artifact, ArtifactPatch, ArtifactSpec, ExecutionRecord, ExecutionRequest};
use kiln_runtime::{HealthReport, KilnService};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Route prefix
pub const API_PREFIX: &str = "/api/v1";

/// Handler state
#[derive(Clone)]
pub struct ApiState {
    /// Service facade
    pub service: KilnService,
}

/// Response to a stop request
#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    /// Execution that was signalled
    pub execution_id: String,
    /// Always `stopping`; the run records its own terminal state
    pub status: &'static str,
}

/// Build the HTTP router.
///
/// `/api/v1/health` is public; every other route requires `token`.
pub fn build_router(service: KilnService, token: AdminToken) -> Router {
    let protected = Router::new()
        .route("/artifacts", get(list_artifacts).post(create_artifact))
        .route(
            "/artifacts/{id}",
            get(get_artifact).put(update_artifact).delete(delete_artifact),
        )
        .route("/artifacts/{id}/build", post(build_artifact))
        .route("/execute", post(execute))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/stop", post(stop_execution))
        .route_layer(from_fn_with_state(token, require_token));

    let api = Router::new().route("/health", get(health)).merge(protected);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ApiState { service })
}

async fn health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.service.health().await)
}

async fn list_artifacts(State(state): State<ApiState>) -> Json<Vec<Artifact>> {
    Json(state.service.list_artifacts().await)
}

async fn create_artifact(
    State(state): State<ApiState>,
    payload: Result<Json<ArtifactSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<Artifact>), ApiError> {
    let Json(spec) = payload?;
    let artifact = state.service.register_artifact(spec).await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

async fn get_artifact(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Artifact>, ApiError> {
    Ok(Json(state.service.get_artifact(&id).await?))
}

async fn update_artifact(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: Result<Json<ArtifactPatch>, JsonRejection>,
) -> Result<Json<Artifact>, ApiError> {
    let Json(patch) = payload?;
    Ok(Json(state.service.update_artifact(&id, patch).await?))
}

async fn delete_artifact(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Artifact>, ApiError> {
    Ok(Json(state.service.delete_artifact(&id).await?))
}

async fn build_artifact(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Artifact>), ApiError> {
    // Dropping the ticket detaches the build; it still records its outcome.
    let ticket = state.service.request_build(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(ticket.artifact().clone())))
}

async fn execute(
    State(state): State<ApiState>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.service.execute(request).await?))
}

async fn get_execution(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    Ok(Json(state.service.get_execution(&id).await?))
}

async fn stop_execution(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    state.service.stop_execution(&id)?;
    Ok(Json(StopResponse {
        execution_id: id,
        status: "stopping",
    }))
}
