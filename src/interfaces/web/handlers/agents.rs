use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use super::super::{AppState, auth::owner_from_headers, error_response};
use crate::core::orchestrator::OrchestratorError;
use crate::core::store::NewAgent;
use crate::core::worker::MessageContext;

pub async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.store.list_by_owner(&owner).await {
        Ok(agents) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "agents": agents })),
        ),
        Err(e) => error_response(OrchestratorError::Internal(e)),
    }
}

#[derive(serde::Deserialize)]
pub struct CreateAgentRequest {
    name: String,
    agent_type: String,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    autostart: bool,
}

pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAgentRequest>,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    if payload.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "success": false, "error": "Agent name must not be empty" })),
        );
    }

    let record = match state
        .store
        .create_agent(NewAgent {
            owner_id: owner.clone(),
            name: payload.name,
            agent_type: payload.agent_type,
            config: payload.config,
        })
        .await
    {
        Ok(r) => r,
        Err(e) => return error_response(OrchestratorError::Internal(e)),
    };
    info!(agent = %record.id, owner = %owner, "agent provisioned");

    if payload.autostart {
        if let Err(e) = state.orchestrator.start_agent(&record.id, &owner).await {
            return (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "agent": record,
                    "start_error": e.to_string(),
                })),
            );
        }
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "agent": record })),
    )
}

pub async fn get_agent(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.store.find_by_id(&agent).await {
        Ok(Some(record)) if record.owner_id == owner => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "agent": record })),
        ),
        Ok(_) => error_response(OrchestratorError::NotFound(agent)),
        Err(e) => error_response(OrchestratorError::Internal(e)),
    }
}

pub async fn delete_agent(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.store.find_by_id(&agent).await {
        Ok(Some(record)) if record.owner_id == owner => {}
        Ok(_) => return error_response(OrchestratorError::NotFound(agent)),
        Err(e) => return error_response(OrchestratorError::Internal(e)),
    }

    // Tear the runtime down first so nothing keeps writing logs for a row
    // that is about to disappear.
    if let Err(e) = state.orchestrator.stop_agent(&agent, &owner).await {
        tracing::warn!(agent = %agent, "stop before delete failed: {}", e);
    }
    if let Err(e) = state.vault.remove_all(&agent).await {
        tracing::warn!(agent = %agent, "vault cleanup failed: {}", e);
    }
    match state.store.delete_agent(&agent).await {
        Ok(true) => {
            info!(agent = %agent, "agent deleted");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "success": true, "message": "Agent deleted" })),
            )
        }
        Ok(false) => error_response(OrchestratorError::NotFound(agent)),
        Err(e) => error_response(OrchestratorError::Internal(e)),
    }
}

pub async fn start_agent(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.orchestrator.start_agent(&agent, &owner).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": "Agent started" })),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn stop_agent(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.orchestrator.stop_agent(&agent, &owner).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": "Agent stopped" })),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn pause_agent(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.orchestrator.pause_agent(&agent, &owner).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": "Agent paused" })),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn resume_agent(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.orchestrator.resume_agent(&agent, &owner).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": "Agent resumed" })),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn restart_agent(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.orchestrator.restart_agent(&agent, &owner).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": "Agent restarted" })),
        ),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize)]
pub struct SendMessageRequest {
    message: String,
    #[serde(default)]
    context: MessageContext,
}

/// Message path. `ensure_runtime` re-attaches the worker when the store says
/// running but this process lost it; a `None` here means the agent simply is
/// not available for messaging right now.
pub async fn send_message(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendMessageRequest>,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    let worker = match state.orchestrator.ensure_runtime(&agent, &owner).await {
        Some(w) => w,
        None => {
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "success": false,
                    "error": "Agent is not running",
                })),
            );
        }
    };

    let request_id = Uuid::new_v4().to_string();
    match worker.process_message(&payload.message, &payload.context).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "request_id": request_id,
                "reply": reply,
            })),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "success": false,
                "request_id": request_id,
                "error": e.to_string(),
            })),
        ),
    }
}
