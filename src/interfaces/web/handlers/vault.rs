use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use super::super::{AppState, auth::owner_from_headers, error_response};
use crate::core::orchestrator::OrchestratorError;

/// All vault routes resolve the agent through the store first so one owner
/// cannot read or write another owner's secrets. Values are never listed,
/// only key names.
async fn authorize(state: &AppState, agent: &str, owner: &str) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    match state.store.find_by_id(agent).await {
        Ok(Some(record)) if record.owner_id == owner => Ok(()),
        Ok(_) => Err(error_response(OrchestratorError::NotFound(agent.to_string()))),
        Err(e) => Err(error_response(OrchestratorError::Internal(e))),
    }
}

pub async fn list_secret_keys(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    if let Err(resp) = authorize(&state, &agent, &owner).await {
        return resp;
    }
    match state.vault.list_keys(&agent).await {
        Ok(keys) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "keys": keys })),
        ),
        Err(e) => error_response(OrchestratorError::Internal(e)),
    }
}

#[derive(serde::Deserialize)]
pub struct SetSecretRequest {
    key: String,
    value: String,
}

pub async fn set_secret(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SetSecretRequest>,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    if let Err(resp) = authorize(&state, &agent, &owner).await {
        return resp;
    }
    match state.vault.set_secret(&agent, &payload.key, &payload.value).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": "Secret updated" })),
        ),
        Err(e) => error_response(OrchestratorError::Internal(e)),
    }
}

pub async fn delete_secret(
    Path((agent, key)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    if let Err(resp) = authorize(&state, &agent, &owner).await {
        return resp;
    }
    match state.vault.remove_secret(&agent, &key).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "message": "Secret removed" })),
        ),
        Err(e) => error_response(OrchestratorError::Internal(e)),
    }
}
