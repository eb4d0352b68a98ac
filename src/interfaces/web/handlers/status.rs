use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use super::super::{AppState, auth::owner_from_headers, error_response};

pub async fn agent_status(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    match state.orchestrator.get_status(&agent, &owner).await {
        Ok(status) => {
            let resident = state.orchestrator.is_running(&agent).await;
            let retry = state.orchestrator.retry_state(&agent).await.map(|rec| {
                let wait = rec
                    .next_attempt_after
                    .saturating_duration_since(std::time::Instant::now());
                serde_json::json!({
                    "failed_attempts": rec.count,
                    "next_attempt_in_secs": wait.as_secs(),
                })
            });
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "status": status.as_str(),
                    "resident": resident,
                    "retry": retry,
                })),
            )
        }
        Err(e) => error_response(e),
    }
}

pub async fn daemon_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.orchestrator.uptime_secs(),
        "running_agents": state.orchestrator.running_count().await,
    }))
}
