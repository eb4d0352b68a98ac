use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    response::sse::{Event, Sse},
};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use super::super::{AppState, auth::owner_from_headers, error_response};

#[derive(serde::Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn agent_logs(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let owner = owner_from_headers(&headers);
    let limit = query.limit.min(1000);
    match state
        .orchestrator
        .get_logs(&agent, &owner, limit, query.offset)
        .await
    {
        Ok(logs) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "logs": logs })),
        ),
        Err(e) => error_response(e),
    }
}

/// Live daemon log feed over SSE. Lagged receivers get a marker line rather
/// than a closed stream.
pub async fn stream_daemon_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}
