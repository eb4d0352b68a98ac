use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

/// Bearer-token gate. With no token configured, open access is allowed only
/// on loopback; exposing the API on a routable address requires a token.
pub async fn require_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let expected = match &state.api_token {
        Some(token) => token.clone(),
        None => {
            let is_loopback = state.api_host == "127.0.0.1"
                || state.api_host == "::1"
                || state.api_host == "localhost";
            if is_loopback {
                return next.run(req).await;
            }
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "No API token configured. Set one before exposing the API on a non-loopback address."
                })),
            )
                .into_response();
        }
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Missing or invalid Authorization header. Use: Bearer <token>"
            })),
        )
            .into_response(),
    }
}

/// Owner scoping for a single-user deployment: trust the x-owner-id header,
/// default to "local" when absent.
pub fn owner_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("local")
        .to_string()
}
