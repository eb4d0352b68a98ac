use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{agents, logs, status, vault};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

// Port 0 is fine outside the daemon: the CORS allow-list just ends up with
// origins nothing will send.
#[cfg(test)]
pub fn build_api_router(state: AppState) -> Router {
    build_api_router_on_port(state, 0)
}

pub fn build_api_router_on_port(state: AppState, api_port: u16) -> Router {
    Router::new()
        .route(
            "/api/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/api/agents/{agent}",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route("/api/agents/{agent}/start", post(agents::start_agent))
        .route("/api/agents/{agent}/stop", post(agents::stop_agent))
        .route("/api/agents/{agent}/pause", post(agents::pause_agent))
        .route("/api/agents/{agent}/resume", post(agents::resume_agent))
        .route("/api/agents/{agent}/restart", post(agents::restart_agent))
        .route("/api/agents/{agent}/message", post(agents::send_message))
        .route("/api/agents/{agent}/status", get(status::agent_status))
        .route("/api/agents/{agent}/logs", get(logs::agent_logs))
        .route(
            "/api/agents/{agent}/vault",
            get(vault::list_secret_keys).post(vault::set_secret),
        )
        .route(
            "/api/agents/{agent}/vault/{key}",
            axum::routing::delete(vault::delete_secret),
        )
        .route("/api/status", get(status::daemon_status))
        .route("/api/logs/stream", get(logs::stream_daemon_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("no-referrer"),
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use axum::http::StatusCode;
    use tower::util::ServiceExt;

    use crate::core::orchestrator::{AgentOrchestrator, OrchestratorConfig};
    use crate::core::store::SqliteAgentStore;
    use crate::core::vault::CredentialsVault;
    use crate::core::worker::DefaultWorkerFactory;

    async fn test_state(api_token: Option<&str>) -> AppState {
        let store = Arc::new(SqliteAgentStore::open_in_memory().expect("store"));
        let vault = Arc::new(CredentialsVault::new(store.get_db()));
        vault.initialize().await.expect("vault init");
        let orchestrator = Arc::new(AgentOrchestrator::new(
            store.clone(),
            Arc::new(DefaultWorkerFactory::new()),
            vault.clone(),
            OrchestratorConfig::default(),
        ));
        let (log_tx, _) = tokio::sync::broadcast::channel(16);

        AppState {
            orchestrator,
            store,
            vault,
            log_tx,
            api_host: "127.0.0.1".to_string(),
            api_token: api_token.map(|t| t.to_string()),
        }
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/status")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn wrong_bearer_token_is_rejected() {
        let state = test_state(Some("secret-token")).await;
        let app = build_api_router(state);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/agents")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_bearer_token_is_accepted() {
        let state = test_state(Some("secret-token")).await;
        let app = build_api_router(state);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/agents")
            .header("authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_list_agents() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (status, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "scout", "agent_type": "assistant" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["success"], true);
        assert_eq!(json["agent"]["status"], "pending");

        let (status, json) = json_request(app, Method::GET, "/api/agents", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["agents"].as_array().unwrap().len(), 1);
        assert_eq!(json["agents"][0]["name"], "scout");
    }

    #[tokio::test]
    async fn empty_agent_name_is_rejected() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "  ", "agent_type": "assistant" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn lifecycle_over_http() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (_, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "scout", "agent_type": "assistant" })),
        )
        .await;
        let id = json["agent"]["id"].as_str().unwrap().to_string();

        let (status, _) = json_request(
            app.clone(),
            Method::POST,
            &format!("/api/agents/{}/start", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = json_request(
            app.clone(),
            Method::GET,
            &format!("/api/agents/{}/status", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "running");
        assert_eq!(json["resident"], true);

        // starting twice is a state conflict
        let (status, _) = json_request(
            app.clone(),
            Method::POST,
            &format!("/api/agents/{}/start", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = json_request(
            app,
            Method::POST,
            &format!("/api/agents/{}/stop", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn message_round_trip_over_http() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (_, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({
                "name": "echoer",
                "agent_type": "assistant",
                "autostart": true
            })),
        )
        .await;
        let id = json["agent"]["id"].as_str().unwrap().to_string();

        let (status, json) = json_request(
            app,
            Method::POST,
            &format!("/api/agents/{}/message", id),
            Some(serde_json::json!({ "message": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert!(json["reply"]["content"].as_str().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn messaging_a_stopped_agent_conflicts() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (_, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "idle", "agent_type": "assistant" })),
        )
        .await;
        let id = json["agent"]["id"].as_str().unwrap().to_string();

        let (status, json) = json_request(
            app,
            Method::POST,
            &format!("/api/agents/{}/message", id),
            Some(serde_json::json!({ "message": "anyone home?" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn foreign_owner_cannot_see_agent() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (_, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "mine", "agent_type": "assistant" })),
        )
        .await;
        let id = json["agent"]["id"].as_str().unwrap().to_string();

        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("/api/agents/{}", id))
            .header("x-owner-id", "someone-else")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn vault_keys_round_trip_over_http() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (_, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "keeper", "agent_type": "assistant" })),
        )
        .await;
        let id = json["agent"]["id"].as_str().unwrap().to_string();

        let (status, _) = json_request(
            app.clone(),
            Method::POST,
            &format!("/api/agents/{}/vault", id),
            Some(serde_json::json!({ "key": "api_key", "value": "s3cret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = json_request(
            app.clone(),
            Method::GET,
            &format!("/api/agents/{}/vault", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["keys"], serde_json::json!(["api_key"]));

        let (status, _) = json_request(
            app,
            Method::DELETE,
            &format!("/api/agents/{}/vault/api_key", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_agent_removes_row() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (_, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "doomed", "agent_type": "assistant" })),
        )
        .await;
        let id = json["agent"]["id"].as_str().unwrap().to_string();

        let (status, _) = json_request(
            app.clone(),
            Method::DELETE,
            &format!("/api/agents/{}", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = json_request(
            app,
            Method::GET,
            &format!("/api/agents/{}", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_template_maps_to_unprocessable() {
        let state = test_state(None).await;
        let app = build_api_router(state);

        let (_, json) = json_request(
            app.clone(),
            Method::POST,
            "/api/agents",
            Some(serde_json::json!({ "name": "odd", "agent_type": "mystery" })),
        )
        .await;
        let id = json["agent"]["id"].as_str().unwrap().to_string();

        let (status, _) = json_request(
            app,
            Method::POST,
            &format!("/api/agents/{}/start", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
