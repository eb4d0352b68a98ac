pub(crate) mod auth;
mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use axum::Json;
use axum::http::StatusCode;
use tracing::info;

use crate::core::orchestrator::{AgentOrchestrator, OrchestratorError};
use crate::core::store::AgentStore;
use crate::core::vault::CredentialsVault;

/// Everything the handlers need, injected at construction. The orchestrator
/// is built once in the serve path and shared here by reference; handlers
/// never reach for globals.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<AgentOrchestrator>,
    pub(crate) store: Arc<dyn AgentStore>,
    pub(crate) vault: Arc<CredentialsVault>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_token: Option<String>,
}

pub struct ApiServerConfig {
    pub orchestrator: Arc<AgentOrchestrator>,
    pub store: Arc<dyn AgentStore>,
    pub vault: Arc<CredentialsVault>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub api_token: Option<String>,
}

pub struct ApiServer {
    state: AppState,
    api_port: u16,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        let state = AppState {
            orchestrator: config.orchestrator,
            store: config.store,
            vault: config.vault,
            log_tx: config.log_tx,
            api_host: config.api_host,
            api_token: config.api_token,
        };
        Self {
            state,
            api_port: config.api_port,
        }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.state.api_host, self.api_port);
        let app = router::build_api_router_on_port(self.state, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server listening on http://{}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Map orchestrator failures onto HTTP codes; the body keeps the
/// `{ "success": false, "error": ... }` envelope the rest of the API uses.
pub(crate) fn error_response(err: OrchestratorError) -> (StatusCode, Json<serde_json::Value>) {
    let code = match &err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::InvalidState { .. } => StatusCode::CONFLICT,
        OrchestratorError::TemplateMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::WorkerStart(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(serde_json::json!({ "success": false, "error": err.to_string() })),
    )
}
