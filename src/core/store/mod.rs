//! Persistence boundary. The orchestrator talks to [`AgentStore`] only; the
//! sqlite implementation lives in [`sqlite`]. Status writes go through the
//! orchestrator — nothing else mutates an agent's status.

mod sqlite;

pub use sqlite::SqliteAgentStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::orchestrator::AgentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn from_level(value: &str) -> Option<Self> {
        match value {
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Persisted agent row. `config` is a free-form JSON blob supplied at
/// provisioning time and handed to the worker factory verbatim.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub agent_type: String,
    pub config: serde_json::Value,
    pub status: AgentStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewAgent {
    pub owner_id: String,
    pub name: String,
    pub agent_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentLogEntry {
    pub id: i64,
    pub agent_id: String,
    pub level: LogLevel,
    pub message: String,
    pub meta: Option<serde_json::Value>,
    pub created_at: String,
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create_agent(&self, agent: NewAgent) -> Result<AgentRecord>;
    async fn find_by_id(&self, id: &str) -> Result<Option<AgentRecord>>;
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<AgentRecord>>;
    async fn find_all_by_status(&self, statuses: &[AgentStatus]) -> Result<Vec<AgentRecord>>;
    async fn update_status(&self, id: &str, status: AgentStatus) -> Result<()>;
    async fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<()>;
    async fn find_logs(&self, id: &str, limit: u32, offset: u32) -> Result<Vec<AgentLogEntry>>;
    async fn delete_agent(&self, id: &str) -> Result<bool>;
}
