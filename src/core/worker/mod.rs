//! Worker seam: the orchestrator runs agents through the [`AgentWorker`]
//! trait and never names a concrete variant.
//!
//! Two runtimes live behind the trait:
//! - [`native`]: long-lived in-process task with a command mailbox
//! - [`ephemeral`]: stateless, computes each reply on demand
//!
//! Templates map an agent's declared type to a runtime and default persona.
//! Resolution failure is the orchestrator's `TemplateMissing` case.

mod ephemeral;
mod native;

pub use ephemeral::EphemeralWorker;
pub use native::NativeWorker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;

/// Reply produced by a worker for one inbound message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerReply {
    pub content: String,
    /// Unix seconds when the reply was produced.
    pub timestamp: u64,
    pub metadata: serde_json::Value,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Context accompanying an inbound message (who sent it, over what channel).
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MessageContext {
    pub channel: Option<String>,
    pub sender: Option<String>,
}

/// Opaque long-lived unit executing one agent's behavior. The orchestrator
/// owns the lifecycle calls; `is_alive` feeds the heartbeat refresher.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn process_message(&self, text: &str, context: &MessageContext) -> Result<WorkerReply>;
    fn is_alive(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Native,
    Ephemeral,
}

/// Resolved worker template for an agent type.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerTemplate {
    pub name: String,
    pub runtime: RuntimeKind,
    pub persona: String,
}

/// Everything the factory needs to build one worker: the agent's stored
/// config blob merged with its linked credentials.
#[derive(Clone)]
pub struct WorkerSpec {
    pub agent_id: String,
    pub agent_name: String,
    pub template: WorkerTemplate,
    pub config: serde_json::Value,
    pub credentials: HashMap<String, String>,
}

#[async_trait]
pub trait WorkerFactory: Send + Sync {
    fn resolve_template(&self, agent_type: &str) -> Option<WorkerTemplate>;
    async fn build_worker(&self, spec: WorkerSpec) -> Result<Arc<dyn AgentWorker>>;
}

/// Built-in template registry plus construction of the two runtime variants.
pub struct DefaultWorkerFactory {
    templates: HashMap<String, WorkerTemplate>,
}

impl DefaultWorkerFactory {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "assistant".to_string(),
            WorkerTemplate {
                name: "assistant".to_string(),
                runtime: RuntimeKind::Native,
                persona: "A persistent general-purpose assistant.".to_string(),
            },
        );
        templates.insert(
            "responder".to_string(),
            WorkerTemplate {
                name: "responder".to_string(),
                runtime: RuntimeKind::Ephemeral,
                persona: "A stateless request/reply responder.".to_string(),
            },
        );
        Self { templates }
    }

    pub fn register_template(&mut self, template: WorkerTemplate) {
        self.templates.insert(template.name.clone(), template);
    }
}

impl Default for DefaultWorkerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerFactory for DefaultWorkerFactory {
    fn resolve_template(&self, agent_type: &str) -> Option<WorkerTemplate> {
        self.templates.get(agent_type).cloned()
    }

    async fn build_worker(&self, spec: WorkerSpec) -> Result<Arc<dyn AgentWorker>> {
        let worker: Arc<dyn AgentWorker> = match spec.template.runtime {
            RuntimeKind::Native => Arc::new(NativeWorker::new(spec)),
            RuntimeKind::Ephemeral => Arc::new(EphemeralWorker::new(spec)),
        };
        Ok(worker)
    }
}
