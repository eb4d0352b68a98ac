//! Stateless worker: no resident task, each reply is computed on demand.
//! Cheap to keep "running" because there is nothing to keep alive between
//! messages.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{AgentWorker, MessageContext, WorkerReply, WorkerSpec, unix_now};

pub struct EphemeralWorker {
    spec: WorkerSpec,
    alive: AtomicBool,
    paused: AtomicBool,
    handled: AtomicU64,
}

impl EphemeralWorker {
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            alive: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            handled: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AgentWorker for EphemeralWorker {
    async fn start(&self) -> Result<()> {
        self.alive.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.alive.store(false, Ordering::Release);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::Release);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::Release);
        Ok(())
    }

    async fn process_message(&self, text: &str, context: &MessageContext) -> Result<WorkerReply> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(anyhow!("worker not started"));
        }
        if self.paused.load(Ordering::Acquire) {
            return Err(anyhow!("agent '{}' is paused", self.spec.agent_name));
        }
        let handled = self.handled.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(WorkerReply {
            content: format!("[{}] {}", self.spec.agent_name, text),
            timestamp: unix_now(),
            metadata: serde_json::json!({
                "template": self.spec.template.name,
                "messages_handled": handled,
                "channel": context.channel,
            }),
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}
