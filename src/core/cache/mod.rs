//! Best-effort TTL cache for status reads. The store stays authoritative:
//! every caller must behave identically when an entry is missing, expired, or
//! the cache is disabled (zero TTL).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::core::orchestrator::AgentStatus;

pub struct StatusCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (AgentStatus, Instant)>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled(&self) -> bool {
        self.ttl.is_zero()
    }

    pub async fn set(&self, agent_id: &str, status: AgentStatus) {
        if self.disabled() {
            return;
        }
        let mut entries = self.entries.lock().await;
        entries.insert(agent_id.to_string(), (status, Instant::now() + self.ttl));
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentStatus> {
        if self.disabled() {
            return None;
        }
        let mut entries = self.entries.lock().await;
        match entries.get(agent_id) {
            Some((status, expires)) if *expires > Instant::now() => Some(*status),
            Some(_) => {
                entries.remove(agent_id);
                None
            }
            None => None,
        }
    }

    pub async fn delete(&self, agent_id: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(agent_id);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}
