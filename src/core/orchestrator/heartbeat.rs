//! Dead-worker detection. The scan demotes RunningEntries whose heartbeat is
//! older than the stale threshold; the threshold is several refresh intervals
//! so scheduling jitter never flaps a healthy agent into error.

use std::sync::atomic::Ordering;

use tracing::{error, warn};

use super::{AgentOrchestrator, AgentStatus};
use crate::core::store::LogLevel;

impl AgentOrchestrator {
    /// One heartbeat scan. Runs on the monitor interval; callable directly so
    /// tests drive ticks without timers. Failures are logged per agent and
    /// never abort the scan.
    pub async fn heartbeat_scan(&self) {
        if self.heartbeat_scan_busy.swap(true, Ordering::AcqRel) {
            return;
        }

        let stale: Vec<String> = {
            let running = self.running.lock().await;
            running
                .iter()
                .filter(|(_, entry)| {
                    entry.last_heartbeat.elapsed() > self.config.heartbeat_stale_after
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for agent_id in stale {
            self.demote_stale(&agent_id).await;
        }

        self.heartbeat_scan_busy.store(false, Ordering::Release);
    }

    /// Demote one stale agent: persist `error`, log the missed heartbeat and
    /// drop the RunningEntry. The error recovery monitor takes it from there.
    async fn demote_stale(&self, agent_id: &str) {
        let entry = self.running.lock().await.remove(agent_id);
        let Some(mut entry) = entry else {
            // Gone since the scan snapshot; somebody else stopped it.
            return;
        };
        let silent_for = entry.last_heartbeat.elapsed().as_secs();
        entry.cancel_heartbeat();
        if let Err(e) = entry.worker.stop().await {
            warn!(agent = %agent_id, "stop of unresponsive worker failed: {}", e);
        }

        warn!(agent = %agent_id, silent_for_secs = silent_for, "missed heartbeat, demoting to error");
        if let Err(e) = self.store.update_status(agent_id, AgentStatus::Error).await {
            error!(agent = %agent_id, "failed to persist error after missed heartbeat: {}", e);
        }
        if let Err(e) = self
            .store
            .append_log(
                agent_id,
                LogLevel::Error,
                "Agent missed heartbeat",
                Some(serde_json::json!({ "silent_for_secs": silent_for })),
            )
            .await
        {
            error!(agent = %agent_id, "failed to append missed-heartbeat log: {}", e);
        }
        if let Some(owner_id) = self.owner_of(agent_id).await {
            self.cache.delete(&super::cache_key(&owner_id, agent_id)).await;
        }
    }

    async fn owner_of(&self, agent_id: &str) -> Option<String> {
        self.store
            .find_by_id(agent_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.owner_id)
    }
}
