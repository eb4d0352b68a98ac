//! Auto-recovery of agents persisted in `error`. Each agent gets a bounded
//! number of restart attempts spaced by an escalating backoff; a permanently
//! broken agent parks at the cap until a manual restart clears its ledger.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{error, info, warn};

use super::{AgentOrchestrator, AgentStatus, RetryRecord};
use crate::core::store::{AgentRecord, LogLevel};

impl AgentOrchestrator {
    /// One recovery scan. Runs on the monitor interval; callable directly so
    /// tests drive ticks without timers. Per-agent failures are recorded in
    /// the retry ledger and never abort the scan.
    pub async fn recovery_scan(&self) {
        if self.recovery_scan_busy.swap(true, Ordering::AcqRel) {
            return;
        }

        let errored = match self.store.find_all_by_status(&[AgentStatus::Error]).await {
            Ok(records) => records,
            Err(e) => {
                error!("recovery scan could not list agents in error: {}", e);
                self.recovery_scan_busy.store(false, Ordering::Release);
                return;
            }
        };

        for record in errored {
            if self.recovery_in_progress(&record.id).await {
                continue;
            }
            if !self.retry_window_open(&record.id).await {
                continue;
            }
            self.attempt_auto_restart(&record).await;
        }

        self.recovery_scan_busy.store(false, Ordering::Release);
    }

    /// True when this agent is still under the attempt cap and past its
    /// backoff deadline.
    async fn retry_window_open(&self, agent_id: &str) -> bool {
        let retries = self.retries.lock().await;
        match retries.get(agent_id) {
            Some(rec) if rec.count >= self.config.max_restart_attempts => false,
            Some(rec) => Instant::now() >= rec.next_attempt_after,
            None => true,
        }
    }

    async fn attempt_auto_restart(&self, record: &AgentRecord) {
        if !self.try_begin_recovery(&record.id).await {
            return;
        }
        let outcome = self.reattach(record).await;
        self.end_recovery(&record.id).await;

        match outcome {
            Ok(()) => {
                self.retries.lock().await.remove(&record.id);
                info!(agent = %record.id, "auto-recovery restarted agent");
                let _ = self
                    .store
                    .append_log(&record.id, LogLevel::Info, "Agent auto-recovered", None)
                    .await;
            }
            Err(e) => self.record_failed_attempt(record, &e.to_string()).await,
        }
    }

    /// Bump the retry ledger and schedule the next attempt. `reattach` has
    /// already persisted `error` and logged the underlying failure.
    async fn record_failed_attempt(&self, record: &AgentRecord, failure: &str) {
        let now = Instant::now();
        let (attempt, delay) = {
            let mut retries = self.retries.lock().await;
            let entry = retries.entry(record.id.clone()).or_insert(RetryRecord {
                count: 0,
                last_attempt: now,
                next_attempt_after: now,
            });
            entry.count += 1;
            entry.last_attempt = now;
            let delay = self.config.backoff_delay(entry.count);
            entry.next_attempt_after = now + delay;
            (entry.count, delay)
        };

        if attempt >= self.config.max_restart_attempts {
            warn!(
                agent = %record.id,
                attempt,
                "auto-recovery attempts exhausted, waiting for manual restart"
            );
        } else {
            warn!(
                agent = %record.id,
                attempt,
                retry_in_secs = delay.as_secs(),
                "auto-recovery attempt failed"
            );
        }
        let _ = self
            .store
            .append_log(
                &record.id,
                LogLevel::Error,
                &format!(
                    "Auto-recovery attempt {}/{} failed: {}",
                    attempt, self.config.max_restart_attempts, failure
                ),
                Some(serde_json::json!({ "retry_in_secs": delay.as_secs() })),
            )
            .await;
    }

    /// Retry ledger snapshot for one agent, surfaced for status endpoints.
    pub async fn retry_state(&self, agent_id: &str) -> Option<RetryRecord> {
        self.retries.lock().await.get(agent_id).cloned()
    }
}
