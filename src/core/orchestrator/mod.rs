//! Agent orchestrator: the one authority for agent lifecycle in this process.
//!
//! Owns the RunningSet (agent id -> live worker + heartbeat state), the
//! per-agent retry ledger, and the two background monitors:
//! - [`heartbeat`]: demotes workers that silently died
//! - [`recovery`]: auto-restarts agents stuck in error, with bounded backoff
//!
//! External callers, the monitors, and lazy recovery on access all mutate
//! running state through the same entry points, so persisted status and the
//! RunningSet stay consistent. Per-agent mutual exclusion during recovery is
//! an in-memory in-progress set; there is no cross-agent lock.

mod heartbeat;
mod recovery;
pub mod types;

#[cfg(test)]
mod tests;

pub use types::{
    AgentStatus, OrchestratorConfig, OrchestratorError, OrchestratorResult, RetryRecord,
    RunningEntry,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::cache::StatusCache;
use crate::core::store::{AgentLogEntry, AgentRecord, AgentStore, LogLevel};
use crate::core::vault::CredentialSource;
use crate::core::worker::{AgentWorker, WorkerFactory, WorkerSpec};

pub struct AgentOrchestrator {
    store: Arc<dyn AgentStore>,
    factory: Arc<dyn WorkerFactory>,
    credentials: Arc<dyn CredentialSource>,
    cache: StatusCache,
    config: OrchestratorConfig,
    running: Arc<Mutex<HashMap<String, RunningEntry>>>,
    retries: Mutex<HashMap<String, RetryRecord>>,
    recovering: Mutex<HashSet<String>>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    heartbeat_scan_busy: AtomicBool,
    recovery_scan_busy: AtomicBool,
    booted_at: Instant,
}

impl AgentOrchestrator {
    pub fn new(
        store: Arc<dyn AgentStore>,
        factory: Arc<dyn WorkerFactory>,
        credentials: Arc<dyn CredentialSource>,
        config: OrchestratorConfig,
    ) -> Self {
        let cache = StatusCache::new(config.status_cache_ttl);
        Self {
            store,
            factory,
            credentials,
            cache,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
            retries: Mutex::new(HashMap::new()),
            recovering: Mutex::new(HashSet::new()),
            monitors: Mutex::new(Vec::new()),
            heartbeat_scan_busy: AtomicBool::new(false),
            recovery_scan_busy: AtomicBool::new(false),
            booted_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn uptime_secs(&self) -> u64 {
        self.booted_at.elapsed().as_secs()
    }

    // --- user-facing lifecycle operations ---

    /// Start an agent's worker. Fails `InvalidState` when it is already
    /// running. A failed start never leaves a RunningEntry behind.
    pub async fn start_agent(&self, agent_id: &str, owner_id: &str) -> OrchestratorResult<()> {
        let record = self.owned_record(agent_id, owner_id).await?;
        if record.status == AgentStatus::Running {
            return Err(OrchestratorError::InvalidState {
                status: record.status,
            });
        }
        self.launch(&record).await
    }

    /// Stop an agent's worker. Stopping an agent without a RunningEntry is
    /// not an error; the persisted status still becomes `stopped`.
    pub async fn stop_agent(&self, agent_id: &str, owner_id: &str) -> OrchestratorResult<()> {
        let record = self.owned_record(agent_id, owner_id).await?;
        self.stop_runtime(agent_id).await;
        self.store.update_status(agent_id, AgentStatus::Stopped).await?;
        self.store
            .append_log(agent_id, LogLevel::Info, "Agent stopped", None)
            .await?;
        self.cache.delete(&cache_key(&record.owner_id, agent_id)).await;
        info!(agent = %agent_id, "agent stopped");
        Ok(())
    }

    /// Pause message processing without tearing the worker down. Requires
    /// persisted status `running`.
    pub async fn pause_agent(&self, agent_id: &str, owner_id: &str) -> OrchestratorResult<()> {
        let record = self.owned_record(agent_id, owner_id).await?;
        if record.status != AgentStatus::Running {
            return Err(OrchestratorError::InvalidState {
                status: record.status,
            });
        }
        if let Some(worker) = self.running_worker(agent_id).await {
            worker.pause().await.map_err(OrchestratorError::Internal)?;
        }
        self.store.update_status(agent_id, AgentStatus::Paused).await?;
        self.store
            .append_log(agent_id, LogLevel::Info, "Agent paused", None)
            .await?;
        self.cache
            .set(&cache_key(&record.owner_id, agent_id), AgentStatus::Paused)
            .await;
        Ok(())
    }

    /// Resume a paused agent. Requires persisted status `paused`.
    pub async fn resume_agent(&self, agent_id: &str, owner_id: &str) -> OrchestratorResult<()> {
        let record = self.owned_record(agent_id, owner_id).await?;
        if record.status != AgentStatus::Paused {
            return Err(OrchestratorError::InvalidState {
                status: record.status,
            });
        }
        if let Some(worker) = self.running_worker(agent_id).await {
            worker.resume().await.map_err(OrchestratorError::Internal)?;
        }
        self.store.update_status(agent_id, AgentStatus::Running).await?;
        self.store
            .append_log(agent_id, LogLevel::Info, "Agent resumed", None)
            .await?;
        self.cache
            .set(&cache_key(&record.owner_id, agent_id), AgentStatus::Running)
            .await;
        Ok(())
    }

    /// Stop-then-start. Clears the retry ledger first so a human-initiated
    /// restart always gets a fresh auto-recovery budget. Safe to call on an
    /// agent whose worker is already gone.
    pub async fn restart_agent(&self, agent_id: &str, owner_id: &str) -> OrchestratorResult<()> {
        let record = self.owned_record(agent_id, owner_id).await?;
        self.retries.lock().await.remove(agent_id);
        self.stop_runtime(agent_id).await;
        self.store.update_status(agent_id, AgentStatus::Stopped).await?;
        self.launch(&record).await
    }

    /// Bridge "the store says running" to "this process has a worker". Never
    /// errors: on any failure the caller gets `None` and decides how to
    /// present it. Never starts an agent that was not supposed to be running.
    pub async fn ensure_runtime(
        &self,
        agent_id: &str,
        owner_id: &str,
    ) -> Option<Arc<dyn AgentWorker>> {
        if let Some(worker) = self.running_worker(agent_id).await {
            return Some(worker);
        }

        // Another caller is already re-attaching this agent. Wait once and
        // re-check; this covers the common dual-request race, not a queue.
        if self.recovery_in_progress(agent_id).await {
            tokio::time::sleep(self.config.ensure_retry_wait).await;
            return self.running_worker(agent_id).await;
        }

        let record = match self.store.find_by_id(agent_id).await {
            Ok(Some(r)) if r.owner_id == owner_id => r,
            Ok(_) => return None,
            Err(e) => {
                warn!(agent = %agent_id, "ensure_runtime store lookup failed: {}", e);
                return None;
            }
        };
        if !matches!(record.status, AgentStatus::Running | AgentStatus::Starting) {
            return None;
        }

        if !self.try_begin_recovery(agent_id).await {
            tokio::time::sleep(self.config.ensure_retry_wait).await;
            return self.running_worker(agent_id).await;
        }

        info!(agent = %agent_id, "runtime missing for running agent, re-attaching");
        let result = self.reattach(&record).await;
        self.end_recovery(agent_id).await;

        match result {
            Ok(()) => self.running_worker(agent_id).await,
            Err(e) => {
                warn!(agent = %agent_id, "re-attach failed: {}", e);
                None
            }
        }
    }

    /// Status read, served from the best-effort cache when possible. The
    /// store stays authoritative; a cache miss is never an error.
    pub async fn get_status(
        &self,
        agent_id: &str,
        owner_id: &str,
    ) -> OrchestratorResult<AgentStatus> {
        let key = cache_key(owner_id, agent_id);
        if let Some(status) = self.cache.get(&key).await {
            return Ok(status);
        }
        let record = self.owned_record(agent_id, owner_id).await?;
        self.cache.set(&key, record.status).await;
        Ok(record.status)
    }

    pub async fn get_logs(
        &self,
        agent_id: &str,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> OrchestratorResult<Vec<AgentLogEntry>> {
        self.owned_record(agent_id, owner_id).await?;
        Ok(self.store.find_logs(agent_id, limit, offset).await?)
    }

    pub async fn is_running(&self, agent_id: &str) -> bool {
        self.running.lock().await.contains_key(agent_id)
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    // --- lifecycle of the orchestrator itself ---

    /// Spawn the two monitor loops. Ticks overlap-guard themselves, so a scan
    /// that outlives the interval is skipped rather than stacked.
    pub async fn run_monitors(self: &Arc<Self>) {
        let hb = self.clone();
        let hb_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hb.config.heartbeat_scan_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                hb.heartbeat_scan().await;
            }
        });

        let rec = self.clone();
        let rec_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rec.config.recovery_scan_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                rec.recovery_scan().await;
            }
        });

        let mut monitors = self.monitors.lock().await;
        monitors.push(hb_task);
        monitors.push(rec_task);
    }

    /// Stop monitors, stop every worker, persist `stopped` for each. One
    /// worker failing to stop never blocks the rest. Safe on an idle process.
    pub async fn shutdown(&self) {
        for handle in self.monitors.lock().await.drain(..) {
            handle.abort();
        }

        let entries: Vec<(String, RunningEntry)> = {
            let mut running = self.running.lock().await;
            running.drain().collect()
        };
        for (agent_id, mut entry) in entries {
            entry.cancel_heartbeat();
            if let Err(e) = entry.worker.stop().await {
                warn!(agent = %agent_id, "worker refused to stop during shutdown: {}", e);
            }
            if let Err(e) = self.store.update_status(&agent_id, AgentStatus::Stopped).await {
                error!(agent = %agent_id, "failed to persist stopped during shutdown: {}", e);
            }
            let _ = self
                .store
                .append_log(&agent_id, LogLevel::Info, "Agent stopped (daemon shutdown)", None)
                .await;
        }

        self.retries.lock().await.clear();
        self.recovering.lock().await.clear();
        self.cache.clear().await;
        info!("orchestrator shut down");
    }

    /// One-shot reattachment of agents the store believes should be running.
    /// Starts sequentially with a stagger: workers contend on init-time
    /// resources, so boot trades throughput for reliability. A failed agent
    /// never aborts the batch.
    pub async fn startup_recovery(&self) {
        let candidates = match self
            .store
            .find_all_by_status(&[AgentStatus::Running, AgentStatus::Starting])
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!("startup recovery could not list agents: {}", e);
                return;
            }
        };
        if candidates.is_empty() {
            return;
        }
        info!("startup recovery: {} agent(s) to re-attach", candidates.len());

        let total = candidates.len();
        for (i, record) in candidates.into_iter().enumerate() {
            if self.is_running(&record.id).await {
                continue;
            }
            match self.reattach(&record).await {
                Ok(()) => info!(agent = %record.id, "startup recovery re-attached agent"),
                Err(e) => {
                    warn!(agent = %record.id, "startup recovery failed: {}", e);
                    let _ = self
                        .store
                        .append_log(
                            &record.id,
                            LogLevel::Error,
                            &format!("Startup recovery failed: {}", e),
                            None,
                        )
                        .await;
                }
            }
            if i + 1 < total {
                tokio::time::sleep(self.config.startup_stagger).await;
            }
        }
    }

    // --- internals shared by the operations and the monitors ---

    async fn owned_record(
        &self,
        agent_id: &str,
        owner_id: &str,
    ) -> OrchestratorResult<AgentRecord> {
        match self.store.find_by_id(agent_id).await? {
            Some(record) if record.owner_id == owner_id => Ok(record),
            _ => Err(OrchestratorError::NotFound(agent_id.to_string())),
        }
    }

    async fn running_worker(&self, agent_id: &str) -> Option<Arc<dyn AgentWorker>> {
        self.running
            .lock()
            .await
            .get(agent_id)
            .map(|entry| entry.worker.clone())
    }

    /// The start path proper: persist `starting`, resolve template, build and
    /// start the worker, then commit the RunningEntry and `running` status.
    /// On any failure the persisted status is `error` with a log line, and no
    /// RunningEntry is left behind.
    async fn launch(&self, record: &AgentRecord) -> OrchestratorResult<()> {
        let agent_id = record.id.as_str();
        // A paused agent still holds a RunningEntry. Tear it down first so
        // the replaced worker and its heartbeat refresher do not outlive it.
        self.stop_runtime(agent_id).await;
        self.store.update_status(agent_id, AgentStatus::Starting).await?;
        self.store
            .append_log(agent_id, LogLevel::Info, "Agent starting", None)
            .await?;

        let template = match self.factory.resolve_template(&record.agent_type) {
            Some(t) => t,
            None => {
                let msg = format!("Unknown agent type '{}'", record.agent_type);
                self.fail_start(record, &msg).await;
                return Err(OrchestratorError::TemplateMissing(
                    record.agent_type.clone(),
                ));
            }
        };

        let credentials = match self.credentials.credentials_for(agent_id).await {
            Ok(c) => c,
            Err(e) => {
                let msg = format!("Could not load credentials: {}", e);
                self.fail_start(record, &msg).await;
                return Err(OrchestratorError::WorkerStart(msg));
            }
        };

        let spec = WorkerSpec {
            agent_id: agent_id.to_string(),
            agent_name: record.name.clone(),
            template,
            config: record.config.clone(),
            credentials,
        };
        let started = async {
            let worker = self.factory.build_worker(spec).await?;
            worker.start().await?;
            Ok::<_, anyhow::Error>(worker)
        }
        .await;

        let worker = match started {
            Ok(worker) => worker,
            Err(e) => {
                let msg = format!("Worker failed to start: {}", e);
                self.fail_start(record, &msg).await;
                return Err(OrchestratorError::WorkerStart(e.to_string()));
            }
        };

        let mut entry = RunningEntry::new(worker.clone());
        entry.heartbeat_task = Some(self.arm_heartbeat(agent_id, worker));
        self.running.lock().await.insert(agent_id.to_string(), entry);

        self.store.update_status(agent_id, AgentStatus::Running).await?;
        self.store
            .append_log(agent_id, LogLevel::Info, "Agent started", None)
            .await?;
        self.cache
            .set(&cache_key(&record.owner_id, agent_id), AgentStatus::Running)
            .await;
        info!(agent = %agent_id, agent_type = %record.agent_type, "agent running");
        Ok(())
    }

    /// Recovery-flavored start: reset to `stopped` first, then run the normal
    /// start path. Used by ensure_runtime, startup recovery and the error
    /// recovery monitor.
    async fn reattach(&self, record: &AgentRecord) -> OrchestratorResult<()> {
        self.store.update_status(&record.id, AgentStatus::Stopped).await?;
        self.launch(record).await
    }

    async fn fail_start(&self, record: &AgentRecord, message: &str) {
        let agent_id = record.id.as_str();
        if let Err(e) = self.store.update_status(agent_id, AgentStatus::Error).await {
            error!(agent = %agent_id, "failed to persist error status: {}", e);
        }
        if let Err(e) = self
            .store
            .append_log(agent_id, LogLevel::Error, message, None)
            .await
        {
            error!(agent = %agent_id, "failed to append error log: {}", e);
        }
        self.cache.delete(&cache_key(&record.owner_id, agent_id)).await;
    }

    /// Remove the RunningEntry, cancel its heartbeat refresher before the
    /// worker stop so a refresh cannot race the removal, then stop the
    /// worker. Returns whether an entry existed.
    async fn stop_runtime(&self, agent_id: &str) -> bool {
        let entry = self.running.lock().await.remove(agent_id);
        match entry {
            Some(mut entry) => {
                entry.cancel_heartbeat();
                if let Err(e) = entry.worker.stop().await {
                    warn!(agent = %agent_id, "worker stop failed: {}", e);
                }
                true
            }
            None => false,
        }
    }

    /// Per-entry refresher: while the worker reports alive, bump the entry's
    /// heartbeat timestamp. A dead worker stops getting refreshed, which is
    /// exactly the staleness the heartbeat scan looks for.
    fn arm_heartbeat(&self, agent_id: &str, worker: Arc<dyn AgentWorker>) -> JoinHandle<()> {
        let running = self.running.clone();
        let interval = self.config.heartbeat_refresh_interval;
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !worker.is_alive() {
                    continue;
                }
                let mut map = running.lock().await;
                match map.get_mut(&agent_id) {
                    Some(entry) => entry.last_heartbeat = Instant::now(),
                    None => break,
                }
            }
        })
    }

    // --- recovery mutual exclusion ---

    async fn recovery_in_progress(&self, agent_id: &str) -> bool {
        self.recovering.lock().await.contains(agent_id)
    }

    /// Check-then-add under one lock hold; returns false when some other
    /// caller already holds the slot.
    async fn try_begin_recovery(&self, agent_id: &str) -> bool {
        self.recovering.lock().await.insert(agent_id.to_string())
    }

    async fn end_recovery(&self, agent_id: &str) {
        self.recovering.lock().await.remove(agent_id);
    }
}

fn cache_key(owner_id: &str, agent_id: &str) -> String {
    format!("{}:{}", owner_id, agent_id)
}

#[cfg(test)]
impl AgentOrchestrator {
    /// Rewind an entry's heartbeat so staleness paths can be exercised
    /// without waiting out the threshold.
    pub(crate) async fn backdate_heartbeat(&self, agent_id: &str, age: std::time::Duration) {
        let mut running = self.running.lock().await;
        if let Some(entry) = running.get_mut(agent_id) {
            entry.last_heartbeat = Instant::now() - age;
        }
    }

    pub(crate) async fn started_at(&self, agent_id: &str) -> Option<Instant> {
        self.running
            .lock()
            .await
            .get(agent_id)
            .map(|entry| entry.started_at)
    }
}
