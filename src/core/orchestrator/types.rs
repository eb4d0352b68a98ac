use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::core::worker::AgentWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Starting,
    Running,
    Paused,
    Stopped,
    Error,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Starting => "starting",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Error => "error",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AgentStatus::Pending),
            "starting" => Some(AgentStatus::Starting),
            "running" => Some(AgentStatus::Running),
            "paused" => Some(AgentStatus::Paused),
            "stopped" => Some(AgentStatus::Stopped),
            "error" => Some(AgentStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced to callers of the user-facing lifecycle operations.
/// Background monitors never raise these; they log and move on.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("agent '{0}' not found")]
    NotFound(String),

    #[error("operation not valid while agent is {status}")]
    InvalidState { status: AgentStatus },

    #[error("no worker template registered for agent type '{0}'")]
    TemplateMissing(String),

    #[error("worker failed to start: {0}")]
    WorkerStart(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Intervals and limits for the orchestrator's monitors. The defaults are the
/// production values; tests shrink them.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Cadence of the per-agent liveness refresh while a worker is up.
    pub heartbeat_refresh_interval: Duration,
    /// Cadence of the dead-worker scan.
    pub heartbeat_scan_interval: Duration,
    /// A RunningEntry older than this is demoted to error.
    pub heartbeat_stale_after: Duration,
    /// Cadence of the error-state auto-restart scan.
    pub recovery_scan_interval: Duration,
    /// Auto-restart attempts per agent before a human has to step in.
    pub max_restart_attempts: u32,
    /// Escalating delays between auto-restart attempts; the last entry is
    /// reused for any further attempts.
    pub restart_backoff: Vec<Duration>,
    /// Pause between sequential starts during startup recovery. Workers
    /// contend on init-time resources, so boot trades throughput for
    /// reliability.
    pub startup_stagger: Duration,
    /// TTL for the best-effort status cache. Zero disables it.
    pub status_cache_ttl: Duration,
    /// How long ensure_runtime waits before its single re-check when another
    /// caller is already recovering the same agent.
    pub ensure_retry_wait: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            heartbeat_refresh_interval: Duration::from_secs(30),
            heartbeat_scan_interval: Duration::from_secs(30),
            heartbeat_stale_after: Duration::from_secs(120),
            recovery_scan_interval: Duration::from_secs(15),
            max_restart_attempts: 3,
            restart_backoff: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ],
            startup_stagger: Duration::from_secs(5),
            status_cache_ttl: Duration::from_secs(30),
            ensure_retry_wait: Duration::from_millis(500),
        }
    }
}

impl OrchestratorConfig {
    /// Delay before the next auto-restart, indexed by how many attempts have
    /// already failed. Clamps to the last schedule entry; an empty schedule
    /// means no delay.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let idx = failed_attempts.saturating_sub(1) as usize;
        match self.restart_backoff.get(idx) {
            Some(delay) => *delay,
            None => self.restart_backoff.last().copied().unwrap_or(Duration::ZERO),
        }
    }
}

/// In-memory record of a currently-active worker. Lives only inside the
/// orchestrator's RunningSet; never persisted.
pub struct RunningEntry {
    pub worker: Arc<dyn AgentWorker>,
    pub started_at: Instant,
    pub last_heartbeat: Instant,
    pub heartbeat_task: Option<JoinHandle<()>>,
}

impl RunningEntry {
    pub fn new(worker: Arc<dyn AgentWorker>) -> Self {
        let now = Instant::now();
        Self {
            worker,
            started_at: now,
            last_heartbeat: now,
            heartbeat_task: None,
        }
    }

    pub fn cancel_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat_task.take() {
            handle.abort();
        }
    }
}

/// Per-agent auto-restart ledger. Cleared on success or on a manual restart.
#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub count: u32,
    pub last_attempt: Instant,
    pub next_attempt_after: Instant,
}
