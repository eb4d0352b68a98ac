use std::time::{Duration, Instant};

use super::harness::{OWNER, harness};
use crate::core::orchestrator::AgentStatus;

#[tokio::test]
async fn reattaches_everything_the_store_says_should_be_running() {
    let h = harness();
    h.store.seed("a1", OWNER, "assistant", AgentStatus::Running).await;
    h.store.seed("a2", OWNER, "assistant", AgentStatus::Starting).await;
    h.store.seed("a3", OWNER, "assistant", AgentStatus::Stopped).await;

    h.orchestrator.startup_recovery().await;

    assert!(h.orchestrator.is_running("a1").await);
    assert!(h.orchestrator.is_running("a2").await);
    assert!(!h.orchestrator.is_running("a3").await, "stopped agents stay down");
    assert_eq!(h.factory.build_count(), 2);
}

#[tokio::test]
async fn starts_are_staggered_not_parallel() {
    let h = harness();
    h.store.seed("a1", OWNER, "assistant", AgentStatus::Running).await;
    h.store.seed("a2", OWNER, "assistant", AgentStatus::Running).await;
    h.store.seed("a3", OWNER, "assistant", AgentStatus::Running).await;

    let begun = Instant::now();
    h.orchestrator.startup_recovery().await;

    // Three agents, two gaps of 20ms each in the test config.
    assert!(
        begun.elapsed() >= Duration::from_millis(40),
        "sequential stagger must pace the batch"
    );
    assert_eq!(h.orchestrator.running_count().await, 3);
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let h = harness();
    h.store.seed("a1", OWNER, "assistant", AgentStatus::Running).await;
    h.store.seed("a2", OWNER, "assistant", AgentStatus::Running).await;
    h.store.seed("a3", OWNER, "assistant", AgentStatus::Running).await;
    // Recovery order is a1, a2, a3; the first start fails.
    h.factory.fail_next_starts(1);

    h.orchestrator.startup_recovery().await;

    assert_eq!(h.store.status_of("a1").await, AgentStatus::Error);
    assert!(!h.orchestrator.is_running("a1").await);
    assert!(h.orchestrator.is_running("a2").await);
    assert!(h.orchestrator.is_running("a3").await);
    assert_eq!(h.factory.build_count(), 3);
}

#[tokio::test]
async fn agents_already_resident_are_skipped() {
    let h = harness();
    h.store.seed("a1", OWNER, "assistant", AgentStatus::Pending).await;
    h.orchestrator.start_agent("a1", OWNER).await.unwrap();
    assert_eq!(h.factory.build_count(), 1);

    h.orchestrator.startup_recovery().await;
    assert_eq!(h.factory.build_count(), 1, "no duplicate start at boot");
}

#[tokio::test]
async fn shutdown_stops_workers_and_persists_stopped() {
    let h = harness();
    h.store.seed("a1", OWNER, "assistant", AgentStatus::Pending).await;
    h.store.seed("a2", OWNER, "assistant", AgentStatus::Pending).await;
    h.orchestrator.start_agent("a1", OWNER).await.unwrap();
    h.orchestrator.start_agent("a2", OWNER).await.unwrap();

    h.orchestrator.shutdown().await;

    assert_eq!(h.orchestrator.running_count().await, 0);
    assert_eq!(h.store.status_of("a1").await, AgentStatus::Stopped);
    assert_eq!(h.store.status_of("a2").await, AgentStatus::Stopped);
}

#[tokio::test]
async fn shutdown_on_an_idle_process_is_safe() {
    let h = harness();
    h.orchestrator.shutdown().await;
    assert_eq!(h.orchestrator.running_count().await, 0);
}
