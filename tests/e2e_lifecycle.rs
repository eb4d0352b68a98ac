
use e2e_harness::{DaemonHarness, TestResult};
use reqwest::Method;
use serde_json::json;

#[tokio::test]
async fn daemon_reports_status() -> TestResult<()> {
    let harness = DaemonHarness::spawn().await?;
    let out = harness.request_json(Method::GET, "/api/status", None).await?;
    assert_eq!(out["success"], true);
    assert_eq!(out["status"], "ok");
    assert!(out["version"].as_str().is_some());
    Ok(())
}

#[tokio::test]
async fn provision_start_message_stop() -> TestResult<()> {
    let harness = DaemonHarness::spawn().await?;
    let id = harness.create_agent("scout", "assistant").await?;
    assert_eq!(harness.agent_status(&id).await?, "pending");

    let out = harness
        .request_json(Method::POST, &format!("/api/agents/{}/start", id), None)
        .await?;
    assert_eq!(out["success"], true);
    assert_eq!(harness.agent_status(&id).await?, "running");

    let out = harness
        .request_json(
            Method::POST,
            &format!("/api/agents/{}/message", id),
            Some(json!({ "message": "hello there" })),
        )
        .await?;
    assert_eq!(out["success"], true);
    assert!(!out["reply"]["content"].as_str().unwrap_or("").is_empty());

    let out = harness
        .request_json(Method::POST, &format!("/api/agents/{}/stop", id), None)
        .await?;
    assert_eq!(out["success"], true);
    assert_eq!(harness.agent_status(&id).await?, "stopped");
    Ok(())
}

#[tokio::test]
async fn running_agent_survives_daemon_restart() -> TestResult<()> {
    let data_dir = tempfile::tempdir()?;

    let harness = DaemonHarness::spawn_in(data_dir.path()).await?;
    let id = harness.create_agent("phoenix", "assistant").await?;
    harness
        .request_json(Method::POST, &format!("/api/agents/{}/start", id), None)
        .await?;
    assert_eq!(harness.agent_status(&id).await?, "running");
    // Hard kill; the row stays 'running' and startup recovery on the next
    // boot must re-attach the worker.
    harness.kill();

    let fresh = DaemonHarness::spawn_in(data_dir.path()).await?;
    assert_eq!(fresh.agent_status(&id).await?, "running");

    let out = fresh
        .request_json(
            Method::POST,
            &format!("/api/agents/{}/message", id),
            Some(json!({ "message": "still there?" })),
        )
        .await?;
    assert_eq!(out["success"], true);
    Ok(())
}

#[tokio::test]
async fn agent_logs_accumulate_over_http() -> TestResult<()> {
    let harness = DaemonHarness::spawn().await?;
    let id = harness.create_agent("chatty", "assistant").await?;
    harness
        .request_json(Method::POST, &format!("/api/agents/{}/start", id), None)
        .await?;
    harness
        .request_json(Method::POST, &format!("/api/agents/{}/stop", id), None)
        .await?;

    let out = harness
        .request_json(Method::GET, &format!("/api/agents/{}/logs", id), None)
        .await?;
    assert_eq!(out["success"], true);
    let logs = out["logs"].as_array().expect("logs array");
    assert!(logs.len() >= 2);
    // newest first
    assert_eq!(logs[0]["message"], "Agent stopped");
    Ok(())
}
