//! Orchestrator integration tests.
//!
//! Tests the flow: config -> module init -> start -> health check -> shutdown.

use std::path::Path;

use flowguard_core::config::FlowguardConfig;
use flowguard_core::event::{MODULE_CORRELATOR, MODULE_FLOW_ENGINE};
use flowguard_daemon::orchestrator::Orchestrator;

/// Config with the correlator only and the PID file under `dir`.
fn correlator_only_config(dir: &Path) -> FlowguardConfig {
    let toml_str = format!(
        r#"
[general]
log_level = "info"
pid_file = "{}"

[capture]
enabled = false

[correlator]
enabled = true
delivery_interval_ms = 10
"#,
        dir.join("run").join("flowguard.pid").display()
    );
    FlowguardConfig::parse(&toml_str).expect("failed to parse test config")
}

fn everything_disabled_config() -> FlowguardConfig {
    FlowguardConfig::parse(
        r#"
[general]
pid_file = ""

[capture]
enabled = false

[correlator]
enabled = false
"#,
    )
    .expect("failed to parse test config")
}

#[tokio::test]
async fn test_build_with_everything_disabled() {
    // Given: No module enabled
    let config = everything_disabled_config();

    // When: Building the orchestrator
    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    // Then: No modules and no feed
    assert_eq!(orchestrator.modules().count(), 0);
    assert!(orchestrator.feed().is_none());
    assert!(orchestrator.health().await.status.is_healthy());
}

#[tokio::test]
async fn test_build_registers_producer_before_consumer() {
    // Given: Capture and correlator both enabled
    let mut config = everything_disabled_config();
    config.capture.enabled = true;
    config.capture.interface = "fg-test-missing0".to_owned();
    config.correlator.enabled = true;

    // When: Building (the interface is only opened on start)
    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    // Then: Flow engine first, correlator second
    assert_eq!(
        orchestrator.modules().names(),
        vec![MODULE_FLOW_ENGINE, MODULE_CORRELATOR]
    );
    assert!(orchestrator.feed().is_some());
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let mut config = everything_disabled_config();
    config.general.log_level = "verbose".to_owned();

    let result = Orchestrator::build_from_config(config).await;

    let err = result.err().expect("invalid config should fail");
    assert!(err.to_string().contains("config validation failed"));
}

#[tokio::test]
async fn test_build_from_missing_file_fails() {
    let result = Orchestrator::build(Path::new("/nonexistent/flowguard.toml")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_lifecycle_writes_and_removes_pid_file() {
    // Given: A correlator-only daemon with a PID file in a temp dir
    let dir = tempfile::tempdir().expect("tempdir");
    let config = correlator_only_config(dir.path());
    let pid_path = dir.path().join("run").join("flowguard.pid");
    let mut orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    // When: Starting
    orchestrator.start().await.expect("should start");

    // Then: PID file holds our PID and the daemon is healthy
    let content = std::fs::read_to_string(&pid_path).expect("PID file should exist");
    assert_eq!(content.trim(), std::process::id().to_string());
    let health = orchestrator.health().await;
    assert!(health.status.is_healthy(), "got {:?}", health.status);
    assert_eq!(health.modules.len(), 1);

    // When: Shutting down
    orchestrator.shutdown().await.expect("should shut down");

    // Then: PID file is gone and the correlator reports stopped
    assert!(!pid_path.exists(), "PID file should be removed");
    assert!(orchestrator.health().await.status.is_unhealthy());
}

#[tokio::test]
async fn test_second_instance_is_refused_by_pid_file() {
    // Given: A running instance
    let dir = tempfile::tempdir().expect("tempdir");
    let mut first = Orchestrator::build_from_config(correlator_only_config(dir.path()))
        .await
        .expect("should build");
    first.start().await.expect("first should start");

    // When: Starting a second instance with the same PID file
    let mut second = Orchestrator::build_from_config(correlator_only_config(dir.path()))
        .await
        .expect("should build");
    let err = second.start().await.err().expect("second should fail");

    // Then: The error points at the existing instance, and the first still owns the file
    assert!(err.to_string().contains("already exists"));
    assert!(dir.path().join("run").join("flowguard.pid").exists());

    first.shutdown().await.expect("should shut down");
}

#[tokio::test]
async fn test_start_failure_rolls_back_and_removes_pid_file() {
    // Given: Capture on an interface that does not exist
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = correlator_only_config(dir.path());
    config.capture.enabled = true;
    config.capture.interface = "fg-test-missing0".to_owned();
    let pid_path = dir.path().join("run").join("flowguard.pid");
    let mut orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    // When: Starting
    let err = orchestrator.start().await.err().expect("start should fail");

    // Then: The failing module is named and nothing is left behind
    assert!(err.to_string().contains(MODULE_FLOW_ENGINE), "got: {err}");
    assert!(!pid_path.exists(), "PID file should be removed after rollback");
    let health = orchestrator.health().await;
    assert!(health.status.is_unhealthy());
}

#[tokio::test]
async fn test_correlator_disabled_still_drains_queue() {
    // Given: Capture enabled (not started) and no correlator
    let mut config = everything_disabled_config();
    config.capture.enabled = true;
    config.capture.interface = "fg-test-missing0".to_owned();

    // When: Building
    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    // Then: Only the flow engine is registered
    assert_eq!(orchestrator.modules().names(), vec![MODULE_FLOW_ENGINE]);
    assert!(orchestrator.feed().is_none());
}
