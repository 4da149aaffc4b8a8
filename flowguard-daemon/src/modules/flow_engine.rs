//! Flow engine module initialization.
//!
//! Builds the classifier and blocklist from configuration and wires the
//! engine to the producer end of the record queue.
//!
//! # Channel Wiring
//!
//! ```text
//! capture thread --TrafficEvent--> record_tx --> correlator
//! ```

use anyhow::Result;
use tokio::sync::mpsc;

use flowguard_core::config::FlowguardConfig;
use flowguard_core::event::{MODULE_FLOW_ENGINE, TrafficEvent};
use flowguard_flow_engine::{Blocklist, EngineConfig, FlowEngine, PacketSource, classifier};

use super::ModuleHandle;

/// Initialize the flow engine module.
///
/// Returns `None` if capture is disabled in configuration. `source`
/// replaces the live interface, which is opened on start otherwise.
///
/// # Errors
///
/// - The classifier model cannot be loaded
/// - The blocklist file is malformed
/// - The engine configuration is invalid
pub async fn init(
    config: &FlowguardConfig,
    record_tx: mpsc::UnboundedSender<TrafficEvent>,
    source: Option<Box<dyn PacketSource>>,
) -> Result<Option<ModuleHandle>> {
    if !config.capture.enabled {
        tracing::info!("capture disabled in configuration");
        return Ok(None);
    }

    tracing::info!(interface = %config.capture.interface, "initializing flow engine");

    let classifier = classifier::from_config(&config.classifier)
        .await
        .map_err(|e| anyhow::anyhow!("failed to build classifier: {}", e))?;
    let blocklist = Blocklist::load(&config.capture.blocklist_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load blocklist: {}", e))?;

    let mut builder = FlowEngine::builder()
        .config(EngineConfig::from_core(config))
        .classifier(classifier)
        .blocklist(blocklist)
        .record_sender(record_tx);
    if let Some(source) = source {
        builder = builder.source(source);
    }

    let (engine, _) = builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build flow engine: {}", e))?;

    Ok(Some(ModuleHandle::new(
        MODULE_FLOW_ENGINE,
        true,
        Box::new(engine),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_capture_returns_none() {
        let config = FlowguardConfig::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = init(&config, tx, None).await.unwrap();
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_enabled_capture_builds_handle_without_opening_interface() {
        // Given: Capture enabled on an interface that does not exist
        let mut config = FlowguardConfig::default();
        config.capture.enabled = true;
        config.capture.interface = "fg-test-missing0".to_owned();
        let (tx, _rx) = mpsc::unbounded_channel();

        // When: Initializing (the interface is only opened on start)
        let handle = init(&config, tx, None).await.unwrap().expect("enabled");

        // Then: The handle exists but reports not started
        assert_eq!(handle.name, MODULE_FLOW_ENGINE);
        assert!(handle.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn test_missing_knn_model_fails() {
        let mut config = FlowguardConfig::default();
        config.capture.enabled = true;
        config.classifier.kind = "knn".to_owned();
        config.classifier.model_path = "/nonexistent/flowguard/model.json".to_owned();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = init(&config, tx, None).await.err().expect("should fail");
        assert!(err.to_string().contains("classifier"));
    }

    #[tokio::test]
    async fn test_malformed_blocklist_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.toml");
        std::fs::write(&path, "[[rules]]\nid = \"empty\"\n").unwrap();

        let mut config = FlowguardConfig::default();
        config.capture.enabled = true;
        config.capture.blocklist_path = path.display().to_string();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = init(&config, tx, None).await.err().expect("should fail");
        assert!(err.to_string().contains("blocklist"));
    }
}
