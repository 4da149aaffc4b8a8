//! Correlator module initialization.
//!
//! Opens the configured sink and wires the correlation pipeline to the
//! consumer end of the record queue.
//!
//! # Channel Wiring
//!
//! ```text
//! record_rx --> CorrelationPipeline --> sink
//!                                   \--> LiveFeed --> feed writer
//! ```

use anyhow::Result;
use tokio::sync::mpsc;

use flowguard_core::config::FlowguardConfig;
use flowguard_core::event::{MODULE_CORRELATOR, TrafficEvent};
use flowguard_correlator::{ConfiguredSink, CorrelationConfig, CorrelationPipeline, LiveFeed};

use super::ModuleHandle;

/// Initialize the correlator module.
///
/// The caller checks `correlator.enabled`; when disabled the record queue
/// still needs a consumer. Response rules load from `rules_path` on start.
///
/// Returns the module handle and the live feed the pipeline publishes to.
pub async fn init(
    config: &FlowguardConfig,
    record_rx: mpsc::UnboundedReceiver<TrafficEvent>,
) -> Result<(ModuleHandle, LiveFeed)> {
    tracing::info!(sink = %config.sink.kind, "initializing correlator");

    let sink = ConfiguredSink::from_config(&config.sink)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open {} sink: {}", config.sink.kind, e))?;
    let feed = LiveFeed::new(config.correlator.feed_capacity);

    let (pipeline, _) = CorrelationPipeline::builder()
        .config(CorrelationConfig::from_core(config))
        .record_receiver(record_rx)
        .sink(sink)
        .feed(feed.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build correlator: {}", e))?;

    Ok((
        ModuleHandle::new(MODULE_CORRELATOR, true, Box::new(pipeline)),
        feed,
    ))
}
