//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the scrape endpoint.
//!
//! # Usage
//!
//! ```ignore
//! let config = MetricsConfig::default();
//! install_metrics_recorder(&config)?;
//! // From here on every metrics::counter!() / gauge!() call is recorded
//! ```

use std::net::SocketAddr;

use anyhow::Result;
use flowguard_core::config::MetricsConfig;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Resolve the listener address from `[metrics]`.
///
/// # Errors
///
/// - The endpoint is not `/metrics`
/// - `listen_addr:port` is not a valid socket address
pub fn listen_address(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process.
///
/// # Errors
///
/// - Invalid listener address (see [`listen_address`])
/// - Socket binding fails
/// - Global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_address(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    flowguard_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
