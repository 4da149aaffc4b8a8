//! Logging initialization for flowguard-daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `FlowguardConfig`. `RUST_LOG` overrides the configured level.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use flowguard_core::config::GeneralConfig;

/// Initialize the global tracing subscriber.
///
/// Must be called once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines (default)
/// * `"pretty"` - Human-readable output for development
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter = build_filter(config)?;

    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                config.log_format
            ));
        }
    }

    Ok(())
}

/// `RUST_LOG` if set, otherwise the configured level.
fn build_filter(config: &GeneralConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            anyhow::anyhow!("invalid log level '{}': {}", config.log_level, e)
        }),
    }
}
