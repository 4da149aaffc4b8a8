//! Module registry and initialization.
//!
//! Each flowguard crate is wrapped as a [`ModuleHandle`] that provides
//! uniform lifecycle management via the [`DynPipeline`] trait.
//!
//! The [`ModuleRegistry`] tracks all registered modules and supports
//! ordered start/stop operations.

pub mod correlator;
pub mod flow_engine;

use flowguard_core::error::{FlowguardError, PipelineError};
use flowguard_core::pipeline::{DynPipeline, HealthStatus};

/// A handle to a registered module.
pub struct ModuleHandle {
    /// Module name for logging and health reporting.
    pub name: String,
    /// Whether this module is enabled in configuration.
    pub enabled: bool,
    /// The module's pipeline implementation (start/stop/health_check).
    pub pipeline: Box<dyn DynPipeline>,
}

impl ModuleHandle {
    pub fn new(name: impl Into<String>, enabled: bool, pipeline: Box<dyn DynPipeline>) -> Self {
        Self {
            name: name.into(),
            enabled,
            pipeline,
        }
    }

    /// Check the module's health status.
    ///
    /// Disabled modules always report `Healthy`.
    pub async fn health_check(&self) -> HealthStatus {
        if !self.enabled {
            return HealthStatus::Healthy;
        }
        self.pipeline.health_check().await
    }
}

/// Registry of all flowguard modules.
///
/// Modules are kept in registration order (producer before consumer).
pub struct ModuleRegistry {
    modules: Vec<ModuleHandle>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Register a module. Register the producer (flow engine) first.
    pub fn register(&mut self, handle: ModuleHandle) {
        self.modules.push(handle);
    }

    /// Start all enabled modules in registration order.
    ///
    /// Returns an error on the first module that fails to start.
    /// Already-started modules are NOT rolled back; the caller should
    /// invoke `stop_all` if partial startup is unacceptable.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        for handle in &mut self.modules {
            if !handle.enabled {
                tracing::debug!(module = %handle.name, "skipping disabled module");
                continue;
            }

            tracing::info!(module = %handle.name, "starting module");
            handle
                .pipeline
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start module '{}': {}", handle.name, e))?;
            tracing::info!(module = %handle.name, "module started");
        }
        Ok(())
    }

    /// Stop all enabled modules in registration order.
    ///
    /// The flow engine stops producing before the correlator abandons
    /// whatever is left in the record queue. Errors are collected and
    /// the remaining modules are still stopped. Modules that were never
    /// started report `NotRunning`, which is not treated as a failure.
    pub async fn stop_all(&mut self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for handle in &mut self.modules {
            if !handle.enabled {
                continue;
            }

            tracing::info!(module = %handle.name, "stopping module");
            match handle.pipeline.stop().await {
                Ok(()) => tracing::info!(module = %handle.name, "module stopped"),
                Err(FlowguardError::Pipeline(PipelineError::NotRunning)) => {
                    tracing::debug!(module = %handle.name, "module was not running");
                }
                Err(e) => {
                    tracing::error!(module = %handle.name, error = %e, "failed to stop module");
                    errors.push(format!("{}: {}", handle.name, e));
                }
            }
        }

        if !errors.is_empty() {
            return Err(anyhow::anyhow!(
                "errors stopping modules: {}",
                errors.join("; ")
            ));
        }

        Ok(())
    }

    /// Health status for all modules as `(name, enabled, status)`.
    pub async fn health_statuses(&self) -> Vec<(String, bool, HealthStatus)> {
        let mut statuses = Vec::with_capacity(self.modules.len());
        for handle in &self.modules {
            let status = handle.health_check().await;
            statuses.push((handle.name.clone(), handle.enabled, status));
        }
        statuses
    }

    /// Number of registered modules.
    pub fn count(&self) -> usize {
        self.modules.len()
    }

    /// Number of enabled modules.
    pub fn enabled_count(&self) -> usize {
        self.modules.iter().filter(|m| m.enabled).count()
    }

    /// Registered module names in start order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
