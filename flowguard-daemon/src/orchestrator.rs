//! Module orchestration -- assembly, queue wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `flowguard-daemon`.
//! It validates configuration, creates the record queue, builds enabled
//! modules, manages startup/shutdown ordering, and waits for a signal.
//!
//! # Startup Order (producer before consumer)
//!
//! 1. Flow engine (produces TrafficEvents)
//! 2. Correlator (consumes TrafficEvents, writes the sink and live feed)
//!
//! # Shutdown Order
//!
//! 1. Flow engine (stop capturing)
//! 2. Correlator (abandon records still queued)
//! 3. Background tasks (feed writer drains what was published)

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use flowguard_core::config::FlowguardConfig;
use flowguard_core::event::TrafficEvent;
use flowguard_correlator::LiveFeed;
use flowguard_flow_engine::PacketSource;

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};
use crate::metrics_server;
use crate::modules::{self, ModuleRegistry};

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_INTERVAL_SECS: u64 = 10;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: FlowguardConfig,
    /// Registered modules (ordered for start/stop).
    modules: ModuleRegistry,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
    /// Producer end of the record queue. Held so the queue stays open
    /// while capture is disabled.
    record_tx: mpsc::UnboundedSender<TrafficEvent>,
    /// Live feed of the correlator, if enabled.
    feed: Option<LiveFeed>,
    /// Background tasks spawned on start.
    tasks: Vec<JoinHandle<()>>,
    /// Whether the PID file was written by this instance.
    pid_written: bool,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read, parsed, or validated
    /// - Any enabled module fails to initialize
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = FlowguardConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: FlowguardConfig) -> Result<Self> {
        Self::build_with_source(config, None).await
    }

    /// Build with an explicit packet source for the flow engine.
    ///
    /// With `None` the engine opens `capture.interface` on start.
    pub async fn build_with_source(
        config: FlowguardConfig,
        source: Option<Box<dyn PacketSource>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before module initialization
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        tracing::debug!("creating record queue");
        let (record_tx, record_rx) = mpsc::unbounded_channel::<TrafficEvent>();
        let (shutdown_tx, _) = broadcast::channel(16);

        let mut registry = ModuleRegistry::new();

        if let Some(handle) = modules::flow_engine::init(&config, record_tx.clone(), source).await? {
            registry.register(handle);
        }

        let feed = if config.correlator.enabled {
            let (handle, feed) = modules::correlator::init(&config, record_rx).await?;
            registry.register(handle);
            Some(feed)
        } else {
            // Without a consumer the queue would grow without bound
            tracing::debug!("correlator disabled, spawning record drain task");
            tokio::spawn(drain_records(record_rx, shutdown_tx.subscribe()));
            None
        };

        tracing::info!(
            modules = ?registry.names(),
            total_modules = registry.count(),
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics(registry.count());
        }

        Ok(Self {
            config,
            modules: registry,
            shutdown_tx,
            start_time: Instant::now(),
            record_tx,
            feed,
            tasks: Vec::new(),
            pid_written: false,
        })
    }

    /// Start all modules, wait for a shutdown signal, then shut down.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        tracing::info!("flowguard running");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        self.shutdown().await
    }

    /// Write the PID file, start every enabled module, and spawn the
    /// background tasks.
    ///
    /// If any module fails to start, already-started modules are stopped
    /// and the PID file is removed.
    pub async fn start(&mut self) -> Result<()> {
        if !self.config.general.pid_file.is_empty() {
            write_pid_file(Path::new(&self.config.general.pid_file))?;
            self.pid_written = true;
        }

        // Subscribe before start so the first published record is not missed
        if let Some(feed) = &self.feed {
            let path = (!self.config.correlator.feed_path.is_empty())
                .then(|| PathBuf::from(&self.config.correlator.feed_path));
            let feed_rx = feed.subscribe();
            self.tasks.push(spawn_feed_writer(
                feed_rx,
                path,
                self.shutdown_tx.subscribe(),
            ));
        }

        tracing::info!("starting all modules");
        if let Err(e) = self.modules.start_all().await {
            tracing::warn!("startup failed, rolling back already-started modules");
            if let Err(stop_err) = self.modules.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            self.stop_background_tasks().await;
            self.cleanup_pid_file();
            return Err(e);
        }

        if self.config.metrics.enabled {
            self.tasks.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ));
        }

        Ok(())
    }

    /// Stop modules, then background tasks, then remove the PID file.
    ///
    /// Background tasks consume module output, so modules stop first.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping all modules");
        let result = self.modules.stop_all().await;

        self.stop_background_tasks().await;
        self.cleanup_pid_file();

        tracing::info!("shutdown complete");
        result
    }

    async fn stop_background_tasks(&mut self) {
        tracing::debug!("broadcasting shutdown signal to background tasks");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task failed");
            }
        }
    }

    fn cleanup_pid_file(&mut self) {
        if self.pid_written {
            remove_pid_file(Path::new(&self.config.general.pid_file));
            self.pid_written = false;
        }
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let modules: Vec<ModuleHealth> = self
            .modules
            .health_statuses()
            .await
            .into_iter()
            .map(|(name, enabled, status)| ModuleHealth {
                name,
                enabled,
                status,
            })
            .collect();

        let status = aggregate_status(&modules);
        let uptime_secs = self.start_time.elapsed().as_secs();

        if self.config.metrics.enabled {
            use flowguard_core::metrics as m;
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status,
            uptime_secs,
            modules,
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &FlowguardConfig {
        &self.config
    }

    /// Registered modules.
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// A sender onto the record queue the correlator consumes.
    pub fn record_sender(&self) -> mpsc::UnboundedSender<TrafficEvent> {
        self.record_tx.clone()
    }

    /// Live feed of the correlator (`None` if the correlator is disabled).
    pub fn feed(&self) -> Option<&LiveFeed> {
        self.feed.as_ref()
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` creates the file atomically (no TOCTOU race)
/// - The created file must be a regular file (no symlink)
/// - Parent directory is created with mode 0o700, the file with 0o600
///
/// # Errors
///
/// Returns an error if the file already exists or cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Logs a warning on failure.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Consume the record queue when the correlator is disabled.
async fn drain_records(
    mut record_rx: mpsc::UnboundedReceiver<TrafficEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = record_rx.recv() => {
                match event {
                    Some(event) => {
                        tracing::debug!(
                            record_id = %event.record.id(),
                            status = ?event.record.status,
                            "traffic record received but correlator disabled (dropped)"
                        );
                    }
                    None => {
                        tracing::debug!("record queue closed, exiting drain task");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("record drain task shutting down");
                break;
            }
        }
    }
}

/// Spawn a task that writes live feed messages as JSON lines.
///
/// With no `path`, messages go to the debug log. On shutdown the task
/// writes whatever is still buffered and exits.
fn spawn_feed_writer(
    mut feed_rx: broadcast::Receiver<String>,
    path: Option<PathBuf>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut out = match FeedOutput::open(path).await {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(error = %e, "failed to open feed file, live feed disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                message = feed_rx.recv() => {
                    match message {
                        Ok(line) => out.write(&line).await,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "feed writer lagged, messages skipped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = shutdown_rx.recv() => {
                    while let Ok(line) = feed_rx.try_recv() {
                        out.write(&line).await;
                    }
                    tracing::debug!("feed writer shutting down");
                    break;
                }
            }
        }
    })
}

/// Where the feed writer sends messages.
enum FeedOutput {
    File {
        path: PathBuf,
        file: tokio::fs::File,
    },
    Log,
}

impl FeedOutput {
    async fn open(path: Option<PathBuf>) -> std::io::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::Log);
        };
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tracing::info!(path = %path.display(), "writing live feed");
        Ok(Self::File { path, file })
    }

    async fn write(&mut self, line: &str) {
        match self {
            Self::File { path, file } => {
                let mut buf = Vec::with_capacity(line.len() + 1);
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
                let written = match file.write_all(&buf).await {
                    Ok(()) => file.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write feed line");
                }
            }
            Self::Log => tracing::debug!(message = %line, "live feed"),
        }
    }
}

/// Record daemon-level metrics (build info, modules registered).
fn record_daemon_metrics(module_count: usize) {
    use flowguard_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_MODULES_REGISTERED).set(module_count as f64);

    tracing::debug!(
        module_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a task that periodically updates the uptime gauge.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    use flowguard_core::metrics as m;

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(UPTIME_UPDATE_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
