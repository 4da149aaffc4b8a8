//! 상관 분석 파이프라인 -- 전달 루프의 생명주기 관리
//!
//! [`CorrelationPipeline`]은 core의 [`Pipeline`] trait을 구현하여 데몬에서
//! flow-engine과 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! flow-engine -> mpsc(DeliveryQueue) -> delivery loop -> sink
//!                                          |-> IncidentCorrelator -> ResponseEngine
//!                                          `-> LiveFeed (broadcast)
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowguard_core::error::{FlowguardError, PipelineError};
use flowguard_core::event::TrafficEvent;
use flowguard_core::pipeline::{HealthStatus, Pipeline, TrafficSink};

use crate::config::CorrelationConfig;
use crate::delivery::{Delivery, DeliveryStats, DeliveryStatsSnapshot, run_delivery};
use crate::feed::LiveFeed;
use crate::rule::{InMemoryRuleStore, ResponseEngine, RuleLoader, RuleStore};

/// sink 실패 비율이 이 값을 넘으면 Degraded
const FAILURE_DEGRADED_RATIO: f64 = 0.5;
/// 실패 비율을 판단하기 위한 최소 기록 시도 수
const FAILURE_MIN_ATTEMPTS: u64 = 10;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Initialized,
    Running,
    Stopped,
}

/// 상관 분석 파이프라인
///
/// # 사용 예시
/// ```ignore
/// let (mut pipeline, _) = CorrelationPipeline::builder()
///     .config(CorrelationConfig::from_core(&config))
///     .record_receiver(record_rx)  // from flow-engine
///     .sink(sink)
///     .build()?;
///
/// pipeline.start().await?;
/// ```
pub struct CorrelationPipeline<S: TrafficSink + 'static> {
    config: CorrelationConfig,
    state: PipelineState,
    sink: Arc<S>,
    /// 빌더에서 지정하지 않으면 첫 `start()`에서 `rules_path`로부터 로드
    rule_store: Option<Arc<dyn RuleStore>>,
    feed: LiveFeed,
    stats: Arc<DeliveryStats>,
    /// 실행 중에는 전달 루프가 소유
    record_rx: Option<mpsc::UnboundedReceiver<TrafficEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<mpsc::UnboundedReceiver<TrafficEvent>>>,
}

impl<S: TrafficSink + 'static> CorrelationPipeline<S> {
    pub fn builder() -> CorrelationPipelineBuilder<S> {
        CorrelationPipelineBuilder::new()
    }

    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// 라이브 피드 (구독용)
    pub fn feed(&self) -> &LiveFeed {
        &self.feed
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn rule_store(&self) -> Option<&Arc<dyn RuleStore>> {
        self.rule_store.as_ref()
    }

    async fn ensure_rule_store(&mut self) -> Result<Arc<dyn RuleStore>, FlowguardError> {
        if let Some(store) = &self.rule_store {
            return Ok(Arc::clone(store));
        }
        let rules = RuleLoader::load(&self.config.rules_path).await?;
        let store: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new(rules)?);
        self.rule_store = Some(Arc::clone(&store));
        Ok(store)
    }
}

impl<S: TrafficSink + 'static> Pipeline for CorrelationPipeline<S> {
    async fn start(&mut self) -> Result<(), FlowguardError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let store = self.ensure_rule_store().await?;
        let rx = self.record_rx.take().ok_or_else(|| {
            PipelineError::InitFailed("record receiver is not available".to_owned())
        })?;

        info!(
            interval_ms = self.config.delivery_interval.as_millis() as u64,
            active_rules = store.active_rules().len(),
            "starting correlation pipeline"
        );

        let delivery = Delivery::new(
            Arc::clone(&self.sink),
            ResponseEngine::new(store),
            self.feed.clone(),
            Arc::clone(&self.stats),
        );
        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(run_delivery(
            delivery,
            rx,
            self.config.delivery_interval,
            self.cancel.clone(),
        )));
        self.state = PipelineState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowguardError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping correlation pipeline");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(rx) => self.record_rx = Some(rx),
                Err(e) => warn!(error = %e, "delivery task failed, record queue lost"),
            }
        }

        self.state = PipelineState::Stopped;
        info!("correlation pipeline stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if self.task.as_ref().is_none_or(|t| t.is_finished()) {
                    return HealthStatus::Unhealthy("delivery loop exited".to_owned());
                }
                let stats = self.stats.snapshot();
                let attempts = stats.delivered + stats.traffic_failures;
                let ratio = stats.failure_ratio();
                if attempts >= FAILURE_MIN_ATTEMPTS && ratio > FAILURE_DEGRADED_RATIO {
                    return HealthStatus::Degraded(format!(
                        "sink failure ratio {:.0}%",
                        ratio * 100.0
                    ));
                }
                HealthStatus::Healthy
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 상관 분석 파이프라인 빌더
///
/// `build()`는 `(CorrelationPipeline, Option<UnboundedSender<TrafficEvent>>)`를
/// 반환합니다. 외부 수신자를 지정한 경우 송신자는 `None`입니다.
pub struct CorrelationPipelineBuilder<S> {
    config: Option<CorrelationConfig>,
    record_rx: Option<mpsc::UnboundedReceiver<TrafficEvent>>,
    sink: Option<Arc<S>>,
    rule_store: Option<Arc<dyn RuleStore>>,
    feed: Option<LiveFeed>,
}

impl<S: TrafficSink + 'static> CorrelationPipelineBuilder<S> {
    fn new() -> Self {
        Self {
            config: None,
            record_rx: None,
            sink: None,
            rule_store: None,
            feed: None,
        }
    }

    pub fn config(mut self, config: CorrelationConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// flow-engine이 채우는 레코드 큐의 수신자
    pub fn record_receiver(mut self, rx: mpsc::UnboundedReceiver<TrafficEvent>) -> Self {
        self.record_rx = Some(rx);
        self
    }

    pub fn sink(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn shared_sink(mut self, sink: Arc<S>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 규칙 저장소 (기본: `rules_path`에서 로드한 [`InMemoryRuleStore`])
    pub fn rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.rule_store = Some(store);
        self
    }

    /// 라이브 피드 (기본: `feed_capacity` 크기의 새 피드)
    pub fn feed(mut self, feed: LiveFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    /// # 에러
    /// - `PipelineError::InitFailed`: 설정 또는 sink가 누락된 경우
    /// - `ConfigError::InvalidValue`: 설정 값이 잘못된 경우
    #[allow(clippy::type_complexity)]
    pub fn build(
        self,
    ) -> Result<
        (
            CorrelationPipeline<S>,
            Option<mpsc::UnboundedSender<TrafficEvent>>,
        ),
        FlowguardError,
    > {
        let config = self
            .config
            .ok_or_else(|| PipelineError::InitFailed("config is required".to_owned()))?;
        config.validate()?;
        let sink = self
            .sink
            .ok_or_else(|| PipelineError::InitFailed("sink is required".to_owned()))?;

        let (record_rx, record_tx) = match self.record_rx {
            Some(rx) => (rx, None),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (rx, Some(tx))
            }
        };
        let feed = self
            .feed
            .unwrap_or_else(|| LiveFeed::new(config.feed_capacity));

        let pipeline = CorrelationPipeline {
            config,
            state: PipelineState::Initialized,
            sink,
            rule_store: self.rule_store,
            feed,
            stats: Arc::new(DeliveryStats::new()),
            record_rx: Some(record_rx),
            cancel: CancellationToken::new(),
            task: None,
        };
        Ok((pipeline, record_tx))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sink::MemorySink;

    fn config() -> CorrelationConfig {
        CorrelationConfig {
            delivery_interval: Duration::from_millis(10),
            ..CorrelationConfig::default()
        }
    }

    #[test]
    fn build_requires_config_and_sink() {
        let err = CorrelationPipeline::<MemorySink>::builder()
            .sink(MemorySink::new(4))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("config is required"));

        let err = CorrelationPipeline::<MemorySink>::builder()
            .config(config())
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("sink is required"));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = CorrelationPipeline::builder()
            .config(CorrelationConfig {
                delivery_interval: Duration::ZERO,
                ..CorrelationConfig::default()
            })
            .sink(MemorySink::new(4))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn build_returns_sender_only_without_external_receiver() {
        let (_, tx) = CorrelationPipeline::builder()
            .config(config())
            .sink(MemorySink::new(4))
            .build()
            .unwrap();
        assert!(tx.is_some());

        let (_external_tx, rx) = mpsc::unbounded_channel();
        let (pipeline, tx) = CorrelationPipeline::builder()
            .config(config())
            .record_receiver(rx)
            .sink(MemorySink::new(4))
            .build()
            .unwrap();
        assert!(tx.is_none());
        assert_eq!(pipeline.state_name(), "initialized");
    }

    #[tokio::test]
    async fn lifecycle_start_stop_restart() {
        let (mut pipeline, _tx) = CorrelationPipeline::builder()
            .config(config())
            .sink(MemorySink::new(4))
            .build()
            .unwrap();

        assert!(pipeline.health_check().await.is_unhealthy());
        assert!(pipeline.stop().await.is_err());

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state_name(), "running");
        assert!(pipeline.health_check().await.is_healthy());
        assert!(pipeline.start().await.is_err());

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
        assert!(pipeline.health_check().await.is_unhealthy());

        // 수신자를 회수했으므로 재시작 가능
        pipeline.start().await.unwrap();
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_loads_rules_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yml");
        std::fs::write(
            &path,
            "rules:\n  - id: r1\n    name: r1\n    condition: severity=high\n",
        )
        .unwrap();

        let (mut pipeline, _tx) = CorrelationPipeline::builder()
            .config(CorrelationConfig {
                rules_path: path.display().to_string(),
                ..config()
            })
            .sink(MemorySink::new(4))
            .build()
            .unwrap();
        assert!(pipeline.rule_store().is_none());

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.rule_store().unwrap().active_rules().len(), 1);
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_fails_on_broken_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yml");
        std::fs::write(&path, "rules: [ {{{").unwrap();

        let (mut pipeline, _tx) = CorrelationPipeline::builder()
            .config(CorrelationConfig {
                rules_path: path.display().to_string(),
                ..config()
            })
            .sink(MemorySink::new(4))
            .build()
            .unwrap();
        assert!(pipeline.start().await.is_err());
        assert_eq!(pipeline.state_name(), "initialized");
    }
}
