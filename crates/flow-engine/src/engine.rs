//! 플로우 엔진 -- 캡처 루프의 생명주기 관리
//!
//! [`FlowEngine`]은 core의 [`Pipeline`] trait을 구현합니다. `start()`는 캡처
//! 세션을 새로 만들어 blocking 스레드로 넘기고, `stop()`은 취소 토큰으로
//! 루프를 끝낸 뒤 스레드 종료를 기다립니다.
//!
//! # 사용 예시
//! ```ignore
//! let (mut engine, record_rx) = FlowEngine::builder()
//!     .config(EngineConfig::from_core(&config))
//!     .classifier(classifier)
//!     .build()?;
//!
//! engine.start().await?;
//! // record_rx에서 TrafficEvent를 수신하여 correlator로 전달
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowguard_core::error::{FlowguardError, PipelineError};
use flowguard_core::event::TrafficEvent;
use flowguard_core::pipeline::{Classifier, HealthStatus, Pipeline};

use crate::blocklist::Blocklist;
use crate::capture::{CaptureSession, run_capture};
use crate::classifier::NullClassifier;
use crate::config::EngineConfig;
use crate::error::FlowEngineError;
use crate::live::LiveBuffer;
use crate::source::{LiveCapture, PacketSource};
use crate::stats::{CaptureStats, CaptureStatsSnapshot};

/// 파싱 실패 비율이 이 값을 넘으면 Degraded
const PARSE_DROP_DEGRADED_RATIO: f64 = 0.5;
/// 파싱 실패 비율을 판단하기 위한 최소 프레임 수
const PARSE_DROP_MIN_FRAMES: u64 = 100;

/// 엔진 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Initialized,
    Running,
    Stopped,
}

/// 플로우 엔진
pub struct FlowEngine {
    config: EngineConfig,
    state: EngineState,
    classifier: Arc<dyn Classifier>,
    blocklist: Blocklist,
    /// 다음 `start()`에서 사용할 소스. 없으면 라이브 인터페이스를 엽니다.
    /// `PacketSource`는 `Sync`가 아니므로 Mutex로 감쌉니다.
    source: Mutex<Option<Box<dyn PacketSource>>>,
    record_tx: mpsc::UnboundedSender<TrafficEvent>,
    live: LiveBuffer,
    stats: Arc<CaptureStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), FlowEngineError>>>,
}

impl FlowEngine {
    /// 빌더를 반환합니다.
    pub fn builder() -> FlowEngineBuilder {
        FlowEngineBuilder::new()
    }

    pub fn state_name(&self) -> &str {
        match self.state {
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 최근 트래픽 레코드 버퍼 (읽기 전용 조회용)
    pub fn live_buffer(&self) -> &LiveBuffer {
        &self.live
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    /// 다음 `start()`에서 사용할 패킷 소스를 지정합니다.
    pub fn set_source(&mut self, source: Box<dyn PacketSource>) {
        *self.source.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(source);
    }

    fn open_source(&mut self) -> Result<Box<dyn PacketSource>, FlowEngineError> {
        let pending = self.source.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(source) = pending.take() {
            return Ok(source);
        }
        let capture = LiveCapture::open(
            &self.config.interface,
            self.config.promiscuous,
            self.config.read_timeout,
        )?;
        Ok(Box::new(capture))
    }
}

impl Pipeline for FlowEngine {
    async fn start(&mut self) -> Result<(), FlowguardError> {
        if self.state == EngineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let source = self.open_source()?;
        info!(
            source = source.name(),
            classifier = self.classifier.name(),
            blocklist_rules = self.blocklist.len(),
            max_flows = self.config.max_flows,
            "starting flow engine"
        );

        let session = CaptureSession::new(
            &self.config,
            Arc::clone(&self.classifier),
            self.blocklist.clone(),
            self.live.clone(),
            Arc::clone(&self.stats),
        );
        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let record_tx = self.record_tx.clone();

        self.task = Some(tokio::task::spawn_blocking(move || {
            run_capture(session, source, record_tx, cancel)
        }));
        self.state = EngineState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowguardError> {
        if self.state != EngineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping flow engine");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "capture loop ended with error"),
                Err(e) => warn!(error = %e, "capture task failed"),
            }
        }

        self.state = EngineState::Stopped;
        info!("flow engine stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            EngineState::Running => {
                if self.task.as_ref().is_none_or(|t| t.is_finished()) {
                    return HealthStatus::Unhealthy("capture loop exited".to_owned());
                }
                let stats = self.stats.snapshot();
                if stats.flow_table_full() {
                    return HealthStatus::Degraded(format!(
                        "flow table full ({} flows, {} evicted)",
                        stats.active_flows, stats.evicted_flows
                    ));
                }
                let ratio = stats.parse_drop_ratio();
                if stats.frames >= PARSE_DROP_MIN_FRAMES && ratio > PARSE_DROP_DEGRADED_RATIO {
                    return HealthStatus::Degraded(format!(
                        "parse drop ratio {:.0}%",
                        ratio * 100.0
                    ));
                }
                HealthStatus::Healthy
            }
            EngineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            EngineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 플로우 엔진 빌더
///
/// `build()`는 `(FlowEngine, Option<UnboundedReceiver<TrafficEvent>>)`를 반환합니다.
/// 외부 송신자를 지정한 경우 수신자는 `None`입니다.
pub struct FlowEngineBuilder {
    config: Option<EngineConfig>,
    classifier: Option<Arc<dyn Classifier>>,
    blocklist: Blocklist,
    source: Option<Box<dyn PacketSource>>,
    record_tx: Option<mpsc::UnboundedSender<TrafficEvent>>,
}

impl FlowEngineBuilder {
    fn new() -> Self {
        Self {
            config: None,
            classifier: None,
            blocklist: Blocklist::default(),
            source: None,
            record_tx: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 분류기를 지정합니다 (기본: [`NullClassifier`]).
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn blocklist(mut self, blocklist: Blocklist) -> Self {
        self.blocklist = blocklist;
        self
    }

    /// 첫 `start()`에서 사용할 패킷 소스 (기본: 설정된 인터페이스의 라이브 캡처)
    pub fn source(mut self, source: Box<dyn PacketSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// 외부 레코드 채널의 송신자를 지정합니다.
    pub fn record_sender(mut self, tx: mpsc::UnboundedSender<TrafficEvent>) -> Self {
        self.record_tx = Some(tx);
        self
    }

    /// # 에러
    /// - `PipelineError::InitFailed`: 설정이 누락된 경우
    /// - `ConfigError::InvalidValue`: 설정 값이 잘못된 경우
    pub fn build(
        self,
    ) -> Result<(FlowEngine, Option<mpsc::UnboundedReceiver<TrafficEvent>>), FlowguardError> {
        let config = self
            .config
            .ok_or_else(|| PipelineError::InitFailed("config is required".to_owned()))?;
        config.validate()?;

        let (record_tx, record_rx) = match self.record_tx {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (tx, Some(rx))
            }
        };

        let engine = FlowEngine {
            live: LiveBuffer::new(config.live_buffer_capacity),
            config,
            state: EngineState::Initialized,
            classifier: self.classifier.unwrap_or_else(|| Arc::new(NullClassifier)),
            blocklist: self.blocklist,
            source: Mutex::new(self.source),
            record_tx,
            stats: Arc::new(CaptureStats::new()),
            cancel: CancellationToken::new(),
            task: None,
        };

        Ok((engine, record_rx))
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::packet::LinkType;
    use crate::source::{ReplayFrame, ReplaySource};

    #[test]
    fn build_without_config_fails() {
        let err = FlowEngine::builder().build().err().unwrap();
        assert!(err.to_string().contains("config is required"));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = EngineConfig {
            window_capacity: 0,
            ..Default::default()
        };
        assert!(FlowEngine::builder().config(config).build().is_err());
    }

    #[test]
    fn external_sender_means_no_receiver() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (engine, rx) = FlowEngine::builder()
            .config(EngineConfig::default())
            .record_sender(tx)
            .build()
            .unwrap();
        assert!(rx.is_none());
        assert_eq!(engine.state_name(), "initialized");
        assert_eq!(engine.classifier_name(), "none");
    }

    #[tokio::test]
    async fn lifecycle_with_replay_source() {
        let (mut engine, rx) = FlowEngine::builder()
            .config(EngineConfig::default())
            .source(Box::new(ReplaySource::new(
                LinkType::RawIp,
                vec![ReplayFrame::new(vec![0u8; 4], UNIX_EPOCH)],
            )))
            .build()
            .unwrap();
        assert!(rx.is_some());
        assert!(engine.health_check().await.is_unhealthy());

        engine.start().await.unwrap();
        assert_eq!(engine.state_name(), "running");
        assert!(engine.start().await.is_err());

        for _ in 0..200 {
            if engine.stats().frames == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(engine.stats().parse_drops, 1);

        engine.stop().await.unwrap();
        assert_eq!(engine.state_name(), "stopped");
        assert_eq!(
            engine.health_check().await,
            HealthStatus::Unhealthy("stopped".to_owned())
        );
        assert!(engine.stop().await.is_err());
        assert_eq!(engine.stats().frames, 1);
    }

    #[tokio::test]
    async fn stop_before_start_is_not_running() {
        let (mut engine, _rx) = FlowEngine::builder()
            .config(EngineConfig::default())
            .build()
            .unwrap();
        let err = engine.stop().await.unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[tokio::test]
    async fn start_on_missing_interface_fails() {
        let config = EngineConfig {
            interface: "flowguard-no-such-if0".to_owned(),
            ..Default::default()
        };
        let (mut engine, _rx) = FlowEngine::builder().config(config).build().unwrap();
        assert!(engine.start().await.is_err());
        assert_eq!(engine.state_name(), "initialized");
    }
}
