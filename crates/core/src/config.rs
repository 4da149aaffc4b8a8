//! 설정 관리 -- flowguard.toml 파싱 및 런타임 설정
//!
//! [`FlowguardConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`FLOWGUARD_CAPTURE_INTERFACE=eth0` 형식)
//! 3. 설정 파일 (`flowguard.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), flowguard_core::error::FlowguardError> {
//! use flowguard_core::config::FlowguardConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = FlowguardConfig::load("flowguard.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = FlowguardConfig::parse("[flow]\nmax_flows = 1024")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FlowguardError};

/// 이벤트 윈도우 최대 용량. 롤링 카운터는 최근 100개 이벤트 기준입니다.
pub const MAX_WINDOW_CAPACITY: usize = 100;

/// Flowguard 통합 설정
///
/// `flowguard.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowguardConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    /// 패킷 캡처 설정
    #[serde(default)]
    pub capture: CaptureConfig,
    /// 플로우 테이블 / 윈도우 설정
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// 인시던트 상관 분석 / 전달 설정
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FlowguardConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowguardError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowguardError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FlowguardError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FlowguardError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FlowguardError> {
        toml::from_str(toml_str).map_err(|e| {
            FlowguardError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FLOWGUARD_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FLOWGUARD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLOWGUARD_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "FLOWGUARD_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "FLOWGUARD_GENERAL_PID_FILE");

        // Capture
        override_bool(&mut self.capture.enabled, "FLOWGUARD_CAPTURE_ENABLED");
        override_string(&mut self.capture.interface, "FLOWGUARD_CAPTURE_INTERFACE");
        override_bool(
            &mut self.capture.promiscuous,
            "FLOWGUARD_CAPTURE_PROMISCUOUS",
        );
        override_u64(
            &mut self.capture.read_timeout_ms,
            "FLOWGUARD_CAPTURE_READ_TIMEOUT_MS",
        );
        override_string(
            &mut self.capture.blocklist_path,
            "FLOWGUARD_CAPTURE_BLOCKLIST_PATH",
        );

        // Flow
        override_u64(
            &mut self.flow.idle_timeout_secs,
            "FLOWGUARD_FLOW_IDLE_TIMEOUT_SECS",
        );
        override_usize(&mut self.flow.max_flows, "FLOWGUARD_FLOW_MAX_FLOWS");
        override_usize(
            &mut self.flow.window_capacity,
            "FLOWGUARD_FLOW_WINDOW_CAPACITY",
        );
        override_usize(
            &mut self.flow.live_buffer_capacity,
            "FLOWGUARD_FLOW_LIVE_BUFFER_CAPACITY",
        );

        // Classifier
        override_string(&mut self.classifier.kind, "FLOWGUARD_CLASSIFIER_KIND");
        override_string(
            &mut self.classifier.model_path,
            "FLOWGUARD_CLASSIFIER_MODEL_PATH",
        );

        // Correlator
        override_bool(&mut self.correlator.enabled, "FLOWGUARD_CORRELATOR_ENABLED");
        override_u64(
            &mut self.correlator.delivery_interval_ms,
            "FLOWGUARD_CORRELATOR_DELIVERY_INTERVAL_MS",
        );
        override_string(
            &mut self.correlator.rules_path,
            "FLOWGUARD_CORRELATOR_RULES_PATH",
        );
        override_usize(
            &mut self.correlator.feed_capacity,
            "FLOWGUARD_CORRELATOR_FEED_CAPACITY",
        );
        override_string(
            &mut self.correlator.feed_path,
            "FLOWGUARD_CORRELATOR_FEED_PATH",
        );

        // Sink
        override_string(&mut self.sink.kind, "FLOWGUARD_SINK_KIND");
        override_string(&mut self.sink.path, "FLOWGUARD_SINK_PATH");
        override_usize(
            &mut self.sink.memory_capacity,
            "FLOWGUARD_SINK_MEMORY_CAPACITY",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "FLOWGUARD_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "FLOWGUARD_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "FLOWGUARD_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "FLOWGUARD_METRICS_ENDPOINT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowguardError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.capture.enabled {
            if self.capture.interface.is_empty() {
                return Err(invalid(
                    "capture.interface",
                    "interface must not be empty when capture is enabled".to_owned(),
                ));
            }
            if self.capture.read_timeout_ms == 0 {
                return Err(invalid(
                    "capture.read_timeout_ms",
                    "must be greater than 0".to_owned(),
                ));
            }
        }

        if self.flow.idle_timeout_secs == 0 {
            return Err(invalid(
                "flow.idle_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.flow.max_flows == 0 {
            return Err(invalid("flow.max_flows", "must be greater than 0".to_owned()));
        }
        if self.flow.window_capacity == 0 || self.flow.window_capacity > MAX_WINDOW_CAPACITY {
            return Err(invalid(
                "flow.window_capacity",
                format!("must be between 1 and {MAX_WINDOW_CAPACITY}"),
            ));
        }
        if self.flow.live_buffer_capacity == 0 {
            return Err(invalid(
                "flow.live_buffer_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        let valid_kinds = ["none", "knn"];
        if !valid_kinds.contains(&self.classifier.kind.as_str()) {
            return Err(invalid(
                "classifier.kind",
                format!("must be one of: {}", valid_kinds.join(", ")),
            ));
        }
        if self.classifier.kind == "knn" && self.classifier.model_path.is_empty() {
            return Err(invalid(
                "classifier.model_path",
                "model_path is required when kind is knn".to_owned(),
            ));
        }

        if self.correlator.enabled {
            if self.correlator.delivery_interval_ms == 0 {
                return Err(invalid(
                    "correlator.delivery_interval_ms",
                    "must be greater than 0".to_owned(),
                ));
            }
            if self.correlator.feed_capacity == 0 {
                return Err(invalid(
                    "correlator.feed_capacity",
                    "must be greater than 0".to_owned(),
                ));
            }
        }

        let valid_sinks = ["memory", "jsonl"];
        if !valid_sinks.contains(&self.sink.kind.as_str()) {
            return Err(invalid(
                "sink.kind",
                format!("must be one of: {}", valid_sinks.join(", ")),
            ));
        }
        if self.sink.kind == "jsonl" && self.sink.path.is_empty() {
            return Err(invalid(
                "sink.path",
                "path is required when kind is jsonl".to_owned(),
            ));
        }
        if self.sink.kind == "memory" && self.sink.memory_capacity == 0 {
            return Err(invalid(
                "sink.memory_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is supported".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> FlowguardError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/flowguard".to_owned(),
            pid_file: "/var/run/flowguard.pid".to_owned(),
        }
    }
}

/// 패킷 캡처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 캡처할 네트워크 인터페이스
    pub interface: String,
    /// promiscuous 모드
    pub promiscuous: bool,
    /// datalink 읽기 타임아웃 (밀리초), 종료 신호 확인 주기
    pub read_timeout_ms: u64,
    /// 차단 규칙 TOML 파일 경로 (빈 문자열이면 규칙 없음)
    pub blocklist_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interface: "eth0".to_owned(),
            promiscuous: true,
            read_timeout_ms: 200,
            blocklist_path: String::new(),
        }
    }
}

/// 플로우 테이블 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// 마지막 패킷 이후 이 시간(초)이 지난 플로우는 제거됩니다.
    pub idle_timeout_secs: u64,
    /// 최대 추적 플로우 수
    pub max_flows: usize,
    /// 롤링 이벤트 윈도우 크기
    pub window_capacity: usize,
    /// 최근 레코드 버퍼 크기
    pub live_buffer_capacity: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 120,
            max_flows: 65_536,
            window_capacity: 100,
            live_buffer_capacity: 1000,
        }
    }
}

/// 분류기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// 분류기 종류 (none, knn)
    pub kind: String,
    /// knn 모델 JSON 경로
    pub model_path: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: "none".to_owned(),
            model_path: String::new(),
        }
    }
}

/// 상관 분석 / 전달 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 레코드 전달 간격 (밀리초)
    pub delivery_interval_ms: u64,
    /// 대응 규칙 YAML 경로 (빈 문자열이면 규칙 없음)
    pub rules_path: String,
    /// 라이브 피드 broadcast 버퍼 크기
    pub feed_capacity: usize,
    /// 라이브 피드 JSON lines 파일 (빈 문자열이면 debug 로그로 출력)
    pub feed_path: String,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delivery_interval_ms: 1000,
            rules_path: String::new(),
            feed_capacity: 256,
            feed_path: String::new(),
        }
    }
}

/// 영속화 대상 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// sink 종류 (memory, jsonl)
    pub kind: String,
    /// jsonl 파일 경로
    pub path: String,
    /// memory sink 최대 보관 레코드 수
    pub memory_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_owned(),
            path: String::new(),
            memory_capacity: 10_000,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로 (`/metrics`만 지원)
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
