//! 플로우 엔진 에러 타입
//!
//! [`FlowEngineError`]는 캡처 소스, 차단 규칙, 분류기 모델, 설정 등
//! 엔진 내부의 에러를 표현합니다. `From<FlowEngineError> for FlowguardError`
//! 변환으로 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//!
//! 패킷 파싱 실패는 에러가 아닙니다. 잘못된 프레임은 조용히 버려집니다.

use flowguard_core::error::{CaptureError, ConfigError, FlowguardError, PipelineError};

/// 플로우 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum FlowEngineError {
    /// 캡처 인터페이스를 찾을 수 없음
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// datalink 채널 열기 실패
    #[error("failed to open capture channel on '{interface}': {reason}")]
    ChannelOpen {
        /// 인터페이스 이름
        interface: String,
        /// 실패 사유
        reason: String,
    },

    /// 패킷 소스 읽기 실패
    #[error("packet source error: {0}")]
    Source(String),

    /// 차단 규칙 로딩/검증 실패
    #[error("blocklist error: {path}: {reason}")]
    Blocklist {
        /// 규칙 파일 경로 (메모리 입력이면 `<inline>`)
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 분류기 모델 로딩/검증 실패
    #[error("model load error: {path}: {reason}")]
    ModelLoad {
        /// 모델 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 분류 중 에러
    #[error("classification failed: {0}")]
    Classify(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FlowEngineError> for FlowguardError {
    fn from(err: FlowEngineError) -> Self {
        match err {
            FlowEngineError::InterfaceNotFound(name) => {
                FlowguardError::Capture(CaptureError::InterfaceNotFound(name))
            }
            FlowEngineError::ChannelOpen { .. } | FlowEngineError::Source(_) => {
                FlowguardError::Capture(CaptureError::ChannelOpen(err.to_string()))
            }
            FlowEngineError::ModelLoad { .. } | FlowEngineError::Classify(_) => {
                FlowguardError::Capture(CaptureError::Classifier(err.to_string()))
            }
            FlowEngineError::Config { field, reason } => {
                FlowguardError::Config(ConfigError::InvalidValue { field, reason })
            }
            FlowEngineError::Io(e) => FlowguardError::Io(e),
            FlowEngineError::Blocklist { .. } => {
                FlowguardError::Pipeline(PipelineError::InitFailed(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_open_display_includes_interface() {
        let err = FlowEngineError::ChannelOpen {
            interface: "eth9".to_owned(),
            reason: "permission denied".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("eth9"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn interface_not_found_maps_to_capture_error() {
        let err: FlowguardError = FlowEngineError::InterfaceNotFound("wlan7".to_owned()).into();
        assert!(matches!(
            err,
            FlowguardError::Capture(CaptureError::InterfaceNotFound(ref name)) if name == "wlan7"
        ));
    }

    #[test]
    fn model_errors_map_to_classifier_error() {
        let err: FlowguardError = FlowEngineError::ModelLoad {
            path: "/tmp/knn.json".to_owned(),
            reason: "k is zero".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            FlowguardError::Capture(CaptureError::Classifier(_))
        ));
    }

    #[test]
    fn config_error_keeps_field() {
        let err: FlowguardError = FlowEngineError::Config {
            field: "flow.max_flows".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            FlowguardError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "flow.max_flows"
        ));
    }

    #[test]
    fn blocklist_error_maps_to_init_failed() {
        let err: FlowguardError = FlowEngineError::Blocklist {
            path: "<inline>".to_owned(),
            reason: "duplicate id".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            FlowguardError::Pipeline(PipelineError::InitFailed(_))
        ));
    }
}
