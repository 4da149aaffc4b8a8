//! correlator 에러 타입
//!
//! [`CorrelatorError`]는 규칙 로딩, sink, 라이브 피드 등 correlator 내부의
//! 에러를 표현합니다. `From<CorrelatorError> for FlowguardError`로 상위
//! 레이어에 전파됩니다.

use flowguard_core::error::{ConfigError, FlowguardError, PipelineError, StorageError};

use crate::rule::ConditionError;

/// correlator 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad { path: String, reason: String },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation { rule_id: String, reason: String },

    /// 조건식 파싱 실패
    #[error("invalid condition: {0}")]
    Condition(#[from] ConditionError),

    /// 존재하지 않는 규칙
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    /// 대응 이력 기록 실패
    #[error("action log error: {0}")]
    ActionLog(String),

    /// sink 쓰기/열기 실패
    #[error("sink error: {0}")]
    Sink(String),

    /// 직렬화 실패
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config { field: String, reason: String },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CorrelatorError> for FlowguardError {
    fn from(err: CorrelatorError) -> Self {
        match err {
            CorrelatorError::Sink(reason) => StorageError::Query(reason).into(),
            CorrelatorError::Config { field, reason } => {
                ConfigError::InvalidValue { field, reason }.into()
            }
            CorrelatorError::Io(e) => FlowguardError::Io(e),
            other => PipelineError::InitFailed(other.to_string()).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_load_error_display() {
        let err = CorrelatorError::RuleLoad {
            path: "/etc/flowguard/rules.yml".to_owned(),
            reason: "invalid YAML".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rules.yml"));
        assert!(msg.contains("invalid YAML"));
    }

    #[test]
    fn condition_error_converts() {
        let err: CorrelatorError = ConditionError::Empty.into();
        assert!(err.to_string().contains("invalid condition"));
    }

    #[test]
    fn sink_error_becomes_storage_error() {
        let err: FlowguardError = CorrelatorError::Sink("disk full".to_owned()).into();
        assert!(matches!(err, FlowguardError::Storage(_)));
    }

    #[test]
    fn config_error_keeps_field() {
        let err: FlowguardError = CorrelatorError::Config {
            field: "correlator.feed_capacity".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(err.to_string().contains("correlator.feed_capacity"));
    }

    #[test]
    fn other_errors_become_pipeline_errors() {
        let err: FlowguardError = CorrelatorError::RuleNotFound("r1".to_owned()).into();
        assert!(matches!(err, FlowguardError::Pipeline(_)));
    }
}
