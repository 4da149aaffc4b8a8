//! correlator 설정
//!
//! [`CorrelationConfig`]는 core의 `[correlator]` 섹션을 전달 루프가 쓰는 단위로
//! 변환합니다. sink 설정은 [`ConfiguredSink::from_config`](crate::sink::ConfiguredSink::from_config)가
//! core의 `[sink]` 섹션을 직접 사용합니다.

use std::time::Duration;

use flowguard_core::config::FlowguardConfig;

use crate::error::CorrelatorError;

/// correlator 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationConfig {
    /// 레코드 사이 대기 시간
    pub delivery_interval: Duration,
    /// 대응 규칙 YAML 경로 (빈 문자열이면 규칙 없음)
    pub rules_path: String,
    /// 라이브 피드 broadcast 버퍼 크기
    pub feed_capacity: usize,
    /// 라이브 피드 JSON lines 파일 (빈 문자열이면 파일 없음)
    pub feed_path: String,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self::from_core(&FlowguardConfig::default())
    }
}

impl CorrelationConfig {
    pub fn from_core(config: &FlowguardConfig) -> Self {
        Self {
            delivery_interval: Duration::from_millis(config.correlator.delivery_interval_ms),
            rules_path: config.correlator.rules_path.clone(),
            feed_capacity: config.correlator.feed_capacity,
            feed_path: config.correlator.feed_path.clone(),
        }
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), CorrelatorError> {
        if self.delivery_interval.is_zero() {
            return Err(CorrelatorError::Config {
                field: "correlator.delivery_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.feed_capacity == 0 {
            return Err(CorrelatorError::Config {
                field: "correlator.feed_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}
