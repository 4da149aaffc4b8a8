//! 플로우 엔진 설정
//!
//! [`EngineConfig`]는 core의 `[capture]`, `[flow]` 섹션을 엔진이 쓰는 단위
//! (`Duration`, 용량)로 변환한 값입니다. `from_core()`로 생성합니다.

use std::time::Duration;

use flowguard_core::config::{FlowguardConfig, MAX_WINDOW_CAPACITY};

use crate::error::FlowEngineError;

/// 플로우 엔진 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// 라이브 캡처 인터페이스
    pub interface: String,
    pub promiscuous: bool,
    /// 캡처 루프가 종료 신호를 확인하는 주기
    pub read_timeout: Duration,
    /// 차단 규칙 파일 (빈 문자열이면 규칙 없음)
    pub blocklist_path: String,
    /// 패킷 시각 기준 idle timeout
    pub idle_timeout: Duration,
    /// 플로우 테이블 최대 크기
    pub max_flows: usize,
    /// 이벤트 윈도우 크기
    pub window_capacity: usize,
    /// 라이브 버퍼 크기
    pub live_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_core(&FlowguardConfig::default())
    }
}

impl EngineConfig {
    /// core 설정에서 엔진 설정을 생성합니다.
    pub fn from_core(config: &FlowguardConfig) -> Self {
        Self {
            interface: config.capture.interface.clone(),
            promiscuous: config.capture.promiscuous,
            read_timeout: Duration::from_millis(config.capture.read_timeout_ms),
            blocklist_path: config.capture.blocklist_path.clone(),
            idle_timeout: Duration::from_secs(config.flow.idle_timeout_secs),
            max_flows: config.flow.max_flows,
            window_capacity: config.flow.window_capacity,
            live_buffer_capacity: config.flow.live_buffer_capacity,
        }
    }

    /// 엔진 단독 사용 시의 검증. 데몬 경로에서는 core `validate()`가 먼저 실행됩니다.
    pub fn validate(&self) -> Result<(), FlowEngineError> {
        let invalid = |field: &str, reason: &str| FlowEngineError::Config {
            field: field.to_owned(),
            reason: reason.to_owned(),
        };

        if self.read_timeout.is_zero() {
            return Err(invalid("capture.read_timeout_ms", "must be greater than 0"));
        }
        if self.idle_timeout.is_zero() {
            return Err(invalid("flow.idle_timeout_secs", "must be greater than 0"));
        }
        if self.max_flows == 0 {
            return Err(invalid("flow.max_flows", "must be greater than 0"));
        }
        if self.window_capacity == 0 || self.window_capacity > MAX_WINDOW_CAPACITY {
            return Err(invalid("flow.window_capacity", "must be between 1 and 100"));
        }
        if self.live_buffer_capacity == 0 {
            return Err(invalid("flow.live_buffer_capacity", "must be greater than 0"));
        }
        Ok(())
    }
}
