//! 이벤트 시스템 -- 모듈 간 통신의 기본 단위
//!
//! 캡처 도메인과 전달 도메인 사이의 통신은 이벤트 기반 메시지 패싱으로
//! 수행됩니다. [`EventMetadata`]는 모든 이벤트에 공통으로 포함되는
//! 메타데이터이며, [`Event`] trait은 모든 이벤트 타입이 구현해야 하는
//! 인터페이스입니다.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::{Incident, TrafficRecord};

// --- 모듈명 상수 ---

/// 플로우 엔진 모듈명
pub const MODULE_FLOW_ENGINE: &str = "flow-engine";
/// 상관 분석기 모듈명
pub const MODULE_CORRELATOR: &str = "correlator";

// --- 이벤트 타입 상수 ---

/// 트래픽 이벤트 타입
pub const EVENT_TYPE_TRAFFIC: &str = "traffic";
/// 인시던트 이벤트 타입
pub const EVENT_TYPE_INCIDENT: &str = "incident";

/// 이벤트 메타데이터 -- 모든 이벤트에 공통으로 포함되는 추적 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명 (예: "flow-engine", "correlator")
    pub source_module: String,
    /// 추적 ID -- 트래픽 레코드와 그로부터 생성된 인시던트를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self::new(source_module, uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        write!(
            f,
            "[{}] source={} trace={}",
            secs, self.source_module, self.trace_id,
        )
    }
}

/// 모든 이벤트가 구현해야 하는 기본 trait
///
/// `Send + Sync + 'static` 바운드로 `tokio::mpsc` 채널을 통한
/// 안전한 전송을 보장합니다.
pub trait Event: Send + Sync + 'static {
    /// 이벤트 고유 ID
    fn event_id(&self) -> &str;

    /// 이벤트 메타데이터
    fn metadata(&self) -> &EventMetadata;

    /// 이벤트 타입명 (로깅 및 라우팅에 사용)
    fn event_type(&self) -> &str;
}

/// 분류된 트래픽 레코드 이벤트 -- DeliveryQueue의 메시지
///
/// 이벤트 ID는 레코드 ID와 같습니다.
#[derive(Debug, Clone)]
pub struct TrafficEvent {
    pub metadata: EventMetadata,
    pub record: TrafficRecord,
}

impl TrafficEvent {
    /// 새로운 trace를 시작하는 트래픽 이벤트를 생성합니다.
    pub fn new(record: TrafficRecord) -> Self {
        Self {
            metadata: EventMetadata::with_new_trace(MODULE_FLOW_ENGINE),
            record,
        }
    }
}

impl Event for TrafficEvent {
    fn event_id(&self) -> &str {
        self.record.id()
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_TRAFFIC
    }
}

impl fmt::Display for TrafficEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.record.id();
        write!(
            f,
            "TrafficEvent[{}] {} status={}",
            &id[..8.min(id.len())],
            self.record.features,
            self.record.status,
        )
    }
}

/// 인시던트 이벤트
///
/// 원본 트래픽 이벤트의 trace_id를 이어받습니다.
#[derive(Debug, Clone)]
pub struct IncidentEvent {
    pub metadata: EventMetadata,
    pub incident: Incident,
}

impl IncidentEvent {
    /// 기존 trace에 연결된 인시던트 이벤트를 생성합니다.
    pub fn with_trace(incident: Incident, trace_id: impl Into<String>) -> Self {
        Self {
            metadata: EventMetadata::new(MODULE_CORRELATOR, trace_id),
            incident,
        }
    }
}

impl Event for IncidentEvent {
    fn event_id(&self) -> &str {
        &self.incident.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_INCIDENT
    }
}

impl fmt::Display for IncidentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IncidentEvent[{}] {}",
            &self.incident.id[..8.min(self.incident.id.len())],
            self.incident,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Classification, FeatureRecord, FlowMetrics, IncidentStatus, Protocol, RollingCounters,
        Severity, ThreatType,
    };
    use chrono::Utc;

    fn sample_record() -> TrafficRecord {
        let features = FeatureRecord {
            id: "3f2c9a1e-0000-4000-8000-000000000001".to_owned(),
            timestamp: Utc::now(),
            source_ip: "192.168.1.10".parse().unwrap(),
            destination_ip: "8.8.8.8".parse().unwrap(),
            source_port: Some(5353),
            destination_port: Some(53),
            protocol: Protocol::Udp,
            proto: "udp".to_owned(),
            bytes: 80,
            flow: FlowMetrics::default(),
            service: None,
            state: None,
            is_sm_ips_ports: 0,
            counters: RollingCounters::default(),
        };
        TrafficRecord::new(features, &Classification::fail_closed(), false)
    }

    #[test]
    fn event_metadata_new_preserves_trace_id() {
        let meta = EventMetadata::new("test-module", "trace-abc-123");
        assert_eq!(meta.source_module, "test-module");
        assert_eq!(meta.trace_id, "trace-abc-123");
        assert!(meta.timestamp <= SystemTime::now());
    }

    #[test]
    fn event_metadata_with_new_trace_generates_uuid() {
        let meta = EventMetadata::with_new_trace("test-module");
        assert_eq!(meta.trace_id.len(), 36);
        assert_eq!(meta.trace_id.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn traffic_event_uses_record_id() {
        let event = TrafficEvent::new(sample_record());
        assert_eq!(event.event_id(), "3f2c9a1e-0000-4000-8000-000000000001");
        assert_eq!(event.event_type(), EVENT_TYPE_TRAFFIC);
        assert_eq!(event.metadata().source_module, MODULE_FLOW_ENGINE);
    }

    #[test]
    fn traffic_event_display_is_short() {
        let event = TrafficEvent::new(sample_record());
        let display = event.to_string();
        assert!(display.starts_with("TrafficEvent[3f2c9a1e]"));
        assert!(display.contains("8.8.8.8:53"));
    }

    #[test]
    fn incident_event_keeps_trace() {
        let traffic = TrafficEvent::new(sample_record());
        let incident = Incident {
            id: "inc-1".to_owned(),
            timestamp: Utc::now(),
            source_ip: "192.168.1.10".parse().unwrap(),
            destination_ip: "8.8.8.8".parse().unwrap(),
            threat_type: ThreatType::Protocol(Protocol::Udp),
            severity: Severity::Medium,
            status: IncidentStatus::Active,
            description: String::new(),
            confidence: 65,
        };
        let event = IncidentEvent::with_trace(incident, traffic.metadata.trace_id.clone());
        assert_eq!(event.metadata.trace_id, traffic.metadata.trace_id);
        assert_eq!(event.metadata.source_module, MODULE_CORRELATOR);
        assert_eq!(event.event_id(), "inc-1");
    }
}
