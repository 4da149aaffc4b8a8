//! 인시던트 상관 분석
//!
//! [`IncidentCorrelator`]는 분류된 트래픽 레코드에서 인시던트를 만들지
//! 결정하고 위협 유형, 심각도, 신뢰도를 계산합니다.
//!
//! # 위협 유형 (먼저 일치하는 규칙 우선)
//! 1. 출발지/목적지 IP와 포트가 동일 → `IP/Port Spoofing`
//! 2. TCP, 상태 SYN/SA, rate > 100 → `DoS/SYN_Flood`
//! 3. dns 서비스, rate > 50 → `DNS_Anomaly`
//! 4. http/https 서비스, rate > 80 → `HTTP_Anomaly`
//! 5. 그 외에는 프로토콜 이름
//!
//! [`IncidentCorrelator::assess`]는 시각과 ID를 제외한 결정적 부분만
//! 계산하므로 같은 레코드에 대해 항상 같은 결과를 냅니다.

use chrono::Utc;
use flowguard_core::types::{
    Incident, IncidentStatus, Protocol, Service, Severity, ThreatType, TrafficRecord,
    TrafficStatus,
};

/// SYN flood 판정 rate 임계값
pub const SYN_FLOOD_RATE: f64 = 100.0;
/// DNS 이상 판정 rate 임계값
pub const DNS_ANOMALY_RATE: f64 = 50.0;
/// HTTP 이상 판정 rate 임계값
pub const HTTP_ANOMALY_RATE: f64 = 80.0;
/// High 상향 rate 임계값
pub const HIGH_SEVERITY_RATE: f64 = 200.0;
/// Critical 상향 rate 임계값
pub const CRITICAL_SEVERITY_RATE: f64 = 500.0;

const MIN_CONFIDENCE: i32 = 50;
const MAX_CONFIDENCE: i32 = 99;

/// 인시던트 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub threat_type: ThreatType,
    pub severity: Severity,
    /// [50, 99]
    pub confidence: u8,
    pub status: IncidentStatus,
}

/// 인시던트 상관 분석기
///
/// 상태가 없으므로 여러 전달 루프에서 공유해도 됩니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncidentCorrelator;

impl IncidentCorrelator {
    pub fn new() -> Self {
        Self
    }

    /// 레코드가 인시던트 대상인지 판정합니다.
    ///
    /// 레이블이 anomalous이거나 상태가 Anomalous/Blocked이면 대상입니다.
    pub fn is_incident(record: &TrafficRecord) -> bool {
        record.label == 1
            || matches!(
                record.status,
                TrafficStatus::Anomalous | TrafficStatus::Blocked
            )
    }

    /// 인시던트 대상이면 위협 유형, 심각도, 신뢰도, 상태를 계산합니다.
    pub fn assess(&self, record: &TrafficRecord) -> Option<Assessment> {
        if !Self::is_incident(record) {
            return None;
        }

        let rate = record.rate();
        let spoofing = record.features.same_ips_ports();
        let blocked = record.status == TrafficStatus::Blocked;
        let handshake = record.features.protocol == Protocol::Tcp
            && record.features.state.is_some_and(|s| s.is_handshake());
        let service = record.features.service;

        let threat_type = if spoofing {
            ThreatType::IpPortSpoofing
        } else if handshake && rate > SYN_FLOOD_RATE {
            ThreatType::SynFlood
        } else if service == Some(Service::Dns) && rate > DNS_ANOMALY_RATE {
            ThreatType::DnsAnomaly
        } else if service.is_some_and(|s| s.is_web()) && rate > HTTP_ANOMALY_RATE {
            ThreatType::HttpAnomaly
        } else {
            ThreatType::Protocol(record.features.protocol)
        };

        let mut severity = record.severity.unwrap_or(Severity::Medium);
        if blocked || spoofing || rate > HIGH_SEVERITY_RATE {
            severity = severity.max(Severity::High);
        }
        if rate > CRITICAL_SEVERITY_RATE {
            severity = Severity::Critical;
        }

        // 여기까지 왔다면 anomalous 또는 blocked
        let mut confidence = 65;
        if rate > DNS_ANOMALY_RATE {
            confidence += 10;
        }
        if rate > HIGH_SEVERITY_RATE {
            confidence += 10;
        }
        if rate > CRITICAL_SEVERITY_RATE {
            confidence += 10;
        }
        if spoofing {
            confidence += 15;
        }
        if handshake {
            confidence += 10;
        }
        let named_service = matches!(
            service,
            Some(Service::Dns | Service::Http | Service::Https)
        );
        if named_service && rate > HTTP_ANOMALY_RATE {
            confidence += 5;
        }
        let confidence = confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE) as u8;

        let status = if blocked {
            IncidentStatus::Blocked
        } else {
            IncidentStatus::Active
        };

        Some(Assessment {
            threat_type,
            severity,
            confidence,
            status,
        })
    }

    /// 인시던트를 생성합니다. 대상이 아니면 `None`.
    pub fn correlate(&self, record: &TrafficRecord) -> Option<Incident> {
        let assessment = self.assess(record)?;
        let features = &record.features;

        Some(Incident {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source_ip: features.source_ip,
            destination_ip: features.destination_ip,
            threat_type: assessment.threat_type,
            severity: assessment.severity,
            status: assessment.status,
            description: format!(
                "Detected {} traffic from {} to {} via {}",
                record.status.to_string().to_lowercase(),
                features.source_ip,
                features.destination_ip,
                features.protocol,
            ),
            confidence: assessment.confidence,
        })
    }
}
