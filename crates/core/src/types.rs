//! 도메인 타입 -- 시스템 전역에서 사용되는 공통 타입
//!
//! flow-engine이 생성하는 트래픽 레코드와 correlator가 생성하는 인시던트를
//! 정의합니다. 직렬화 필드명은 UNSW-NB15 스키마를 따르며, 라이브 피드와
//! sink는 이 형태를 그대로 사용합니다.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// 정보성 이벤트
    #[default]
    Info,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 -- 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "informational" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 메트릭 레이블용 소문자 이름
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 전송 계층 프로토콜 구분
///
/// TCP/UDP 이외의 IP 프로토콜은 모두 `Other`(`"IP"`)로 취급합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "IP")]
    Other,
}

impl Protocol {
    /// `proto` 필드에 쓰이는 소문자 이름
    pub fn as_lowercase(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Other => "ip",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Other => write!(f, "IP"),
        }
    }
}

/// 포트 번호로 추정한 애플리케이션 서비스
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Http,
    Https,
    Dns,
    Ssh,
    Ftp,
    Smtp,
    Pop3,
    Imap,
    Rdp,
    Mysql,
    Postgres,
}

impl Service {
    /// 고정 포트 테이블에서 서비스를 찾습니다.
    pub fn from_port(port: u16) -> Option<Self> {
        match port {
            80 => Some(Self::Http),
            443 => Some(Self::Https),
            53 => Some(Self::Dns),
            22 => Some(Self::Ssh),
            21 => Some(Self::Ftp),
            25 => Some(Self::Smtp),
            110 => Some(Self::Pop3),
            143 => Some(Self::Imap),
            3389 => Some(Self::Rdp),
            3306 => Some(Self::Mysql),
            5432 => Some(Self::Postgres),
            _ => None,
        }
    }

    /// 출발지 포트를 먼저, 없으면 목적지 포트로 서비스를 결정합니다.
    pub fn resolve(source_port: Option<u16>, destination_port: Option<u16>) -> Option<Self> {
        source_port
            .and_then(Self::from_port)
            .or_else(|| destination_port.and_then(Self::from_port))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Dns => "dns",
            Self::Ssh => "ssh",
            Self::Ftp => "ftp",
            Self::Smtp => "smtp",
            Self::Pop3 => "pop3",
            Self::Imap => "imap",
            Self::Rdp => "rdp",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// 웹 서비스(http/https) 여부
    pub fn is_web(&self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 패킷 단위의 거친 연결 상태 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnState {
    Rst,
    Fin,
    Sa,
    Syn,
    Ack,
    /// UDP는 항상 CON
    Con,
}

impl ConnState {
    /// 핸드셰이크 진행 중 상태(SYN, SA) 여부
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Syn | Self::Sa)
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Rst => "RST",
            Self::Fin => "FIN",
            Self::Sa => "SA",
            Self::Syn => "SYN",
            Self::Ack => "ACK",
            Self::Con => "CON",
        };
        f.write_str(tag)
    }
}

/// 트래픽 판정 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficStatus {
    #[default]
    Normal,
    Anomalous,
    /// 차단 목록에 매칭된 트래픽
    Blocked,
}

impl fmt::Display for TrafficStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Anomalous => write!(f, "Anomalous"),
            Self::Blocked => write!(f, "Blocked"),
        }
    }
}

// =============================================================================
// 피처 레코드
// =============================================================================

/// 플로우 상태에서 파생된 지표
///
/// 아직 관측되지 않은 값(반대 방향 TTL, 미완성 핸드셰이크 등)은 `None`으로
/// 직렬화되며 분류기에서는 0으로 취급됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowMetrics {
    /// 플로우 시작 이후 경과 시간 (초)
    pub dur: f64,
    pub spkts: u64,
    pub dpkts: u64,
    pub sbytes: u64,
    pub dbytes: u64,
    /// 초당 패킷 수
    pub rate: f64,
    /// 초당 바이트 (출발 방향)
    pub sload: f64,
    /// 초당 바이트 (도착 방향)
    pub dload: f64,
    pub sinpkt: Option<f64>,
    pub dinpkt: Option<f64>,
    pub sjit: f64,
    pub djit: f64,
    pub smean: f64,
    pub dmean: f64,
    pub sttl: Option<u8>,
    pub dttl: Option<u8>,
    pub swin: Option<u16>,
    pub dwin: Option<u16>,
    pub stcpb: Option<u32>,
    pub dtcpb: Option<u32>,
    pub synack: Option<f64>,
    pub tcprtt: Option<f64>,
    pub ackdat: Option<f64>,
}

/// 최근 이벤트 윈도우에서 계산한 근사 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingCounters {
    /// 같은 출발지 + 같은 서비스
    pub ct_srv_src: u32,
    /// 같은 상태 + 같은 TTL
    pub ct_state_ttl: u32,
    /// 같은 목적지
    pub ct_dst_ltm: u32,
    /// 같은 출발지 + 같은 목적지 포트
    pub ct_src_dport_ltm: u32,
    /// 같은 목적지 + 같은 출발지 포트
    pub ct_dst_sport_ltm: u32,
    /// 같은 목적지 + 같은 출발지
    pub ct_dst_src_ltm: u32,
    /// 같은 출발지
    pub ct_src_ltm: u32,
    /// 같은 출발지 + 같은 목적지 + 같은 서비스
    pub ct_srv_dst: u32,
}

/// 패킷 하나당 생성되는 피처 레코드
///
/// 패킷 식별 정보, 플로우 지표, 서비스/상태, 롤링 카운터를 평탄한
/// JSON 객체로 직렬화합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// 레코드 고유 ID (UUID v4)
    pub id: String,
    /// 관측 시각 (RFC 3339)
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    pub protocol: Protocol,
    /// 소문자 프로토콜 이름
    pub proto: String,
    /// IP 계층 길이
    pub bytes: u32,
    #[serde(flatten)]
    pub flow: FlowMetrics,
    pub service: Option<Service>,
    pub state: Option<ConnState>,
    /// 출발지와 목적지의 IP와 포트가 모두 같으면 1
    pub is_sm_ips_ports: u8,
    #[serde(flatten)]
    pub counters: RollingCounters,
}

impl FeatureRecord {
    /// 출발지/목적지 IP와 포트가 동일한지 여부
    pub fn same_ips_ports(&self) -> bool {
        self.is_sm_ips_ports == 1
    }

    /// UNSW-NB15 피처 이름으로 수치 값을 조회합니다.
    ///
    /// 라이브 캡처에서 계산하지 않는 피처(`sloss`, `trans_depth` 등)와
    /// 알 수 없는 이름은 0을 반환합니다.
    pub fn feature_value(&self, name: &str) -> f64 {
        let f = &self.flow;
        let c = &self.counters;
        match name {
            "dur" => f.dur,
            "spkts" => f.spkts as f64,
            "dpkts" => f.dpkts as f64,
            "sbytes" => f.sbytes as f64,
            "dbytes" => f.dbytes as f64,
            "rate" => f.rate,
            "sload" => f.sload,
            "dload" => f.dload,
            "sinpkt" => f.sinpkt.unwrap_or(0.0),
            "dinpkt" => f.dinpkt.unwrap_or(0.0),
            "sjit" => f.sjit,
            "djit" => f.djit,
            "smean" => f.smean,
            "dmean" => f.dmean,
            "sttl" => f.sttl.map_or(0.0, f64::from),
            "dttl" => f.dttl.map_or(0.0, f64::from),
            "swin" => f.swin.map_or(0.0, f64::from),
            "dwin" => f.dwin.map_or(0.0, f64::from),
            "stcpb" => f.stcpb.map_or(0.0, f64::from),
            "dtcpb" => f.dtcpb.map_or(0.0, f64::from),
            "synack" => f.synack.unwrap_or(0.0),
            "tcprtt" => f.tcprtt.unwrap_or(0.0),
            "ackdat" => f.ackdat.unwrap_or(0.0),
            "is_sm_ips_ports" => f64::from(self.is_sm_ips_ports),
            "ct_srv_src" => f64::from(c.ct_srv_src),
            "ct_state_ttl" => f64::from(c.ct_state_ttl),
            "ct_dst_ltm" => f64::from(c.ct_dst_ltm),
            "ct_src_dport_ltm" => f64::from(c.ct_src_dport_ltm),
            "ct_dst_sport_ltm" => f64::from(c.ct_dst_sport_ltm),
            "ct_dst_src_ltm" => f64::from(c.ct_dst_src_ltm),
            "ct_src_ltm" => f64::from(c.ct_src_ltm),
            "ct_srv_dst" => f64::from(c.ct_srv_dst),
            _ => 0.0,
        }
    }
}

impl fmt::Display for FeatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} {} len={}",
            self.source_ip,
            self.source_port.unwrap_or(0),
            self.destination_ip,
            self.destination_port.unwrap_or(0),
            self.protocol,
            self.bytes,
        )
    }
}

// =============================================================================
// 분류 결과
// =============================================================================

/// 분류기 레이블
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassLabel {
    #[default]
    Normal,
    Anomalous,
}

/// 클래스별 확률
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub normal: f64,
    pub anomalous: f64,
}

/// 분류기 출력
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// 예측 인덱스 (0 normal, 1 anomalous)
    pub prediction: u8,
    pub label: ClassLabel,
    /// 최대 클래스 확률, [0, 1]
    pub confidence: f64,
    /// 모델이 없거나 실패한 경우 `None`
    pub probabilities: Option<ClassProbabilities>,
}

impl Classification {
    /// 분류 실패 시 사용하는 결과 (Normal, 신뢰도 0)
    pub fn fail_closed() -> Self {
        Self {
            prediction: 0,
            label: ClassLabel::Normal,
            confidence: 0.0,
            probabilities: None,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        self.label == ClassLabel::Anomalous
    }
}

/// 분류까지 끝난 트래픽 레코드 -- DeliveryQueue의 페이로드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    #[serde(flatten)]
    pub features: FeatureRecord,
    pub status: TrafficStatus,
    pub severity: Option<Severity>,
    /// `[normal, anomalous]`, 모델이 없으면 빈 배열
    pub probs: Vec<f64>,
    pub pred_idx: u8,
    pub pred_prob: f64,
    /// 0 normal, 1 anomalous
    pub label: u8,
}

impl TrafficRecord {
    /// 피처 레코드와 분류 결과를 결합합니다.
    ///
    /// 트래픽 행의 심각도는 anomalous면 `Critical`, 그 외에는 `Low`입니다.
    pub fn new(features: FeatureRecord, classification: &Classification, blocked: bool) -> Self {
        let status = if blocked {
            TrafficStatus::Blocked
        } else if classification.is_anomalous() {
            TrafficStatus::Anomalous
        } else {
            TrafficStatus::Normal
        };
        let severity = if classification.is_anomalous() {
            Severity::Critical
        } else {
            Severity::Low
        };
        let probs = classification
            .probabilities
            .map(|p| vec![p.normal, p.anomalous])
            .unwrap_or_default();

        Self {
            features,
            status,
            severity: Some(severity),
            probs,
            pred_idx: classification.prediction,
            pred_prob: classification.confidence,
            label: u8::from(classification.prediction != 0),
        }
    }

    pub fn id(&self) -> &str {
        &self.features.id
    }

    pub fn rate(&self) -> f64 {
        self.features.flow.rate
    }
}

// =============================================================================
// 인시던트
// =============================================================================

/// 위협 유형
///
/// 특정 패턴에 해당하지 않으면 프로토콜 이름으로 표기합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatType {
    IpPortSpoofing,
    SynFlood,
    DnsAnomaly,
    HttpAnomaly,
    Protocol(Protocol),
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IpPortSpoofing => write!(f, "IP/Port Spoofing"),
            Self::SynFlood => write!(f, "DoS/SYN_Flood"),
            Self::DnsAnomaly => write!(f, "DNS_Anomaly"),
            Self::HttpAnomaly => write!(f, "HTTP_Anomaly"),
            Self::Protocol(p) => write!(f, "{p}"),
        }
    }
}

impl FromStr for ThreatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IP/Port Spoofing" => Ok(Self::IpPortSpoofing),
            "DoS/SYN_Flood" => Ok(Self::SynFlood),
            "DNS_Anomaly" => Ok(Self::DnsAnomaly),
            "HTTP_Anomaly" => Ok(Self::HttpAnomaly),
            "TCP" => Ok(Self::Protocol(Protocol::Tcp)),
            "UDP" => Ok(Self::Protocol(Protocol::Udp)),
            "IP" => Ok(Self::Protocol(Protocol::Other)),
            other => Err(format!("unknown threat type: {other}")),
        }
    }
}

impl Serialize for ThreatType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ThreatType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 인시던트 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentStatus {
    #[default]
    Active,
    Blocked,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Blocked => write!(f, "Blocked"),
        }
    }
}

/// 이상 트래픽에서 생성된 보안 인시던트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub description: String,
    /// 신뢰도 점수, [50, 99]
    pub confidence: u8,
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} -> {} (confidence={})",
            self.severity, self.threat_type, self.source_ip, self.destination_ip, self.confidence,
        )
    }
}
