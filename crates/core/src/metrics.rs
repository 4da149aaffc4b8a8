//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 레코더가 설치되지 않은 경우 호출은 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `flowguard_`
//! - 모듈명: `capture_`, `flow_`, `classifier_`, `delivery_`, `correlator_`, `daemon_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(flowguard_core::metrics::CAPTURE_PACKETS_PROCESSED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 프로토콜 레이블 키 (tcp, udp, ip)
pub const LABEL_PROTOCOL: &str = "protocol";

/// 심각도 레이블 키 (info, low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// 모듈 레이블 키
pub const LABEL_MODULE: &str = "module";

/// 실패 단계 레이블 키 (traffic, incident)
pub const LABEL_STAGE: &str = "stage";

/// 규칙 ID 레이블 키
pub const LABEL_RULE: &str = "rule";

// ─── Capture 메트릭 ────────────────────────────────────────────────

/// Capture: 수신한 전체 프레임 수 (counter)
pub const CAPTURE_FRAMES_TOTAL: &str = "flowguard_capture_frames_total";

/// Capture: 피처 레코드까지 처리된 패킷 수 (counter, label: protocol)
pub const CAPTURE_PACKETS_PROCESSED_TOTAL: &str = "flowguard_capture_packets_processed_total";

/// Capture: 파싱 실패로 버린 프레임 수 (counter)
pub const CAPTURE_PARSE_DROPS_TOTAL: &str = "flowguard_capture_parse_drops_total";

/// Capture: 소비자 부재로 버린 레코드 수 (counter)
pub const CAPTURE_ENQUEUE_DROPS_TOTAL: &str = "flowguard_capture_enqueue_drops_total";

/// Capture: 차단 목록에 매칭된 패킷 수 (counter)
pub const CAPTURE_BLOCKED_TOTAL: &str = "flowguard_capture_blocked_total";

/// Capture: 패킷 소스 읽기 에러 수 (counter)
pub const CAPTURE_SOURCE_ERRORS_TOTAL: &str = "flowguard_capture_source_errors_total";

// ─── Flow 메트릭 ───────────────────────────────────────────────────

/// Flow: 현재 추적 중인 플로우 수 (gauge)
pub const FLOW_ACTIVE: &str = "flowguard_flow_active";

/// Flow: idle timeout 또는 용량 초과로 제거된 플로우 수 (counter)
pub const FLOW_EVICTED_TOTAL: &str = "flowguard_flow_evicted_total";

// ─── Classifier 메트릭 ─────────────────────────────────────────────

/// Classifier: 실패 후 Normal로 대체된 횟수 (counter)
pub const CLASSIFIER_FAILURES_TOTAL: &str = "flowguard_classifier_failures_total";

// ─── Delivery 메트릭 ───────────────────────────────────────────────

/// Delivery: sink에 전달된 트래픽 레코드 수 (counter)
pub const DELIVERY_RECORDS_TOTAL: &str = "flowguard_delivery_records_total";

/// Delivery: sink 쓰기 실패 수 (counter, label: stage)
pub const DELIVERY_FAILURES_TOTAL: &str = "flowguard_delivery_failures_total";

/// Delivery: 종료 시 폐기된 대기 레코드 수 (counter)
pub const DELIVERY_ABANDONED_TOTAL: &str = "flowguard_delivery_abandoned_total";

// ─── Correlator 메트릭 ─────────────────────────────────────────────

/// Correlator: 생성된 인시던트 수 (counter, label: severity)
pub const CORRELATOR_INCIDENTS_TOTAL: &str = "flowguard_correlator_incidents_total";

/// Correlator: 발동된 대응 규칙 수 (counter, label: rule)
pub const CORRELATOR_RULES_TRIGGERED_TOTAL: &str = "flowguard_correlator_rules_triggered_total";

/// Correlator: 조건 파싱에 실패한 규칙 평가 수 (counter)
pub const CORRELATOR_RULE_PARSE_ERRORS_TOTAL: &str =
    "flowguard_correlator_rule_parse_errors_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "flowguard_daemon_uptime_seconds";

/// Daemon: 등록된 모듈 수 (gauge)
pub const DAEMON_MODULES_REGISTERED: &str = "flowguard_daemon_modules_registered";

/// Daemon: 빌드 정보 (gauge, 항상 1, labels: version)
pub const DAEMON_BUILD_INFO: &str = "flowguard_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Capture
    describe_counter!(
        CAPTURE_FRAMES_TOTAL,
        "Total number of frames read from the packet source"
    );
    describe_counter!(
        CAPTURE_PACKETS_PROCESSED_TOTAL,
        "Packets turned into feature records, per protocol"
    );
    describe_counter!(
        CAPTURE_PARSE_DROPS_TOTAL,
        "Frames dropped because the IP or transport header was missing or truncated"
    );
    describe_counter!(
        CAPTURE_ENQUEUE_DROPS_TOTAL,
        "Records dropped because the delivery queue consumer was gone"
    );
    describe_counter!(
        CAPTURE_BLOCKED_TOTAL,
        "Packets that matched a blocklist rule"
    );
    describe_counter!(
        CAPTURE_SOURCE_ERRORS_TOTAL,
        "Read errors returned by the packet source"
    );

    // Flow
    describe_gauge!(FLOW_ACTIVE, "Number of flows currently tracked");
    describe_counter!(
        FLOW_EVICTED_TOTAL,
        "Flows evicted by idle timeout or table capacity"
    );

    // Classifier
    describe_counter!(
        CLASSIFIER_FAILURES_TOTAL,
        "Classifier errors replaced with a Normal verdict"
    );

    // Delivery
    describe_counter!(
        DELIVERY_RECORDS_TOTAL,
        "Traffic records taken off the delivery queue"
    );
    describe_counter!(
        DELIVERY_FAILURES_TOTAL,
        "Sink write failures, per stage"
    );
    describe_counter!(
        DELIVERY_ABANDONED_TOTAL,
        "Queued records abandoned at shutdown"
    );

    // Correlator
    describe_counter!(
        CORRELATOR_INCIDENTS_TOTAL,
        "Incidents created, per severity"
    );
    describe_counter!(
        CORRELATOR_RULES_TRIGGERED_TOTAL,
        "Response rule triggers, per rule"
    );
    describe_counter!(
        CORRELATOR_RULE_PARSE_ERRORS_TOTAL,
        "Rule evaluations skipped because the condition failed to parse"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Flowguard daemon uptime in seconds");
    describe_gauge!(
        DAEMON_MODULES_REGISTERED,
        "Number of modules registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
