//! 캡처 통계 -- 캡처 스레드가 갱신하고 엔진/데몬이 조회하는 누적 카운터
//!
//! 카운터는 원자 변수이므로 캡처 스레드와 조회 측이 락 없이 공유합니다.
//! 각 기록 함수는 Prometheus 메트릭도 함께 갱신합니다.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use flowguard_core::metrics as m;
use flowguard_core::types::Protocol;

/// 캡처 누적 통계
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames: AtomicU64,
    processed: AtomicU64,
    parse_drops: AtomicU64,
    enqueue_drops: AtomicU64,
    blocked: AtomicU64,
    anomalous: AtomicU64,
    source_errors: AtomicU64,
    active_flows: AtomicUsize,
    flow_capacity: AtomicUsize,
    evicted_flows: AtomicU64,
}

/// 특정 시점의 통계 값
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStatsSnapshot {
    pub frames: u64,
    pub processed: u64,
    pub parse_drops: u64,
    pub enqueue_drops: u64,
    pub blocked: u64,
    pub anomalous: u64,
    pub source_errors: u64,
    pub active_flows: usize,
    pub flow_capacity: usize,
    pub evicted_flows: u64,
}

impl CaptureStatsSnapshot {
    /// 플로우 테이블이 가득 찼는지
    pub fn flow_table_full(&self) -> bool {
        self.flow_capacity > 0 && self.active_flows >= self.flow_capacity
    }

    /// 파싱 실패 비율 (프레임이 없으면 0)
    pub fn parse_drop_ratio(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.parse_drops as f64 / self.frames as f64
        }
    }
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::CAPTURE_FRAMES_TOTAL).increment(1);
    }

    pub fn record_parse_drop(&self) {
        self.parse_drops.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::CAPTURE_PARSE_DROPS_TOTAL).increment(1);
    }

    pub fn record_processed(&self, protocol: Protocol, anomalous: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if anomalous {
            self.anomalous.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!(
            m::CAPTURE_PACKETS_PROCESSED_TOTAL,
            m::LABEL_PROTOCOL => protocol.as_lowercase()
        )
        .increment(1);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::CAPTURE_BLOCKED_TOTAL).increment(1);
    }

    pub fn record_enqueue_drop(&self) {
        self.enqueue_drops.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::CAPTURE_ENQUEUE_DROPS_TOTAL).increment(1);
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::CAPTURE_SOURCE_ERRORS_TOTAL).increment(1);
    }

    /// 플로우 테이블 크기와 축출 누계를 반영합니다.
    pub fn set_flow_table(&self, active: usize, capacity: usize, evicted: u64) {
        self.active_flows.store(active, Ordering::Relaxed);
        self.flow_capacity.store(capacity, Ordering::Relaxed);
        self.evicted_flows.store(evicted, Ordering::Relaxed);
        metrics::gauge!(m::FLOW_ACTIVE).set(active as f64);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            parse_drops: self.parse_drops.load(Ordering::Relaxed),
            enqueue_drops: self.enqueue_drops.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            anomalous: self.anomalous.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            active_flows: self.active_flows.load(Ordering::Relaxed),
            flow_capacity: self.flow_capacity.load(Ordering::Relaxed),
            evicted_flows: self.evicted_flows.load(Ordering::Relaxed),
        }
    }
}
