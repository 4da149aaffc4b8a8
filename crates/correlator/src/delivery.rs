//! 속도 제한 전달 루프
//!
//! 캡처 도메인이 채운 무제한 mpsc 큐(DeliveryQueue)에서 레코드를 하나씩 꺼내
//! 다음 순서로 처리한 뒤 `delivery_interval`만큼 대기합니다.
//!
//! ```text
//! feed(traffic) -> sink.write_traffic -> correlate -> sink.write_incident
//!               -> response rules -> feed(incident)
//! ```
//!
//! 모든 실패는 로그와 카운터만 남기며 재시도하지 않습니다 (at-most-once).
//! 트래픽 기록에 실패하면 그 레코드의 상관 분석을 건너뛰고, 인시던트 기록에
//! 실패하면 규칙 평가와 인시던트 게시를 건너뜁니다. 취소되면 큐에 남은
//! 레코드는 전달하지 않고 폐기합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowguard_core::event::{IncidentEvent, TrafficEvent};
use flowguard_core::metrics as m;
use flowguard_core::pipeline::TrafficSink;
use flowguard_core::types::Incident;

use crate::feed::LiveFeed;
use crate::incident::IncidentCorrelator;
use crate::rule::ResponseEngine;

/// 전달 누적 통계
#[derive(Debug, Default)]
pub struct DeliveryStats {
    received: AtomicU64,
    delivered: AtomicU64,
    traffic_failures: AtomicU64,
    incidents: AtomicU64,
    incident_failures: AtomicU64,
    rules_triggered: AtomicU64,
    feed_failures: AtomicU64,
    abandoned: AtomicU64,
}

/// 특정 시점의 전달 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    /// 큐에서 꺼낸 레코드 수
    pub received: u64,
    /// sink 기록에 성공한 트래픽 레코드 수
    pub delivered: u64,
    pub traffic_failures: u64,
    /// 기록된 인시던트 수
    pub incidents: u64,
    pub incident_failures: u64,
    pub rules_triggered: u64,
    pub feed_failures: u64,
    /// 종료 시 폐기된 레코드 수
    pub abandoned: u64,
}

impl DeliveryStatsSnapshot {
    /// sink 기록 실패 비율 (시도가 없으면 0)
    pub fn failure_ratio(&self) -> f64 {
        let attempts = self.delivered + self.traffic_failures;
        if attempts == 0 {
            0.0
        } else {
            self.traffic_failures as f64 / attempts as f64
        }
    }
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            traffic_failures: self.traffic_failures.load(Ordering::Relaxed),
            incidents: self.incidents.load(Ordering::Relaxed),
            incident_failures: self.incident_failures.load(Ordering::Relaxed),
            rules_triggered: self.rules_triggered.load(Ordering::Relaxed),
            feed_failures: self.feed_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::DELIVERY_RECORDS_TOTAL).increment(1);
    }

    fn record_failure(&self, stage: &'static str) {
        let counter = if stage == "traffic" {
            &self.traffic_failures
        } else {
            &self.incident_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::DELIVERY_FAILURES_TOTAL, m::LABEL_STAGE => stage).increment(1);
    }

    fn record_incident(&self, incident: &Incident) {
        self.incidents.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::CORRELATOR_INCIDENTS_TOTAL,
            m::LABEL_SEVERITY => incident.severity.as_label()
        )
        .increment(1);
    }

    fn record_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::Relaxed);
        metrics::counter!(m::DELIVERY_ABANDONED_TOTAL).increment(count);
    }
}

/// 레코드 하나의 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// sink 트래픽 기록 실패, 상관 분석하지 않음
    TrafficFailed,
    /// 인시던트 대상 아님
    Delivered,
    /// 인시던트 생성 및 기록 완료
    Incident {
        incident: Incident,
        rules_triggered: usize,
    },
    /// 인시던트를 만들었으나 sink 기록 실패
    IncidentFailed,
}

/// 레코드 하나를 처리하는 협력 객체 묶음
pub struct Delivery<S> {
    sink: Arc<S>,
    correlator: IncidentCorrelator,
    responder: ResponseEngine,
    feed: LiveFeed,
    stats: Arc<DeliveryStats>,
}

impl<S: TrafficSink> Delivery<S> {
    pub fn new(
        sink: Arc<S>,
        responder: ResponseEngine,
        feed: LiveFeed,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            sink,
            correlator: IncidentCorrelator::new(),
            responder,
            feed,
            stats,
        }
    }

    /// 레코드 하나를 게시, 기록, 상관 분석합니다. 에러를 반환하지 않습니다.
    pub async fn deliver(&self, event: TrafficEvent) -> DeliveryOutcome {
        let record = &event.record;
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.feed.publish_traffic(record) {
            self.stats.feed_failures.fetch_add(1, Ordering::Relaxed);
            warn!(record_id = record.id(), error = %e, "failed to publish traffic to live feed");
        }

        if let Err(e) = self.sink.write_traffic(record).await {
            self.stats.record_failure("traffic");
            warn!(record_id = record.id(), error = %e, "failed to write traffic record");
            return DeliveryOutcome::TrafficFailed;
        }
        self.stats.record_delivered();

        let Some(incident) = self.correlator.correlate(record) else {
            return DeliveryOutcome::Delivered;
        };
        let incident_event = IncidentEvent::with_trace(incident, &event.metadata.trace_id);

        if let Err(e) = self.sink.write_incident(&incident_event.incident).await {
            self.stats.record_failure("incident");
            warn!(
                record_id = record.id(),
                incident_id = %incident_event.incident.id,
                error = %e,
                "failed to write incident"
            );
            return DeliveryOutcome::IncidentFailed;
        }
        self.stats.record_incident(&incident_event.incident);
        info!(
            trace_id = %incident_event.metadata.trace_id,
            incident_id = %incident_event.incident.id,
            threat_type = %incident_event.incident.threat_type,
            severity = %incident_event.incident.severity,
            confidence = incident_event.incident.confidence,
            "incident created"
        );

        let summary = self.responder.evaluate(&incident_event.incident);
        self.stats
            .rules_triggered
            .fetch_add(summary.triggered as u64, Ordering::Relaxed);

        if let Err(e) = self.feed.publish_incident(&incident_event.incident) {
            self.stats.feed_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                incident_id = %incident_event.incident.id,
                error = %e,
                "failed to publish incident to live feed"
            );
        }

        DeliveryOutcome::Incident {
            incident: incident_event.incident,
            rules_triggered: summary.triggered,
        }
    }
}

/// 전달 루프를 실행합니다.
///
/// 취소되거나 큐의 모든 송신자가 사라지면 종료하며, 재시작을 위해 수신자를
/// 돌려줍니다. 취소 시 큐에 남은 레코드는 폐기하고 개수를 기록합니다.
pub async fn run_delivery<S: TrafficSink>(
    delivery: Delivery<S>,
    mut rx: mpsc::UnboundedReceiver<TrafficEvent>,
    interval: Duration,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<TrafficEvent> {
    info!(interval_ms = interval.as_millis() as u64, "delivery loop started");

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => {
                    info!("delivery queue closed");
                    break;
                }
            },
        };

        debug!(record_id = event.record.id(), "delivering record");
        delivery.deliver(event).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    let mut abandoned = 0u64;
    while rx.try_recv().is_ok() {
        abandoned += 1;
    }
    if abandoned > 0 {
        delivery.stats.record_abandoned(abandoned);
        info!(abandoned, "abandoned queued records on shutdown");
    }
    info!("delivery loop stopped");
    rx
}
