//! 캡처 세션과 캡처 루프
//!
//! [`CaptureSession`]은 파이프라인 인스턴스 하나의 상태(플로우 테이블,
//! 이벤트 윈도우, 분류기, 차단 규칙)를 소유합니다. 캡처 루프는 세션을
//! blocking 스레드로 가져가 유일한 writer로 사용하며, 완성된 레코드는
//! unbounded 채널로 넘깁니다.
//!
//! ```text
//! frame ─▶ parse ─▶ FlowTable.update ─▶ window.record ─▶ build ─▶ classify
//!                                                                    │
//!                      mpsc::UnboundedSender<TrafficEvent> ◀── live buffer
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowguard_core::event::TrafficEvent;
use flowguard_core::pipeline::Classifier;
use flowguard_core::types::TrafficRecord;

use crate::blocklist::Blocklist;
use crate::classifier::FailClosed;
use crate::config::EngineConfig;
use crate::error::FlowEngineError;
use crate::features::FeatureBuilder;
use crate::flow::FlowTable;
use crate::live::LiveBuffer;
use crate::packet::{LinkType, ParsedPacket};
use crate::source::{PacketSource, SourceEvent};
use crate::stats::CaptureStats;
use crate::window::{RollingEventWindow, WindowEvent};

/// 캡처 파이프라인 하나의 명시적 상태
pub struct CaptureSession {
    flows: FlowTable,
    window: RollingEventWindow,
    classifier: FailClosed,
    blocklist: Blocklist,
    live: LiveBuffer,
    stats: Arc<CaptureStats>,
}

impl CaptureSession {
    pub fn new(
        config: &EngineConfig,
        classifier: Arc<dyn Classifier>,
        blocklist: Blocklist,
        live: LiveBuffer,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            flows: FlowTable::new(config.max_flows, config.idle_timeout),
            window: RollingEventWindow::new(config.window_capacity),
            classifier: FailClosed::new(classifier),
            blocklist,
            live,
            stats,
        }
    }

    /// 프레임 하나를 처리합니다. 파싱할 수 없는 프레임은 `None`.
    pub fn process_frame(
        &mut self,
        frame: &[u8],
        link: LinkType,
        captured_at: SystemTime,
    ) -> Option<TrafficRecord> {
        self.stats.record_frame();
        let Some(packet) = ParsedPacket::parse(frame, link, captured_at) else {
            self.stats.record_parse_drop();
            return None;
        };
        Some(self.process_packet(&packet))
    }

    /// 파싱된 패킷 하나를 트래픽 레코드로 만듭니다.
    pub fn process_packet(&mut self, packet: &ParsedPacket) -> TrafficRecord {
        let update = self.flows.update(packet);
        self.window.record(WindowEvent::from_packet(packet));
        let features = FeatureBuilder::build(packet, update.state, &self.window);

        let classification = self.classifier.verdict(&features);
        let blocked_by = self.blocklist.matching_rule(packet).map(|r| r.id.clone());
        if let Some(rule) = &blocked_by {
            self.stats.record_blocked();
            debug!(rule = %rule, packet = %features, "packet matched blocklist rule");
        }

        let record = TrafficRecord::new(features, &classification, blocked_by.is_some());

        self.stats
            .record_processed(packet.protocol, classification.is_anomalous());
        let evictions = self.flows.evictions();
        self.stats
            .set_flow_table(self.flows.len(), self.flows.capacity(), evictions.total());
        self.live.push(record.clone());

        record
    }

    pub fn flows(&self) -> &FlowTable {
        &self.flows
    }

    pub fn window(&self) -> &RollingEventWindow {
        &self.window
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }
}

/// 소스 읽기 에러 후 다음 읽기까지 대기 시간
pub const SOURCE_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// 이 횟수만큼 연속으로 읽기에 실패하면 캡처 루프를 끝냅니다.
pub const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 10;

/// 캡처 루프를 실행합니다. blocking 스레드에서 호출해야 합니다.
///
/// 취소되거나 소스가 닫히면 `Ok`로 끝납니다. 소비자가 사라져 전송이
/// 실패한 레코드는 조용히 버리고 계속 캡처합니다.
///
/// 소스 읽기 에러는 기록 후 [`SOURCE_ERROR_BACKOFF`]만큼 쉬고 다시 읽습니다.
/// [`MAX_CONSECUTIVE_SOURCE_ERRORS`]번 연속 실패해야 마지막 에러로 끝납니다.
pub fn run_capture(
    mut session: CaptureSession,
    mut source: Box<dyn PacketSource>,
    record_tx: mpsc::UnboundedSender<TrafficEvent>,
    cancel: CancellationToken,
) -> Result<(), FlowEngineError> {
    let link = source.link_type();
    info!(source = source.name(), ?link, "capture loop started");

    let mut consecutive_errors = 0u32;
    while !cancel.is_cancelled() {
        let event = match source.next_event() {
            Ok(event) => {
                consecutive_errors = 0;
                event
            }
            Err(e) => {
                session.stats.record_source_error();
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                    warn!(
                        error = %e,
                        consecutive_errors,
                        "packet source keeps failing, stopping capture loop"
                    );
                    return Err(e);
                }
                warn!(error = %e, consecutive_errors, "packet source read failed, retrying");
                std::thread::sleep(SOURCE_ERROR_BACKOFF);
                continue;
            }
        };

        match event {
            SourceEvent::Frame { data, captured_at } => {
                let Some(record) = session.process_frame(data, link, captured_at) else {
                    continue;
                };
                if record_tx.send(TrafficEvent::new(record)).is_err() {
                    session.stats.record_enqueue_drop();
                }
            }
            SourceEvent::Idle => {}
            SourceEvent::Closed => {
                info!("packet source closed");
                break;
            }
        }
    }

    let stats = session.stats.snapshot();
    info!(
        frames = stats.frames,
        processed = stats.processed,
        parse_drops = stats.parse_drops,
        enqueue_drops = stats.enqueue_drops,
        source_errors = stats.source_errors,
        active_flows = stats.active_flows,
        "capture loop stopped"
    );
    Ok(())
}
