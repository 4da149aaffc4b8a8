//! 피처 생성 -- 패킷, 플로우 상태, 이벤트 윈도우를 하나의 피처 레코드로 결합
//!
//! 모든 파생 지표는 음수를 0으로 내리고, 분모가 0이면 0을 반환합니다.

use uuid::Uuid;

use flowguard_core::types::{FeatureRecord, FlowMetrics, RollingCounters, Service};

use crate::flow::FlowState;
use crate::packet::ParsedPacket;
use crate::window::{RollingEventWindow, WindowEvent};

/// 피처 레코드 생성기
///
/// 상태를 갖지 않습니다. 호출자는 현재 패킷을 윈도우에 먼저 기록해야
/// 카운터가 현재 패킷을 포함합니다.
pub struct FeatureBuilder;

impl FeatureBuilder {
    pub fn build(
        packet: &ParsedPacket,
        state: &FlowState,
        window: &RollingEventWindow,
    ) -> FeatureRecord {
        let current = WindowEvent::from_packet(packet);
        let same_ips_ports = packet.source_ip == packet.destination_ip
            && packet.source_port.unwrap_or(0) == packet.destination_port.unwrap_or(0);

        FeatureRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: packet.timestamp,
            source_ip: packet.source_ip,
            destination_ip: packet.destination_ip,
            source_port: packet.source_port,
            destination_port: packet.destination_port,
            protocol: packet.protocol,
            proto: packet.protocol.as_lowercase().to_owned(),
            bytes: packet.length,
            flow: flow_metrics(state, packet.epoch_secs()),
            service: current.service,
            state: current.state,
            is_sm_ips_ports: u8::from(same_ips_ports),
            counters: rolling_counters(window, &current),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        (numerator / denominator).max(0.0)
    } else {
        0.0
    }
}

/// 플로우 상태에서 파생 지표를 계산합니다.
pub fn flow_metrics(state: &FlowState, now: f64) -> FlowMetrics {
    let fwd = &state.forward;
    let rev = &state.reverse;
    let hs = &state.handshake;

    let dur = (now - state.start_ts).max(0.0);
    let sbytes = fwd.bytes as f64;
    let dbytes = rev.bytes as f64;

    FlowMetrics {
        dur,
        spkts: fwd.packets,
        dpkts: rev.packets,
        sbytes: fwd.bytes,
        dbytes: rev.bytes,
        rate: ratio((fwd.packets + rev.packets) as f64, dur),
        sload: ratio(sbytes, dur),
        dload: ratio(dbytes, dur),
        sinpkt: fwd.last_delta,
        dinpkt: rev.last_delta,
        sjit: fwd.jitter,
        djit: rev.jitter,
        smean: ratio(sbytes, fwd.packets as f64),
        dmean: ratio(dbytes, rev.packets as f64),
        sttl: fwd.ttl,
        dttl: rev.ttl,
        swin: fwd.window,
        dwin: rev.window,
        stcpb: fwd.seq_base,
        dtcpb: rev.seq_base,
        synack: hs.synack,
        tcprtt: hs.tcprtt,
        ackdat: hs.ackdat,
    }
}

/// 윈도우를 스캔해 8개의 `ct_*` 카운터를 계산합니다.
pub fn rolling_counters(window: &RollingEventWindow, current: &WindowEvent) -> RollingCounters {
    let src = current.source_ip;
    let dst = current.destination_ip;
    let service: Option<Service> = current.service;

    RollingCounters {
        ct_srv_src: window.count(|e| e.source_ip == src && e.service == service),
        ct_state_ttl: window.count(|e| e.state == current.state && e.ttl == current.ttl),
        ct_dst_ltm: window.count(|e| e.destination_ip == dst),
        ct_src_dport_ltm: window
            .count(|e| e.source_ip == src && e.destination_port == current.destination_port),
        ct_dst_sport_ltm: window
            .count(|e| e.destination_ip == dst && e.source_port == current.source_port),
        ct_dst_src_ltm: window.count(|e| e.destination_ip == dst && e.source_ip == src),
        ct_src_ltm: window.count(|e| e.source_ip == src),
        ct_srv_dst: window.count(|e| {
            e.source_ip == src && e.destination_ip == dst && e.service == service
        }),
    }
}
