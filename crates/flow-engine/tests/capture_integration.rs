//! 통합 테스트 -- 프레임 재생부터 트래픽 레코드 수신까지
//!
//! pnet으로 만든 Ethernet 프레임을 `ReplaySource`로 엔진에 흘려 보내고
//! 채널로 나오는 레코드를 검증합니다.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::{MutableTcpPacket, TcpFlags};
use pnet::packet::udp::MutableUdpPacket;
use proptest::prelude::*;
use tokio::sync::mpsc;

use flowguard_core::event::TrafficEvent;
use flowguard_core::pipeline::Pipeline;
use flowguard_core::types::{ConnState, Protocol, Service, TrafficStatus};
use flowguard_flow_engine::flow::Endpoint;
use flowguard_flow_engine::{
    Blocklist, CaptureSession, CaptureStats, EngineConfig, FlowEngine, FlowKey, LinkType,
    LiveBuffer, NullClassifier, ReplayFrame, ReplaySource,
};

const ETH_HEADER: usize = 14;

fn at_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(ms)
}

fn ethernet(payload: Vec<u8>) -> Vec<u8> {
    let mut buf = vec![0u8; ETH_HEADER + payload.len()];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_ethertype(EtherTypes::Ipv4);
    }
    buf[ETH_HEADER..].copy_from_slice(&payload);
    buf
}

fn ipv4_header(buf: &mut [u8], src: Ipv4Addr, dst: Ipv4Addr, proto_tcp: bool, ttl: u8) {
    let total = buf.len() as u16;
    let mut ip = MutableIpv4Packet::new(buf).unwrap();
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total);
    ip.set_ttl(ttl);
    ip.set_next_level_protocol(if proto_tcp {
        IpNextHeaderProtocols::Tcp
    } else {
        IpNextHeaderProtocols::Udp
    });
    ip.set_source(src);
    ip.set_destination(dst);
}

fn udp_frame(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), payload_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; 28 + payload_len];
    ipv4_header(&mut buf, src.0, dst.0, false, 64);
    {
        let mut udp = MutableUdpPacket::new(&mut buf[20..]).unwrap();
        udp.set_source(src.1);
        udp.set_destination(dst.1);
        udp.set_length((8 + payload_len) as u16);
    }
    ethernet(buf)
}

fn tcp_frame(
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    syn: bool,
    ack: bool,
    seq: u32,
) -> Vec<u8> {
    let mut buf = vec![0u8; 40];
    ipv4_header(&mut buf, src.0, dst.0, true, 64);
    {
        let mut tcp = MutableTcpPacket::new(&mut buf[20..]).unwrap();
        tcp.set_source(src.1);
        tcp.set_destination(dst.1);
        tcp.set_sequence(seq);
        tcp.set_window(29200);
        tcp.set_data_offset(5);
        let mut flags = 0;
        if syn {
            flags |= TcpFlags::SYN;
        }
        if ack {
            flags |= TcpFlags::ACK;
        }
        tcp.set_flags(flags);
    }
    ethernet(buf)
}

async fn replay(frames: Vec<ReplayFrame>) -> Vec<TrafficEvent> {
    let (mut engine, rx) = FlowEngine::builder()
        .config(EngineConfig::default())
        .source(Box::new(ReplaySource::new(LinkType::Ethernet, frames)))
        .build()
        .unwrap();
    let mut rx = rx.unwrap();

    engine.start().await.unwrap();
    // 엔진이 송신자를 계속 들고 있으므로 채널이 닫히지 않음: 타임아웃으로 종료
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
    {
        events.push(event);
    }
    engine.stop().await.unwrap();
    events
}

#[tokio::test]
async fn dns_exchange_produces_bidirectional_flow() {
    let client = (Ipv4Addr::new(10, 0, 0, 1), 53000);
    let server = (Ipv4Addr::new(10, 0, 0, 53), 53);

    let events = replay(vec![
        ReplayFrame::new(udp_frame(client, server, 32), at_millis(0)),
        ReplayFrame::new(udp_frame(server, client, 96), at_millis(1_000)),
        ReplayFrame::new(udp_frame(client, server, 32), at_millis(2_000)),
    ])
    .await;
    assert_eq!(events.len(), 3);

    let last = &events[2].record;
    assert_eq!(last.status, TrafficStatus::Normal);
    assert_eq!(last.features.protocol, Protocol::Udp);
    assert_eq!(last.features.service, Some(Service::Dns));
    assert_eq!(last.features.state, Some(ConnState::Con));

    let flow = &last.features.flow;
    assert_eq!(flow.spkts, 2);
    assert_eq!(flow.dpkts, 1);
    assert_eq!(flow.sbytes, 2 * 60);
    assert_eq!(flow.dbytes, 124);
    assert!((flow.dur - 2.0).abs() < 1e-6);
    assert!((flow.rate - 1.5).abs() < 1e-6);
    assert_eq!(flow.sttl, Some(64));

    // 세 패킷 모두 같은 두 호스트 사이
    assert_eq!(last.features.counters.ct_dst_src_ltm, 2);
    assert_eq!(last.features.counters.ct_src_ltm, 2);
}

#[tokio::test]
async fn tcp_handshake_timings_are_derived() {
    let client = (Ipv4Addr::new(10, 0, 0, 1), 40000);
    let server = (Ipv4Addr::new(10, 0, 0, 2), 80);

    let events = replay(vec![
        ReplayFrame::new(tcp_frame(client, server, true, false, 100), at_millis(0)),
        ReplayFrame::new(tcp_frame(server, client, true, true, 900), at_millis(10)),
        ReplayFrame::new(tcp_frame(client, server, false, true, 101), at_millis(30)),
    ])
    .await;
    assert_eq!(events.len(), 3);

    assert_eq!(events[0].record.features.state, Some(ConnState::Syn));
    assert_eq!(events[1].record.features.state, Some(ConnState::Sa));
    assert_eq!(events[2].record.features.state, Some(ConnState::Ack));

    let flow = &events[2].record.features.flow;
    assert!((flow.synack.unwrap() - 0.010).abs() < 1e-6);
    assert!((flow.tcprtt.unwrap() - 0.030).abs() < 1e-6);
    assert!((flow.ackdat.unwrap() - 0.020).abs() < 1e-6);
    assert_eq!(flow.stcpb, Some(100));
    assert_eq!(flow.dtcpb, Some(900));
    assert_eq!(flow.swin, Some(29200));
    assert_eq!(events[2].record.features.service, Some(Service::Http));
}

#[tokio::test]
async fn non_ip_frames_are_dropped_without_records() {
    let mut arp = vec![0u8; 42];
    {
        let mut eth = MutableEthernetPacket::new(&mut arp).unwrap();
        eth.set_ethertype(EtherTypes::Arp);
    }
    let client = (Ipv4Addr::new(10, 0, 0, 1), 53000);
    let server = (Ipv4Addr::new(10, 0, 0, 53), 53);

    let events = replay(vec![
        ReplayFrame::new(arp, at_millis(0)),
        ReplayFrame::new(udp_frame(client, server, 0), at_millis(5)),
    ])
    .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].record.features.flow.spkts, 1);
}

#[test]
fn idle_flows_are_evicted_in_packet_time() {
    let config = EngineConfig {
        idle_timeout: Duration::from_secs(10),
        max_flows: 4,
        ..Default::default()
    };
    let stats = Arc::new(CaptureStats::new());
    let mut session = CaptureSession::new(
        &config,
        Arc::new(NullClassifier),
        Blocklist::default(),
        LiveBuffer::new(8),
        Arc::clone(&stats),
    );

    let a = (Ipv4Addr::new(10, 0, 0, 1), 1000);
    let b = (Ipv4Addr::new(10, 0, 0, 2), 2000);
    let c = (Ipv4Addr::new(10, 0, 0, 3), 3000);

    session
        .process_frame(&udp_frame(a, b, 0), LinkType::Ethernet, at_millis(0))
        .unwrap();
    let record = session
        .process_frame(&udp_frame(a, c, 0), LinkType::Ethernet, at_millis(20_000))
        .unwrap();

    assert_eq!(session.flows().len(), 1);
    assert_eq!(session.flows().evictions().idle, 1);
    assert_eq!(record.features.flow.spkts, 1);
    assert_eq!(stats.snapshot().evicted_flows, 1);
}

#[test]
fn flow_table_never_exceeds_capacity() {
    let config = EngineConfig {
        max_flows: 8,
        ..Default::default()
    };
    let mut session = CaptureSession::new(
        &config,
        Arc::new(NullClassifier),
        Blocklist::default(),
        LiveBuffer::new(8),
        Arc::new(CaptureStats::new()),
    );
    let server = (Ipv4Addr::new(10, 0, 0, 254), 443);

    for port in 0..100u16 {
        let client = (Ipv4Addr::new(10, 0, 1, 1), 10_000 + port);
        session
            .process_frame(
                &udp_frame(client, server, 0),
                LinkType::Ethernet,
                at_millis(u64::from(port)),
            )
            .unwrap();
        assert!(session.flows().len() <= 8);
    }
    assert_eq!(session.flows().evictions().capacity, 92);
}

#[tokio::test]
async fn external_record_sender_receives_events() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = (Ipv4Addr::new(192, 168, 1, 10), 5353);
    let server = (Ipv4Addr::new(192, 168, 1, 1), 53);

    let (mut engine, internal_rx) = FlowEngine::builder()
        .config(EngineConfig::default())
        .record_sender(tx)
        .source(Box::new(ReplaySource::new(
            LinkType::Ethernet,
            vec![ReplayFrame::new(udp_frame(client, server, 10), at_millis(0))],
        )))
        .build()
        .unwrap();
    assert!(internal_rx.is_none());

    engine.start().await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    engine.stop().await.unwrap();

    assert_eq!(
        event.record.features.source_ip,
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))
    );
    assert_eq!(engine.live_buffer().len(), 1);
}

fn endpoint() -> impl Strategy<Value = Endpoint> {
    (any::<[u8; 4]>(), any::<u16>()).prop_map(|(ip, port)| Endpoint {
        ip: IpAddr::V4(Ipv4Addr::from(ip)),
        port,
    })
}

proptest! {
    #[test]
    fn flow_key_is_direction_independent(a in endpoint(), b in endpoint()) {
        let (forward_key, forward) = FlowKey::canonical(a, b, Protocol::Tcp);
        let (reverse_key, reverse) = FlowKey::canonical(b, a, Protocol::Tcp);
        prop_assert_eq!(forward_key, reverse_key);
        if a != b {
            prop_assert_ne!(forward, reverse);
        }
    }

    #[test]
    fn derived_rates_are_never_negative(
        gaps in proptest::collection::vec(0u64..5_000, 1..20),
        sizes in proptest::collection::vec(0usize..512, 1..20),
    ) {
        let mut session = CaptureSession::new(
            &EngineConfig::default(),
            Arc::new(NullClassifier),
            Blocklist::default(),
            LiveBuffer::new(4),
            Arc::new(CaptureStats::new()),
        );
        let a = (Ipv4Addr::new(10, 1, 0, 1), 4000);
        let b = (Ipv4Addr::new(10, 1, 0, 2), 53);
        let mut now = 0;
        for (i, (gap, size)) in gaps.iter().zip(sizes.iter().cycle()).enumerate() {
            now += gap;
            let frame = if i % 2 == 0 { udp_frame(a, b, *size) } else { udp_frame(b, a, *size) };
            let record = session
                .process_frame(&frame, LinkType::Ethernet, at_millis(now))
                .unwrap();
            let flow = &record.features.flow;
            prop_assert!(flow.dur >= 0.0);
            prop_assert!(flow.rate >= 0.0);
            prop_assert!(flow.sload >= 0.0 && flow.dload >= 0.0);
            prop_assert!(flow.sjit >= 0.0 && flow.djit >= 0.0);
        }
    }
}
