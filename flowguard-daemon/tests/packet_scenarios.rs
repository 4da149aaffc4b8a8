//! Packet-level scenarios: replayed frames through the flow engine into the
//! correlator.
//!
//! Unlike the correlator's own scenario tests, the feature values here
//! (rate, service, same-ip-port flag) are computed by the capture path
//! from the frames, not typed in by hand.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::{MutableTcpPacket, TcpFlags};
use pnet::packet::udp::MutableUdpPacket;
use tokio::sync::mpsc;

use flowguard_core::error::FlowguardError;
use flowguard_core::pipeline::{Classifier, Pipeline};
use flowguard_core::types::{
    ClassLabel, Classification, ConnState, FeatureRecord, Service, Severity, ThreatType,
    TrafficStatus,
};
use flowguard_correlator::{CorrelationConfig, CorrelationPipeline, LiveFeed, MemorySink};
use flowguard_flow_engine::{EngineConfig, FlowEngine, LinkType, ReplayFrame, ReplaySource};

const CLIENT: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
const RESOLVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 53);
const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);

struct AlwaysAnomalous;

impl Classifier for AlwaysAnomalous {
    fn name(&self) -> &str {
        "always-anomalous"
    }

    fn classify(&self, _: &FeatureRecord) -> Result<Classification, FlowguardError> {
        Ok(Classification {
            prediction: 1,
            label: ClassLabel::Anomalous,
            confidence: 0.9,
            probabilities: None,
        })
    }
}

fn ipv4(buf: &mut [u8], src: Ipv4Addr, dst: Ipv4Addr, tcp: bool) {
    let total = buf.len() as u16;
    let mut ip = MutableIpv4Packet::new(buf).unwrap();
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total);
    ip.set_ttl(64);
    ip.set_next_level_protocol(if tcp {
        IpNextHeaderProtocols::Tcp
    } else {
        IpNextHeaderProtocols::Udp
    });
    ip.set_source(src);
    ip.set_destination(dst);
}

fn udp(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16, total: usize) -> Vec<u8> {
    let mut buf = vec![0u8; total];
    ipv4(&mut buf, src, dst, false);
    let mut udp = MutableUdpPacket::new(&mut buf[20..]).unwrap();
    udp.set_source(sport);
    udp.set_destination(dport);
    udp.set_length((total - 20) as u16);
    buf
}

fn tcp_syn(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 40];
    ipv4(&mut buf, src, dst, true);
    let mut tcp = MutableTcpPacket::new(&mut buf[20..]).unwrap();
    tcp.set_source(sport);
    tcp.set_destination(dport);
    tcp.set_sequence(1000);
    tcp.set_window(29200);
    tcp.set_data_offset(5);
    tcp.set_flags(TcpFlags::SYN);
    buf
}

struct Wired {
    engine: FlowEngine,
    correlator: CorrelationPipeline<MemorySink>,
    sink: MemorySink,
}

fn wire(classifier: Arc<dyn Classifier>, frames: Vec<ReplayFrame>) -> Wired {
    let (tx, rx) = mpsc::unbounded_channel();
    let (engine, _) = FlowEngine::builder()
        .config(EngineConfig::default())
        .classifier(classifier)
        .source(Box::new(ReplaySource::new(LinkType::RawIp, frames)))
        .record_sender(tx)
        .build()
        .expect("engine should build");

    let sink = MemorySink::new(64);
    let (correlator, _) = CorrelationPipeline::builder()
        .config(CorrelationConfig {
            delivery_interval: Duration::from_millis(10),
            ..CorrelationConfig::default()
        })
        .record_receiver(rx)
        .sink(sink.clone())
        .feed(LiveFeed::new(64))
        .build()
        .expect("correlator should build");

    Wired {
        engine,
        correlator,
        sink,
    }
}

/// Runs both pipelines until `expected` traffic rows reach the sink.
async fn run_until_delivered(w: &mut Wired, expected: usize) {
    w.correlator.start().await.expect("correlator should start");
    w.engine.start().await.expect("engine should start");

    let delivered = tokio::time::timeout(Duration::from_secs(10), async {
        while w.sink.traffic_count() < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    w.engine.stop().await.expect("engine should stop");
    w.correlator.stop().await.expect("correlator should stop");
    assert!(delivered.is_ok(), "records were not delivered in time");
}

#[tokio::test]
async fn test_dns_response_from_frames_creates_no_incident() {
    // Given: A DNS query and, one second later, an 80-byte response to the client
    let t0 = SystemTime::now();
    let frames = vec![
        ReplayFrame::new(udp(CLIENT, 51000, RESOLVER, 53, 60), t0),
        ReplayFrame::new(
            udp(RESOLVER, 53, CLIENT, 51000, 80),
            t0 + Duration::from_secs(1),
        ),
    ];
    let mut w = wire(Arc::new(flowguard_flow_engine::NullClassifier), frames);

    // When: Both frames are captured and delivered
    run_until_delivered(&mut w, 2).await;

    // Then: The response resolves to dns with a low computed rate
    let records = w.engine.live_buffer().snapshot();
    assert_eq!(records.len(), 2);
    let response = &records[1].features;
    assert_eq!(response.source_port, Some(53));
    assert_eq!(response.bytes, 80);
    assert_eq!(response.service, Some(Service::Dns));
    assert!(response.flow.rate <= 50.0, "rate was {}", response.flow.rate);
    assert_eq!(records[1].status, TrafficStatus::Normal);

    // And: Nothing was judged an incident
    assert_eq!(w.sink.incident_count(), 0);
    assert_eq!(w.correlator.stats().received, 2);
}

#[tokio::test]
async fn test_same_ip_same_port_frames_become_spoofing_incidents() {
    // Given: Three TCP SYNs whose source and destination are the same ip:port
    let t0 = SystemTime::now();
    let frames = (0..3u64)
        .map(|i| {
            ReplayFrame::new(
                tcp_syn(HOST, 4444, HOST, 4444),
                t0 + Duration::from_millis(10 * i),
            )
        })
        .collect();
    let mut w = wire(Arc::new(AlwaysAnomalous), frames);

    // When: The frames are captured, classified and correlated
    run_until_delivered(&mut w, 3).await;

    // Then: The capture path computed the flag from the headers
    let records = w.engine.live_buffer().snapshot();
    assert_eq!(records.len(), 3);
    for record in &records {
        assert_eq!(record.features.is_sm_ips_ports, 1);
        assert_eq!(record.features.state, Some(ConnState::Syn));
    }

    // And: Every record became a spoofing incident, at least High, confidence >= 65
    let incidents = w.sink.incidents();
    assert_eq!(incidents.len(), 3);
    for incident in &incidents {
        assert_eq!(incident.threat_type, ThreatType::IpPortSpoofing);
        assert!(incident.severity >= Severity::High);
        assert!(incident.confidence >= 65);
    }
}
