//! 플로우 테이블 -- 정규화된 5-tuple 키별 양방향 집계 상태
//!
//! # 키 정규화
//! `(src_ip, src_port)`와 `(dst_ip, dst_port)` 중 작은 쪽이 `low`가 되어
//! 어느 쪽이 먼저 보냈든 같은 플로우는 같은 키를 가집니다. 현재 패킷의 출발지가
//! `low`이면 정방향(forward)입니다. 포트가 없는 프로토콜은 포트 0으로 취급합니다.
//!
//! # 용량 제한
//! 테이블은 `max_flows` 용량의 LRU입니다.
//! - 매 `update` 전에 마지막 패킷이 idle timeout보다 오래된 플로우를 제거합니다.
//!   시각은 벽시계가 아니라 패킷 시각을 기준으로 합니다.
//! - 가득 찬 상태에서 새 플로우가 들어오면 가장 오래 전에 갱신된 플로우를 제거합니다.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tracing::debug;

use flowguard_core::metrics as m;
use flowguard_core::types::Protocol;

use crate::packet::{ParsedPacket, TcpControl, TcpHeader};

/// 플로우의 한쪽 끝점
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

/// 방향과 무관한 플로우 키
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub low: Endpoint,
    pub high: Endpoint,
    pub protocol: Protocol,
}

impl FlowKey {
    /// 두 끝점에서 키를 만들고, `src`가 `low` 쪽인지(정방향) 함께 반환합니다.
    pub fn canonical(src: Endpoint, dst: Endpoint, protocol: Protocol) -> (Self, bool) {
        if src <= dst {
            (
                Self {
                    low: src,
                    high: dst,
                    protocol,
                },
                true,
            )
        } else {
            (
                Self {
                    low: dst,
                    high: src,
                    protocol,
                },
                false,
            )
        }
    }

    pub fn from_packet(packet: &ParsedPacket) -> (Self, bool) {
        Self::canonical(
            Endpoint {
                ip: packet.source_ip,
                port: packet.source_port.unwrap_or(0),
            },
            Endpoint {
                ip: packet.destination_ip,
                port: packet.destination_port.unwrap_or(0),
            },
            packet.protocol,
        )
    }
}

/// 한 방향의 누적 통계
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectionStats {
    pub packets: u64,
    pub bytes: u64,
    /// 이 방향 마지막 패킷 시각
    pub last_seen: Option<f64>,
    /// 마지막 도착 간격 (초)
    pub last_delta: Option<f64>,
    /// 연속 도착 간격 차이의 절댓값 합
    pub jitter: f64,
    /// 마지막 패킷의 TTL
    pub ttl: Option<u8>,
    /// 처음 관측한 TCP 윈도우
    pub window: Option<u16>,
    /// 처음 관측한 TCP 시퀀스 번호
    pub seq_base: Option<u32>,
}

impl DirectionStats {
    fn observe(&mut self, now: f64, length: u32, ttl: u8, tcp: Option<&TcpHeader>) {
        self.packets += 1;
        self.bytes += u64::from(length);

        if let Some(last) = self.last_seen {
            let delta = (now - last).max(0.0);
            if let Some(prev) = self.last_delta {
                self.jitter += (delta - prev).abs();
            }
            self.last_delta = Some(delta);
        }
        self.last_seen = Some(now);
        self.ttl = Some(ttl);

        if let Some(tcp) = tcp {
            self.window.get_or_insert(tcp.window);
            self.seq_base.get_or_insert(tcp.sequence);
        }
    }
}

/// TCP 핸드셰이크 시각과 파생 지연
///
/// low 쪽이 연결을 시작한다고 가정합니다. 순서가 어긋나거나 빠진 세그먼트는
/// 해당 값을 비워 둘 뿐 에러가 아닙니다.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Handshake {
    pub t_syn: Option<f64>,
    pub t_synack: Option<f64>,
    pub t_ack: Option<f64>,
    /// SYN → SYN-ACK
    pub synack: Option<f64>,
    /// SYN → ACK
    pub tcprtt: Option<f64>,
    /// SYN-ACK → ACK
    pub ackdat: Option<f64>,
}

impl Handshake {
    fn observe(&mut self, now: f64, forward: bool, control: TcpControl) {
        if forward && control.syn && !control.ack {
            self.t_syn = Some(now);
        }
        if !forward && control.syn && control.ack {
            self.t_synack = Some(now);
            if let Some(syn) = self.t_syn {
                self.synack = Some((now - syn).max(0.0));
            }
        }
        if forward && !control.syn && control.ack {
            self.t_ack = Some(now);
            if let Some(syn) = self.t_syn {
                self.tcprtt = Some((now - syn).max(0.0));
            }
            if let Some(synack) = self.t_synack {
                self.ackdat = Some((now - synack).max(0.0));
            }
        }
    }
}

/// 플로우 하나의 집계 상태
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    /// 첫 패킷 시각, 이후 변경되지 않음
    pub start_ts: f64,
    /// 방향과 무관한 마지막 패킷 시각 (idle 판정용)
    pub last_seen: f64,
    /// low → high
    pub forward: DirectionStats,
    /// high → low
    pub reverse: DirectionStats,
    pub handshake: Handshake,
}

impl FlowState {
    fn new(now: f64) -> Self {
        Self {
            start_ts: now,
            last_seen: now,
            forward: DirectionStats::default(),
            reverse: DirectionStats::default(),
            handshake: Handshake::default(),
        }
    }

    fn observe(&mut self, now: f64, forward: bool, packet: &ParsedPacket) {
        self.last_seen = self.last_seen.max(now);
        let tcp = packet.tcp.as_ref();
        let side = if forward {
            &mut self.forward
        } else {
            &mut self.reverse
        };
        side.observe(now, packet.length, packet.ttl, tcp);

        if let Some(tcp) = tcp {
            self.handshake.observe(now, forward, tcp.control);
        }
    }
}

/// `FlowTable::update` 결과
#[derive(Debug)]
pub struct FlowUpdate<'a> {
    pub key: FlowKey,
    pub forward: bool,
    pub state: &'a FlowState,
}

/// 축출 누계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionCounts {
    pub idle: u64,
    pub capacity: u64,
}

impl EvictionCounts {
    pub fn total(&self) -> u64 {
        self.idle + self.capacity
    }
}

/// 용량 제한이 있는 플로우 테이블
///
/// 캡처 세션이 단독으로 소유하며 `&mut self`로만 갱신됩니다.
pub struct FlowTable {
    flows: LruCache<FlowKey, FlowState>,
    idle_timeout: f64,
    evictions: EvictionCounts,
}

impl FlowTable {
    /// `max_flows`가 0이면 1로 올립니다.
    pub fn new(max_flows: usize, idle_timeout: Duration) -> Self {
        let cap = NonZeroUsize::new(max_flows).unwrap_or(NonZeroUsize::MIN);
        Self {
            flows: LruCache::new(cap),
            idle_timeout: idle_timeout.as_secs_f64(),
            evictions: EvictionCounts::default(),
        }
    }

    /// 패킷을 해당 플로우에 반영합니다.
    pub fn update(&mut self, packet: &ParsedPacket) -> FlowUpdate<'_> {
        let now = packet.epoch_secs();
        self.evict_idle(now);

        let (key, forward) = FlowKey::from_packet(packet);
        if !self.flows.contains(&key) && self.is_full() {
            self.evictions.capacity += 1;
            metrics::counter!(m::FLOW_EVICTED_TOTAL).increment(1);
            debug!(capacity = self.capacity(), "flow table full, evicting least recent flow");
        }

        let state = self.flows.get_or_insert_mut(key, || FlowState::new(now));
        state.observe(now, forward, packet);

        FlowUpdate {
            key,
            forward,
            state,
        }
    }

    fn evict_idle(&mut self, now: f64) {
        let mut evicted = 0u64;
        loop {
            let expired = match self.flows.peek_lru() {
                Some((_, state)) => now - state.last_seen > self.idle_timeout,
                None => false,
            };
            if !expired {
                break;
            }
            self.flows.pop_lru();
            evicted += 1;
        }

        if evicted > 0 {
            self.evictions.idle += evicted;
            metrics::counter!(m::FLOW_EVICTED_TOTAL).increment(evicted);
            debug!(evicted, remaining = self.flows.len(), "evicted idle flows");
        }
    }

    /// LRU 순서를 바꾸지 않고 조회합니다.
    pub fn get(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.peek(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.flows.cap().get()
    }

    pub fn is_full(&self) -> bool {
        self.flows.len() >= self.capacity()
    }

    pub fn evictions(&self) -> EvictionCounts {
        self.evictions
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use chrono::{DateTime, Utc};

    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn ts(secs: f64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0) as i64).unwrap()
    }

    fn tcp(src: (u8, u16), dst: (u8, u16), at: f64, syn: bool, ack: bool) -> ParsedPacket {
        ParsedPacket {
            timestamp: ts(at),
            source_ip: ip(src.0),
            destination_ip: ip(dst.0),
            source_port: Some(src.1),
            destination_port: Some(dst.1),
            protocol: Protocol::Tcp,
            length: 60,
            ttl: 64,
            tcp: Some(TcpHeader {
                control: TcpControl {
                    syn,
                    ack,
                    ..Default::default()
                },
                window: if ack { 500 } else { 1000 },
                sequence: (at * 10.0) as u32,
            }),
        }
    }

    fn udp(src: (u8, u16), dst: (u8, u16), at: f64) -> ParsedPacket {
        ParsedPacket {
            timestamp: ts(at),
            source_ip: ip(src.0),
            destination_ip: ip(dst.0),
            source_port: Some(src.1),
            destination_port: Some(dst.1),
            protocol: Protocol::Udp,
            length: 80,
            ttl: 64,
            tcp: None,
        }
    }

    #[test]
    fn key_is_direction_independent() {
        let a = udp((1, 5000), (2, 53), 0.0);
        let b = udp((2, 53), (1, 5000), 0.0);
        let (ka, fa) = FlowKey::from_packet(&a);
        let (kb, fb) = FlowKey::from_packet(&b);
        assert_eq!(ka, kb);
        assert!(fa);
        assert!(!fb);
    }

    #[test]
    fn key_differs_by_protocol() {
        let (ku, _) = FlowKey::from_packet(&udp((1, 80), (2, 80), 0.0));
        let (kt, _) = FlowKey::from_packet(&tcp((1, 80), (2, 80), 0.0, true, false));
        assert_ne!(ku, kt);
    }

    #[test]
    fn counters_split_by_direction() {
        let mut table = FlowTable::new(16, Duration::from_secs(60));
        table.update(&udp((1, 5000), (2, 53), 0.0));
        table.update(&udp((2, 53), (1, 5000), 0.5));
        let update = table.update(&udp((1, 5000), (2, 53), 1.0));

        assert!(update.forward);
        assert_eq!(update.state.forward.packets, 2);
        assert_eq!(update.state.forward.bytes, 160);
        assert_eq!(update.state.reverse.packets, 1);
        assert_eq!(update.state.start_ts, 0.0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn jitter_accumulates_delta_differences() {
        let mut table = FlowTable::new(16, Duration::from_secs(60));
        for at in [0.0, 1.0, 1.5, 3.5] {
            table.update(&udp((1, 5000), (2, 53), at));
        }
        let (key, _) = FlowKey::from_packet(&udp((1, 5000), (2, 53), 0.0));
        let state = table.get(&key).unwrap();
        // deltas 1.0, 0.5, 2.0 -> |0.5-1.0| + |2.0-0.5| = 2.0
        assert!((state.forward.jitter - 2.0).abs() < 1e-9);
        assert_eq!(state.forward.last_delta, Some(2.0));
    }

    #[test]
    fn tcp_bases_are_first_seen_only() {
        let mut table = FlowTable::new(16, Duration::from_secs(60));
        table.update(&tcp((1, 40000), (2, 80), 1.0, true, false));
        let update = table.update(&tcp((1, 40000), (2, 80), 2.0, false, true));
        assert_eq!(update.state.forward.window, Some(1000));
        assert_eq!(update.state.forward.seq_base, Some(10));
    }

    #[test]
    fn handshake_timings() {
        let mut table = FlowTable::new(16, Duration::from_secs(60));
        table.update(&tcp((1, 40000), (2, 80), 10.0, true, false));
        table.update(&tcp((2, 80), (1, 40000), 10.25, true, true));
        let update = table.update(&tcp((1, 40000), (2, 80), 10.5, false, true));

        let hs = update.state.handshake;
        assert_eq!(hs.synack, Some(0.25));
        assert_eq!(hs.tcprtt, Some(0.5));
        assert_eq!(hs.ackdat, Some(0.25));
    }

    #[test]
    fn synack_before_syn_leaves_synack_unset() {
        let mut table = FlowTable::new(16, Duration::from_secs(60));
        table.update(&tcp((2, 80), (1, 40000), 1.0, true, true));
        let update = table.update(&tcp((1, 40000), (2, 80), 2.0, true, false));
        assert_eq!(update.state.handshake.synack, None);
        assert_eq!(update.state.handshake.t_synack, Some(1.0));
        assert_eq!(update.state.handshake.tcprtt, None);
    }

    #[test]
    fn idle_flows_are_evicted_in_packet_time() {
        let mut table = FlowTable::new(16, Duration::from_secs(10));
        table.update(&udp((1, 1000), (2, 53), 0.0));
        table.update(&udp((3, 1000), (2, 53), 5.0));
        assert_eq!(table.len(), 2);

        table.update(&udp((4, 1000), (2, 53), 12.0));
        assert_eq!(table.len(), 2);
        assert_eq!(table.evictions().idle, 1);

        let (first, _) = FlowKey::from_packet(&udp((1, 1000), (2, 53), 0.0));
        assert!(table.get(&first).is_none());
    }

    #[test]
    fn evicted_flow_restarts_fresh() {
        let mut table = FlowTable::new(16, Duration::from_secs(10));
        table.update(&udp((1, 1000), (2, 53), 0.0));
        let update = table.update(&udp((1, 1000), (2, 53), 100.0));
        assert_eq!(update.state.start_ts, 100.0);
        assert_eq!(update.state.forward.packets, 1);
    }

    #[test]
    fn full_table_evicts_least_recent() {
        let mut table = FlowTable::new(2, Duration::from_secs(600));
        table.update(&udp((1, 1000), (9, 53), 0.0));
        table.update(&udp((2, 1000), (9, 53), 1.0));
        // flow 1 갱신 → flow 2가 가장 오래됨
        table.update(&udp((1, 1000), (9, 53), 2.0));
        table.update(&udp((3, 1000), (9, 53), 3.0));

        assert_eq!(table.len(), 2);
        assert_eq!(table.evictions().capacity, 1);
        let (second, _) = FlowKey::from_packet(&udp((2, 1000), (9, 53), 0.0));
        assert!(table.get(&second).is_none());
        assert_eq!(table.evictions().total(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let table = FlowTable::new(0, Duration::from_secs(1));
        assert_eq!(table.capacity(), 1);
        assert!(table.is_empty());
    }
}
