//! 최근 이벤트 윈도우 -- `ct_*` 근사 카운터의 입력
//!
//! 고정 용량 FIFO입니다. 카운터는 최근 활동의 근사치이며 정확한
//! 이력 집계가 아닙니다.

use std::collections::VecDeque;
use std::net::IpAddr;

use flowguard_core::config::MAX_WINDOW_CAPACITY;
use flowguard_core::types::{ConnState, Service};

use crate::packet::ParsedPacket;

/// 윈도우에 기록되는 패킷 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEvent {
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    pub service: Option<Service>,
    pub state: Option<ConnState>,
    pub ttl: u8,
}

impl WindowEvent {
    pub fn from_packet(packet: &ParsedPacket) -> Self {
        Self {
            source_ip: packet.source_ip,
            destination_ip: packet.destination_ip,
            source_port: packet.source_port,
            destination_port: packet.destination_port,
            service: Service::resolve(packet.source_port, packet.destination_port),
            state: packet.conn_state(),
            ttl: packet.ttl,
        }
    }
}

/// 고정 용량 이벤트 윈도우
#[derive(Debug, Clone)]
pub struct RollingEventWindow {
    events: VecDeque<WindowEvent>,
    capacity: usize,
}

impl RollingEventWindow {
    /// 용량은 1..=[`MAX_WINDOW_CAPACITY`]로 맞춥니다.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_WINDOW_CAPACITY);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 이벤트를 추가합니다. 가득 차 있으면 가장 오래된 이벤트를 버립니다.
    pub fn record(&mut self, event: WindowEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// 조건을 만족하는 이벤트 수
    ///
    /// `&self`로 빌리므로 스캔 중에는 `record`가 불가능합니다.
    pub fn count<F>(&self, predicate: F) -> u32
    where
        F: Fn(&WindowEvent) -> bool,
    {
        let n = self.events.iter().filter(|&e| predicate(e)).count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    /// 현재 내용의 복사본 (오래된 것부터)
    pub fn snapshot(&self) -> Vec<WindowEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RollingEventWindow {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn event(src: u8, ttl: u8) -> WindowEvent {
        WindowEvent {
            source_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, src)),
            destination_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254)),
            source_port: Some(1000),
            destination_port: Some(80),
            service: Some(Service::Http),
            state: Some(ConnState::Syn),
            ttl,
        }
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let mut window = RollingEventWindow::new(100);
        for i in 0..150u16 {
            window.record(event((i % 250) as u8, (i % 200) as u8));
        }
        assert_eq!(window.len(), 100);
        let snap = window.snapshot();
        assert_eq!(snap.first().unwrap().ttl, 50);
        assert_eq!(snap.last().unwrap().ttl, 149);
    }

    #[test]
    fn count_applies_predicate() {
        let mut window = RollingEventWindow::new(10);
        window.record(event(1, 64));
        window.record(event(2, 64));
        window.record(event(1, 128));

        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(window.count(|e| e.source_ip == src), 2);
        assert_eq!(window.count(|e| e.ttl == 64), 2);
        assert_eq!(window.count(|_| false), 0);
    }

    #[test]
    fn snapshot_is_detached_from_window() {
        let mut window = RollingEventWindow::new(2);
        window.record(event(1, 1));
        let snap = window.snapshot();
        window.record(event(2, 2));
        window.record(event(3, 3));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].ttl, 1);
        assert_eq!(window.snapshot()[0].ttl, 2);
    }

    #[test]
    fn default_capacity_is_one_hundred() {
        assert_eq!(RollingEventWindow::default().capacity(), 100);
        assert_eq!(RollingEventWindow::new(0).capacity(), 1);
    }

    #[test]
    fn capacity_is_capped_at_one_hundred() {
        let mut window = RollingEventWindow::new(500);
        assert_eq!(window.capacity(), 100);
        for i in 0..300u16 {
            window.record(event((i % 250) as u8, (i % 200) as u8));
        }
        assert_eq!(window.len(), 100);
    }
}
