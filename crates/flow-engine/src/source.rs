//! 패킷 소스 -- 라이브 인터페이스 또는 메모리 프레임 재생
//!
//! 캡처 루프는 [`PacketSource::next_event`]를 반복 호출하는 blocking 루프입니다.
//! 소스는 읽기 타임아웃마다 [`SourceEvent::Idle`]을 돌려주어 루프가 종료 신호를
//! 확인할 수 있게 해야 합니다.

use std::io;
use std::time::{Duration, SystemTime};

use pnet::datalink::{self, Channel, DataLinkReceiver};
use tracing::info;

use crate::error::FlowEngineError;
use crate::packet::LinkType;

/// 소스에서 읽은 결과
#[derive(Debug)]
pub enum SourceEvent<'a> {
    /// 프레임 하나
    Frame {
        data: &'a [u8],
        captured_at: SystemTime,
    },
    /// 읽기 타임아웃, 프레임 없음
    Idle,
    /// 더 이상 읽을 프레임이 없음
    Closed,
}

/// 프레임 공급자
///
/// 캡처 스레드로 이동되므로 `Send`여야 합니다.
pub trait PacketSource: Send {
    /// 소스 이름 (로그용)
    fn name(&self) -> &str;

    /// 프레임의 링크 계층 형식
    fn link_type(&self) -> LinkType;

    /// 다음 이벤트를 읽습니다. 타임아웃까지 block할 수 있습니다.
    fn next_event(&mut self) -> Result<SourceEvent<'_>, FlowEngineError>;
}

// =============================================================================
// LiveCapture
// =============================================================================

/// pnet datalink 채널 기반 라이브 캡처
pub struct LiveCapture {
    interface: String,
    rx: Box<dyn DataLinkReceiver>,
}

impl LiveCapture {
    /// 인터페이스에서 Ethernet 채널을 엽니다.
    ///
    /// raw socket 권한(CAP_NET_RAW)이 필요합니다.
    pub fn open(
        interface: &str,
        promiscuous: bool,
        read_timeout: Duration,
    ) -> Result<Self, FlowEngineError> {
        let iface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == interface)
            .ok_or_else(|| FlowEngineError::InterfaceNotFound(interface.to_owned()))?;

        let config = datalink::Config {
            read_timeout: Some(read_timeout),
            promiscuous,
            ..Default::default()
        };

        let rx = match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => {
                return Err(FlowEngineError::ChannelOpen {
                    interface: interface.to_owned(),
                    reason: "unsupported channel type".to_owned(),
                });
            }
            Err(e) => {
                return Err(FlowEngineError::ChannelOpen {
                    interface: interface.to_owned(),
                    reason: e.to_string(),
                });
            }
        };

        info!(
            interface,
            promiscuous,
            read_timeout_ms = read_timeout.as_millis() as u64,
            "opened live capture"
        );
        Ok(Self {
            interface: interface.to_owned(),
            rx,
        })
    }
}

impl PacketSource for LiveCapture {
    fn name(&self) -> &str {
        &self.interface
    }

    fn link_type(&self) -> LinkType {
        LinkType::Ethernet
    }

    fn next_event(&mut self) -> Result<SourceEvent<'_>, FlowEngineError> {
        match self.rx.next() {
            Ok(data) => Ok(SourceEvent::Frame {
                data,
                captured_at: SystemTime::now(),
            }),
            Err(e) if is_timeout(&e) => Ok(SourceEvent::Idle),
            Err(e) => Err(FlowEngineError::Source(format!("{}: {}", self.interface, e))),
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// =============================================================================
// ReplaySource
// =============================================================================

/// 재생할 프레임
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    pub data: Vec<u8>,
    pub captured_at: SystemTime,
}

impl ReplayFrame {
    pub fn new(data: Vec<u8>, captured_at: SystemTime) -> Self {
        Self { data, captured_at }
    }
}

/// 메모리의 프레임을 순서대로 돌려주는 소스
///
/// 모든 프레임을 돌려준 뒤에는 `Closed`를 반환합니다.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    link: LinkType,
    frames: Vec<ReplayFrame>,
    cursor: usize,
}

impl ReplaySource {
    pub fn new(link: LinkType, frames: Vec<ReplayFrame>) -> Self {
        Self {
            name: "replay".to_owned(),
            link,
            frames,
            cursor: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 아직 돌려주지 않은 프레임 수
    pub fn remaining(&self) -> usize {
        self.frames.len() - self.cursor
    }
}

impl PacketSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_type(&self) -> LinkType {
        self.link
    }

    fn next_event(&mut self) -> Result<SourceEvent<'_>, FlowEngineError> {
        let Some(frame) = self.frames.get(self.cursor) else {
            return Ok(SourceEvent::Closed);
        };
        self.cursor += 1;
        Ok(SourceEvent::Frame {
            data: &frame.data,
            captured_at: frame.captured_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    #[test]
    fn replay_yields_frames_in_order_then_closes() {
        let mut source = ReplaySource::new(
            LinkType::RawIp,
            vec![
                ReplayFrame::new(vec![1], UNIX_EPOCH),
                ReplayFrame::new(vec![2, 2], UNIX_EPOCH + Duration::from_secs(1)),
            ],
        );
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.link_type(), LinkType::RawIp);

        match source.next_event().unwrap() {
            SourceEvent::Frame { data, .. } => assert_eq!(data, &[1]),
            other => panic!("unexpected {:?}", other),
        }
        match source.next_event().unwrap() {
            SourceEvent::Frame { data, captured_at } => {
                assert_eq!(data.len(), 2);
                assert_eq!(captured_at, UNIX_EPOCH + Duration::from_secs(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(source.next_event().unwrap(), SourceEvent::Closed));
        assert!(matches!(source.next_event().unwrap(), SourceEvent::Closed));
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn replay_name_is_configurable() {
        let source = ReplaySource::new(LinkType::Ethernet, Vec::new()).with_name("pcap-1");
        assert_eq!(source.name(), "pcap-1");
    }

    #[test]
    fn missing_interface_is_reported() {
        let err = LiveCapture::open(
            "flowguard-no-such-if0",
            false,
            Duration::from_millis(10),
        )
        .err()
        .unwrap();
        assert!(matches!(err, FlowEngineError::InterfaceNotFound(_)));
    }

    #[test]
    fn timeout_kinds_are_idle() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }
}
