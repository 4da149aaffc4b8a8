//! 프레임 파싱 -- Ethernet/IP/TCP/UDP 헤더에서 플로우 추적에 필요한 값 추출
//!
//! IP 계층이 없거나 TCP/UDP 헤더가 잘린 프레임은 `None`을 반환합니다.
//! 호출자는 이런 프레임을 플로우 상태에 반영하지 않고 버립니다.
//! TCP/UDP 이외의 IP 프로토콜은 포트 없이 `Protocol::Other`로 유지합니다.
//! IPv6 확장 헤더(hop-by-hop, routing, fragment, destination options, AH)는
//! 건너뛰고 상위 프로토콜을 찾습니다. 첫 조각이 아닌 fragment는 전송 헤더가
//! 없으므로 `Protocol::Other`입니다.

use std::net::IpAddr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::{TcpFlags, TcpPacket};
use pnet::packet::udp::UdpPacket;

use flowguard_core::types::{ConnState, Protocol};

/// IPv6 고정 헤더 길이
const IPV6_HEADER_LEN: u32 = 40;

/// 따라가는 IPv6 확장 헤더 최대 개수
const MAX_IPV6_EXTENSIONS: usize = 8;

/// 소스가 넘겨주는 프레임의 링크 계층 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// Ethernet II 프레임
    Ethernet,
    /// 링크 헤더 없는 IP 패킷
    RawIp,
}

/// TCP 제어 플래그 중 상태 추적에 쓰는 비트
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpControl {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpControl {
    /// 거친 연결 상태 태그
    ///
    /// RST > FIN > SYN+ACK > SYN > ACK 순으로 판정하며, 어느 것도 아니면 `None`.
    pub fn conn_state(&self) -> Option<ConnState> {
        if self.rst {
            Some(ConnState::Rst)
        } else if self.fin {
            Some(ConnState::Fin)
        } else if self.syn && self.ack {
            Some(ConnState::Sa)
        } else if self.syn {
            Some(ConnState::Syn)
        } else if self.ack {
            Some(ConnState::Ack)
        } else {
            None
        }
    }
}

/// TCP 헤더 요약
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub control: TcpControl,
    pub window: u16,
    pub sequence: u32,
}

/// 파싱된 패킷
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPacket {
    /// 캡처 시각
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    pub protocol: Protocol,
    /// IP 계층 길이 (IPv4 total length, IPv6 payload length + 40)
    pub length: u32,
    /// IPv4 TTL 또는 IPv6 hop limit
    pub ttl: u8,
    /// TCP 패킷일 때만 존재
    pub tcp: Option<TcpHeader>,
}

impl ParsedPacket {
    /// 링크 형식에 맞게 프레임을 파싱합니다.
    pub fn parse(frame: &[u8], link: LinkType, captured_at: SystemTime) -> Option<Self> {
        match link {
            LinkType::Ethernet => Self::from_ethernet(frame, captured_at),
            LinkType::RawIp => Self::from_ip(frame, captured_at),
        }
    }

    /// Ethernet 프레임을 파싱합니다. IPv4/IPv6 이외의 EtherType은 `None`.
    pub fn from_ethernet(frame: &[u8], captured_at: SystemTime) -> Option<Self> {
        let ethernet = EthernetPacket::new(frame)?;
        let timestamp = DateTime::<Utc>::from(captured_at);
        match ethernet.get_ethertype() {
            EtherTypes::Ipv4 => Self::from_ipv4(ethernet.payload(), timestamp),
            EtherTypes::Ipv6 => Self::from_ipv6(ethernet.payload(), timestamp),
            _ => None,
        }
    }

    /// 링크 헤더 없는 IP 패킷을 파싱합니다. 버전 니블로 IPv4/IPv6를 구분합니다.
    pub fn from_ip(packet: &[u8], captured_at: SystemTime) -> Option<Self> {
        let timestamp = DateTime::<Utc>::from(captured_at);
        match packet.first()? >> 4 {
            4 => Self::from_ipv4(packet, timestamp),
            6 => Self::from_ipv6(packet, timestamp),
            _ => None,
        }
    }

    fn from_ipv4(bytes: &[u8], timestamp: DateTime<Utc>) -> Option<Self> {
        let ip = Ipv4Packet::new(bytes)?;
        if ip.get_version() != 4 || ip.get_header_length() < 5 {
            return None;
        }
        let header_len = usize::from(ip.get_header_length()) * 4;
        let transport = bytes.get(header_len..)?;
        Self::with_transport(
            timestamp,
            IpAddr::V4(ip.get_source()),
            IpAddr::V4(ip.get_destination()),
            u32::from(ip.get_total_length()),
            ip.get_ttl(),
            ip.get_next_level_protocol(),
            transport,
        )
    }

    fn from_ipv6(bytes: &[u8], timestamp: DateTime<Utc>) -> Option<Self> {
        let ip = Ipv6Packet::new(bytes)?;
        if ip.get_version() != 6 {
            return None;
        }
        let payload = bytes.get(IPV6_HEADER_LEN as usize..)?;
        let (next, transport) = skip_ipv6_extensions(ip.get_next_header(), payload)?;
        Self::with_transport(
            timestamp,
            IpAddr::V6(ip.get_source()),
            IpAddr::V6(ip.get_destination()),
            u32::from(ip.get_payload_length()) + IPV6_HEADER_LEN,
            ip.get_hop_limit(),
            next,
            transport,
        )
    }

    fn with_transport(
        timestamp: DateTime<Utc>,
        source_ip: IpAddr,
        destination_ip: IpAddr,
        length: u32,
        ttl: u8,
        next: IpNextHeaderProtocol,
        transport: &[u8],
    ) -> Option<Self> {
        let mut packet = Self {
            timestamp,
            source_ip,
            destination_ip,
            source_port: None,
            destination_port: None,
            protocol: Protocol::Other,
            length,
            ttl,
            tcp: None,
        };

        match next {
            IpNextHeaderProtocols::Tcp => {
                let tcp = TcpPacket::new(transport)?;
                let flags = tcp.get_flags();
                packet.protocol = Protocol::Tcp;
                packet.source_port = Some(tcp.get_source());
                packet.destination_port = Some(tcp.get_destination());
                packet.tcp = Some(TcpHeader {
                    control: TcpControl {
                        syn: flags & TcpFlags::SYN != 0,
                        ack: flags & TcpFlags::ACK != 0,
                        fin: flags & TcpFlags::FIN != 0,
                        rst: flags & TcpFlags::RST != 0,
                    },
                    window: tcp.get_window(),
                    sequence: tcp.get_sequence(),
                });
            }
            IpNextHeaderProtocols::Udp => {
                let udp = UdpPacket::new(transport)?;
                packet.protocol = Protocol::Udp;
                packet.source_port = Some(udp.get_source());
                packet.destination_port = Some(udp.get_destination());
            }
            _ => {}
        }

        Some(packet)
    }

    /// 패킷 시각 (Unix epoch 초, 마이크로초 정밀도)
    pub fn epoch_secs(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1_000_000.0
    }

    /// 거친 연결 상태: TCP는 플래그로, UDP는 항상 `CON`
    pub fn conn_state(&self) -> Option<ConnState> {
        match self.protocol {
            Protocol::Tcp => self.tcp.and_then(|tcp| tcp.control.conn_state()),
            Protocol::Udp => Some(ConnState::Con),
            Protocol::Other => None,
        }
    }
}

/// IPv6 확장 헤더를 건너뛰어 (상위 프로토콜, 전송 계층 바이트)를 돌려줍니다.
///
/// 확장 헤더가 잘렸거나 너무 많으면 `None`. 첫 조각이 아닌 fragment는
/// `Ipv6Frag`를 그대로 돌려주어 포트 없는 패킷이 됩니다.
fn skip_ipv6_extensions(
    mut next: IpNextHeaderProtocol,
    mut rest: &[u8],
) -> Option<(IpNextHeaderProtocol, &[u8])> {
    for _ in 0..MAX_IPV6_EXTENSIONS {
        let header_len = match next {
            IpNextHeaderProtocols::Hopopt
            | IpNextHeaderProtocols::Ipv6Route
            | IpNextHeaderProtocols::Ipv6Opts => (usize::from(*rest.get(1)?) + 1) * 8,
            IpNextHeaderProtocols::Ah => (usize::from(*rest.get(1)?) + 2) * 4,
            IpNextHeaderProtocols::Ipv6Frag => {
                let offset = u16::from_be_bytes([*rest.get(2)?, *rest.get(3)?]) >> 3;
                if offset != 0 {
                    return Some((IpNextHeaderProtocols::Ipv6Frag, &rest[..0]));
                }
                8
            }
            _ => return Some((next, rest)),
        };
        let following = IpNextHeaderProtocol::new(*rest.first()?);
        rest = rest.get(header_len..)?;
        next = following;
    }
    None
}
