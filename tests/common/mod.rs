//! Frame builders and fixtures shared by the integration tests

#![allow(dead_code)]

use flownat::dataplane::{InterfaceId, NatConfig};
use flownat::protocol::ethernet::{pop_link_header, FrameBuilder};
use flownat::protocol::ipv4::{pop_network_header, Ipv4Builder};
use flownat::protocol::tcp::TcpBuilder;
use flownat::protocol::udp::UdpBuilder;
use flownat::protocol::{pop_transport_header, EtherType, MacAddr, TransportProtocol};
use std::net::Ipv4Addr;
use std::time::Duration;

pub const WAN: InterfaceId = InterfaceId(0);
pub const LAN: InterfaceId = InterfaceId(1);
pub const LAN2: InterfaceId = InterfaceId(2);

pub const EXTERNAL: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
pub const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const SERVER: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);
pub const ATTACKER: Ipv4Addr = Ipv4Addr::new(45, 45, 45, 45);

/// idle_timeout=10s, start_port=1024, capacity=4
pub fn nat_config() -> NatConfig {
    NatConfig::new(Duration::from_secs(10), EXTERNAL, WAN, 1024, 4)
}

fn ethernet(ip: Vec<u8>) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(MacAddr([2, 0, 0, 0, 0, 1]))
        .src_mac(MacAddr([2, 0, 0, 0, 0, 2]))
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&ip)
        .build()
}

pub fn tcp_frame(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> Vec<u8> {
    let segment = TcpBuilder::new()
        .src_port(sport)
        .dst_port(dport)
        .payload(b"GET / HTTP/1.1\r\n\r\n")
        .build(src, dst);
    ethernet(
        Ipv4Builder::new()
            .src_addr(src)
            .dst_addr(dst)
            .protocol(TransportProtocol::Tcp.number())
            .payload(&segment)
            .build(),
    )
}

pub fn udp_frame(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> Vec<u8> {
    let datagram = UdpBuilder::new()
        .src_port(sport)
        .dst_port(dport)
        .payload(b"query")
        .build(src, dst);
    ethernet(
        Ipv4Builder::new()
            .src_addr(src)
            .dst_addr(dst)
            .protocol(TransportProtocol::Udp.number())
            .payload(&datagram)
            .build(),
    )
}

/// Addresses and ports of a translated frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub src_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_addr: Ipv4Addr,
    pub dst_port: u16,
}

/// Parse `frame` back, checking that every checksum is still valid
pub fn endpoints(frame: &[u8]) -> Endpoints {
    let (_, rest) = pop_link_header(frame).unwrap();
    let (ip, rest) = pop_network_header(rest).unwrap();
    assert!(ip.validate_checksum(), "bad IPv4 header checksum");

    let protocol = TransportProtocol::from_u8(ip.protocol()).unwrap();
    let (l4, _) = pop_transport_header(rest, protocol).unwrap();
    let valid = match protocol {
        TransportProtocol::Tcp => flownat::protocol::tcp::TcpHeader::parse(rest)
            .unwrap()
            .validate_checksum(ip.src_addr(), ip.dst_addr()),
        TransportProtocol::Udp => flownat::protocol::udp::UdpHeader::parse(rest)
            .unwrap()
            .validate_checksum(ip.src_addr(), ip.dst_addr()),
    };
    assert!(valid, "bad {} checksum", protocol);

    Endpoints {
        src_addr: ip.src_addr(),
        src_port: l4.src_port,
        dst_addr: ip.dst_addr(),
        dst_port: l4.dst_port,
    }
}
