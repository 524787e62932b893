//! Transport header stage of the classifier: TCP and UDP share one view

use super::tcp::{self, TcpHeader};
use super::udp::{self, UdpHeader};
use crate::{Error, Result};
use std::fmt;

/// Transport protocols the translator can track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            tcp::PROTOCOL_NUMBER => Some(TransportProtocol::Tcp),
            udp::PROTOCOL_NUMBER => Some(TransportProtocol::Udp),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            TransportProtocol::Tcp => tcp::PROTOCOL_NUMBER,
            TransportProtocol::Udp => udp::PROTOCOL_NUMBER,
        }
    }

    /// Offset of the checksum field inside the transport header
    pub fn checksum_offset(self) -> usize {
        match self {
            TransportProtocol::Tcp => tcp::CHECKSUM_OFFSET,
            TransportProtocol::Udp => udp::CHECKSUM_OFFSET,
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "tcp"),
            TransportProtocol::Udp => write!(f, "udp"),
        }
    }
}

/// Ports and checksum of a TCP or UDP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpUdpHeader {
    pub protocol: TransportProtocol,
    pub src_port: u16,
    pub dst_port: u16,
    pub checksum: u16,
    header_len: usize,
}

impl TcpUdpHeader {
    pub fn header_len(&self) -> usize {
        self.header_len
    }
}

/// Split an IPv4 payload into its transport header and the data after it.
pub fn pop_transport_header(
    rest: &[u8],
    protocol: TransportProtocol,
) -> Result<(TcpUdpHeader, &[u8])> {
    let header = match protocol {
        TransportProtocol::Tcp => {
            let tcp = TcpHeader::parse(rest)?;
            TcpUdpHeader {
                protocol,
                src_port: tcp.src_port(),
                dst_port: tcp.dst_port(),
                checksum: tcp.checksum(),
                header_len: tcp.header_len(),
            }
        }
        TransportProtocol::Udp => {
            let udp = UdpHeader::parse(rest)?;
            if (udp.length() as usize) < udp::HEADER_SIZE {
                return Err(Error::Parse("UDP length below header size".into()));
            }
            TcpUdpHeader {
                protocol,
                src_port: udp.src_port(),
                dst_port: udp.dst_port(),
                checksum: udp.checksum(),
                header_len: udp::HEADER_SIZE,
            }
        }
    };

    Ok((header, &rest[header.header_len..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tcp::TcpBuilder;
    use crate::protocol::udp::UdpBuilder;
    use std::net::Ipv4Addr;

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const B: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(TransportProtocol::from_u8(6), Some(TransportProtocol::Tcp));
        assert_eq!(TransportProtocol::from_u8(17), Some(TransportProtocol::Udp));
        assert_eq!(TransportProtocol::from_u8(1), None);
        assert_eq!(TransportProtocol::Udp.number(), 17);
        assert_eq!(TransportProtocol::Tcp.to_string(), "tcp");
    }

    #[test]
    fn test_pop_tcp() {
        let seg = TcpBuilder::new()
            .src_port(5000)
            .dst_port(80)
            .payload(b"hello")
            .build(A, B);

        let (hdr, data) = pop_transport_header(&seg, TransportProtocol::Tcp).unwrap();
        assert_eq!(hdr.protocol, TransportProtocol::Tcp);
        assert_eq!((hdr.src_port, hdr.dst_port), (5000, 80));
        assert_eq!(hdr.header_len(), 20);
        assert_eq!(data, b"hello");
    }

    #[test]
    fn test_pop_udp() {
        let dgram = UdpBuilder::new()
            .src_port(40000)
            .dst_port(53)
            .payload(b"q")
            .build(A, B);

        let (hdr, data) = pop_transport_header(&dgram, TransportProtocol::Udp).unwrap();
        assert_eq!((hdr.src_port, hdr.dst_port), (40000, 53));
        assert_ne!(hdr.checksum, 0);
        assert_eq!(data, b"q");
    }

    #[test]
    fn test_pop_truncated() {
        assert!(pop_transport_header(&[0u8; 12], TransportProtocol::Tcp).is_err());
        assert!(pop_transport_header(&[0u8; 4], TransportProtocol::Udp).is_err());

        // UDP header with length field 0
        assert!(pop_transport_header(&[0u8; 8], TransportProtocol::Udp).is_err());
    }
}
