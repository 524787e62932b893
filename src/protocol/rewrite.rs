//! Header rewrite: applies sparse field overrides to a classified frame
//!
//! The caller supplies only the semantic changes (MACs, addresses, ports).
//! Dependent fields are kept consistent here: the IPv4 header checksum is
//! recomputed and the TCP/UDP checksum is patched incrementally, so the
//! payload is never summed again.

use super::checksum::{update_checksum_16, update_checksum_addr};
use super::ethernet::EtherHeader;
use super::ipv4::{self, Ipv4Header};
use super::transport::{TcpUdpHeader, TransportProtocol};
use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Where each layer starts inside a frame that passed classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub l3_offset: usize,
    pub l3_header_len: usize,
    pub l4_offset: usize,
    pub protocol: TransportProtocol,
}

impl Layout {
    pub fn new(link: &EtherHeader, network: &Ipv4Header<'_>, transport: &TcpUdpHeader) -> Self {
        let l3_offset = link.header_len();
        Self {
            l3_offset,
            l3_header_len: network.header_len(),
            l4_offset: l3_offset + network.header_len(),
            protocol: transport.protocol,
        }
    }
}

/// Fields to replace; `None` keeps the original value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderOverrides {
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
    pub src_addr: Option<Ipv4Addr>,
    pub dst_addr: Option<Ipv4Addr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_addr(buf: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[at], buf[at + 1], buf[at + 2], buf[at + 3])
}

/// Produce a copy of `frame` with `overrides` applied.
pub fn rewrite(frame: &[u8], layout: &Layout, overrides: &HeaderOverrides) -> Result<Vec<u8>> {
    let l4_min = match layout.protocol {
        TransportProtocol::Tcp => super::tcp::MIN_HEADER_SIZE,
        TransportProtocol::Udp => super::udp::HEADER_SIZE,
    };
    if layout.l3_header_len < ipv4::MIN_HEADER_SIZE
        || layout.l4_offset != layout.l3_offset + layout.l3_header_len
        || frame.len() < layout.l4_offset + l4_min
    {
        return Err(Error::InvalidPacket("layout does not fit frame".into()));
    }

    let mut out = frame.to_vec();

    if let Some(mac) = overrides.dst_mac {
        out[0..6].copy_from_slice(&mac.0);
    }
    if let Some(mac) = overrides.src_mac {
        out[6..12].copy_from_slice(&mac.0);
    }

    let l3 = layout.l3_offset;
    let l4 = layout.l4_offset;
    let csum_at = l4 + layout.protocol.checksum_offset();
    let old_l4_sum = read_u16(&out, csum_at);

    // UDP checksum 0 means "not computed" and must stay that way
    let patch_l4 = !(layout.protocol == TransportProtocol::Udp && old_l4_sum == 0);
    let mut l4_sum = old_l4_sum;

    let addr_fields = [
        (ipv4::SRC_ADDR_OFFSET, overrides.src_addr),
        (ipv4::DST_ADDR_OFFSET, overrides.dst_addr),
    ];
    for (offset, new) in addr_fields {
        if let Some(new) = new {
            let at = l3 + offset;
            let old = read_addr(&out, at);
            out[at..at + 4].copy_from_slice(&new.octets());
            l4_sum = update_checksum_addr(l4_sum, old, new);
        }
    }

    let port_fields = [(0usize, overrides.src_port), (2usize, overrides.dst_port)];
    for (offset, new) in port_fields {
        if let Some(new) = new {
            let at = l4 + offset;
            let old = read_u16(&out, at);
            out[at..at + 2].copy_from_slice(&new.to_be_bytes());
            l4_sum = update_checksum_16(l4_sum, old, new);
        }
    }

    if patch_l4 {
        if layout.protocol == TransportProtocol::Udp && l4_sum == 0 {
            l4_sum = 0xFFFF;
        }
        out[csum_at..csum_at + 2].copy_from_slice(&l4_sum.to_be_bytes());
    }

    let ip_end = l3 + layout.l3_header_len;
    out[l3 + ipv4::CHECKSUM_OFFSET] = 0;
    out[l3 + ipv4::CHECKSUM_OFFSET + 1] = 0;
    let ip_sum = ipv4::checksum(&out[l3..ip_end]);
    out[l3 + ipv4::CHECKSUM_OFFSET..l3 + ipv4::CHECKSUM_OFFSET + 2]
        .copy_from_slice(&ip_sum.to_be_bytes());

    Ok(out)
}
