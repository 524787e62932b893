//! Ethernet link header: the first classifier stage

use super::{EtherType, MacAddr, VlanTag};
use crate::{Error, Result};

/// Untagged Ethernet header size
pub const HEADER_SIZE: usize = 14;
/// Header size with one 802.1Q tag
pub const VLAN_HEADER_SIZE: usize = 18;

/// Parsed Ethernet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtherHeader {
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    pub vlan_tag: Option<VlanTag>,
    /// EtherType of the payload (inner type when tagged)
    pub ethertype: u16,
    header_len: usize,
}

impl EtherHeader {
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn carries_ipv4(&self) -> bool {
        self.ethertype == EtherType::Ipv4 as u16
    }
}

/// Split a frame into its link header and the bytes that follow it.
pub fn pop_link_header(frame: &[u8]) -> Result<(EtherHeader, &[u8])> {
    if frame.len() < HEADER_SIZE {
        return Err(Error::Parse("frame too short".into()));
    }

    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);

    let outer = u16::from_be_bytes([frame[12], frame[13]]);
    let (vlan_tag, ethertype, header_len) = if outer == EtherType::Vlan as u16 {
        if frame.len() < VLAN_HEADER_SIZE {
            return Err(Error::Parse("VLAN frame too short".into()));
        }
        let tag = VlanTag::from_bytes([frame[14], frame[15]]);
        let inner = u16::from_be_bytes([frame[16], frame[17]]);
        (Some(tag), inner, VLAN_HEADER_SIZE)
    } else {
        (None, outer, HEADER_SIZE)
    };

    let header = EtherHeader {
        dst_mac: MacAddr(dst),
        src_mac: MacAddr(src),
        vlan_tag,
        ethertype,
        header_len,
    };
    Ok((header, &frame[header_len..]))
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1522),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn vlan(mut self, vid: u16) -> Self {
        self.buffer
            .extend_from_slice(&(EtherType::Vlan as u16).to_be_bytes());
        self.buffer.extend_from_slice(&(vid & 0x0FFF).to_be_bytes());
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.buffer.extend_from_slice(&ethertype.to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
