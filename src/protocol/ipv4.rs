//! IPv4 network header - RFC 791

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// Offsets of the fields the translator rewrites
pub const CHECKSUM_OFFSET: usize = 10;
pub const SRC_ADDR_OFFSET: usize = 12;
pub const DST_ADDR_OFFSET: usize = 16;

/// Parsed IPv4 header (zero-copy reference)
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }

        let version = buffer[0] >> 4;
        if version != 4 {
            return Err(Error::Parse("not an IPv4 packet".into()));
        }

        let header_len = ((buffer[0] & 0x0F) as usize) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 IHL too small".into()));
        }
        if buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn flags(&self) -> u8 {
        self.buffer[6] >> 5
    }

    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6] & 0x1F, self.buffer[7]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// MF set or non-zero offset
    pub fn is_fragment(&self) -> bool {
        (self.flags() & flags::MF) != 0 || self.fragment_offset() > 0
    }

    pub fn validate_checksum(&self) -> bool {
        checksum(&self.buffer[..self.header_len]) == 0
    }
}

/// Fragment flags
pub mod flags {
    /// Don't Fragment
    pub const DF: u8 = 0b010;
    /// More Fragments
    pub const MF: u8 = 0b001;
}

/// Split the bytes after the link header into the IPv4 header and its payload.
///
/// The payload is cut at `total_length`, so link-layer padding never reaches
/// the transport stage.
pub fn pop_network_header(rest: &[u8]) -> Result<(Ipv4Header<'_>, &[u8])> {
    let header = Ipv4Header::parse(rest)?;
    let total = header.total_length() as usize;

    if total < header.header_len() {
        return Err(Error::Parse("IPv4 total length below header length".into()));
    }
    if total > rest.len() {
        return Err(Error::Parse("IPv4 packet truncated".into()));
    }

    Ok((header, &rest[header.header_len()..total]))
}

/// Calculate IPv4 header checksum
pub fn checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for i in (0..header.len()).step_by(2) {
        let word = if i + 1 < header.len() {
            u16::from_be_bytes([header[i], header[i + 1]])
        } else {
            u16::from_be_bytes([header[i], 0])
        };
        sum = sum.wrapping_add(word as u32);
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Builder for constructing IPv4 packets
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    identification: u16,
    more_fragments: bool,
    fragment_offset: u16,
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            identification: 0,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn more_fragments(mut self, mf: bool) -> Self {
        self.more_fragments = mf;
        self
    }

    pub fn fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset & 0x1FFF;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = (MIN_HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = vec![0u8; MIN_HEADER_SIZE + self.payload.len()];

        // Version (4) + IHL (5)
        buffer[0] = 0x45;
        buffer[2..4].copy_from_slice(&total_length.to_be_bytes());
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());

        let mut flags_frag = self.fragment_offset;
        if self.more_fragments {
            flags_frag |= 0x2000;
        } else if self.fragment_offset == 0 {
            flags_frag |= 0x4000;
        }
        buffer[6..8].copy_from_slice(&flags_frag.to_be_bytes());

        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());
        buffer[MIN_HEADER_SIZE..].copy_from_slice(&self.payload);

        let sum = checksum(&buffer[..MIN_HEADER_SIZE]);
        buffer[10..12].copy_from_slice(&sum.to_be_bytes());

        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
