//! TCP protocol - RFC 793
//!
//! Only the parts the translator touches: ports and checksum.

use super::checksum::pseudo_header_checksum;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum TCP header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TCP protocol number for pseudo-header
pub const PROTOCOL_NUMBER: u8 = 6;

/// Checksum field offset within the header
pub const CHECKSUM_OFFSET: usize = 16;

/// Parsed TCP header (zero-copy reference)
#[derive(Debug)]
pub struct TcpHeader<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP header too short".into()));
        }

        let header_len = ((buffer[12] >> 4) as usize) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP data offset too small".into()));
        }
        if buffer.len() < header_len {
            return Err(Error::Parse("TCP header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[16], self.buffer[17]])
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    /// Validate checksum with pseudo-header
    pub fn validate_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        tcp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// Calculate TCP checksum with pseudo-header
pub fn tcp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, tcp_segment: &[u8]) -> u16 {
    pseudo_header_checksum(src_ip, dst_ip, PROTOCOL_NUMBER, tcp_segment)
}

/// Builds a bare TCP segment (no options) with a valid checksum
#[derive(Debug, Clone, Default)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    flags: u8,
    payload: Vec<u8>,
}

impl TcpBuilder {
    pub fn new() -> Self {
        Self {
            flags: 0x02,
            ..Self::default()
        }
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    /// Raw flags byte (default SYN)
    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let mut buffer = vec![0u8; MIN_HEADER_SIZE + self.payload.len()];

        buffer[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buffer[12] = 0x50;
        buffer[13] = self.flags;
        buffer[14..16].copy_from_slice(&0x7210u16.to_be_bytes());
        buffer[MIN_HEADER_SIZE..].copy_from_slice(&self.payload);

        let sum = tcp_checksum(src_ip, dst_ip, &buffer);
        buffer[16..18].copy_from_slice(&sum.to_be_bytes());
        buffer
    }
}
