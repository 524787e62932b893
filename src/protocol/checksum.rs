//! Internet checksum helpers (RFC 1071, RFC 1624)
//!
//! Full computation is used when building packets; the translator only ever
//! patches a few words, so it uses the incremental form instead of summing the
//! whole segment again.

use std::net::Ipv4Addr;

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

fn sum_words(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum = sum.wrapping_add(word as u32);
    }
    sum
}

/// Checksum over an IPv4 pseudo-header followed by a transport segment
///
/// ```text
/// +--------+--------+--------+--------+
/// |          Source Address           |
/// +--------+--------+--------+--------+
/// |        Destination Address        |
/// +--------+--------+--------+--------+
/// |  Zero  |Protocol|  Segment Length |
/// +--------+--------+--------+--------+
/// ```
pub fn pseudo_header_checksum(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: u8,
    segment: &[u8],
) -> u16 {
    let mut sum = sum_words(&src_ip.octets());
    sum = sum.wrapping_add(sum_words(&dst_ip.octets()));
    sum = sum.wrapping_add(protocol as u32);
    sum = sum.wrapping_add(segment.len() as u32);
    sum = sum.wrapping_add(sum_words(segment));
    !fold(sum)
}

/// Patch a checksum after one 16-bit word changed from `old` to `new`.
///
/// HC' = ~(~HC + ~m + m')  (RFC 1624, eqn. 3)
pub fn update_checksum_16(checksum: u16, old: u16, new: u16) -> u16 {
    let sum = (!checksum as u32) + (!old as u32) + (new as u32);
    !fold(sum)
}

/// Patch a checksum after an IPv4 address changed.
pub fn update_checksum_addr(checksum: u16, old: Ipv4Addr, new: Ipv4Addr) -> u16 {
    let o = old.octets();
    let n = new.octets();
    let checksum = update_checksum_16(
        checksum,
        u16::from_be_bytes([o[0], o[1]]),
        u16::from_be_bytes([n[0], n[1]]),
    );
    update_checksum_16(
        checksum,
        u16::from_be_bytes([o[2], o[3]]),
        u16::from_be_bytes([n[2], n[3]]),
    )
}
