//! Flow identity, table entries and the time base they are aged against

use crate::protocol::TransportProtocol;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Point in time used for flow ageing.
///
/// Measured from an arbitrary origin; only differences matter. Arithmetic
/// saturates at the origin instead of going negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(Duration::from_millis(millis))
    }

    pub fn saturating_sub(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_sub(d))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }
}

/// Monotonic clock handing out [`Timestamp`]s relative to its creation
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric identifier of a network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(pub u16);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Offset into the external port range; the visible port is `start_port + index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortIndex(u16);

impl PortIndex {
    pub const fn new(index: u16) -> Self {
        PortIndex(index)
    }

    /// Index for a slot position, if it fits the 16-bit port space
    pub fn from_usize(index: usize) -> Option<Self> {
        u16::try_from(index).ok().map(PortIndex)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of an internally initiated flow, as seen on the internal side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_port: u16,
    pub dst_port: u16,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub ingress: InterfaceId,
    pub protocol: TransportProtocol,
}

impl FlowKey {
    /// True if a packet from `addr:port` over `protocol` comes from the
    /// remote endpoint this flow contacted.
    pub fn matches_remote(&self, addr: Ipv4Addr, port: u16, protocol: TransportProtocol) -> bool {
        self.dst_addr == addr && self.dst_port == port && self.protocol == protocol
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{} on {}",
            self.protocol, self.src_addr, self.src_port, self.dst_addr, self.dst_port, self.ingress
        )
    }
}

/// One live translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    pub key: FlowKey,
    pub index: PortIndex,
    pub last_seen: Timestamp,
    /// For logging only
    pub created_at: Timestamp,
}

impl FlowEntry {
    /// Live iff `now - last_seen < idle_timeout`
    pub fn is_live(&self, now: Timestamp, idle_timeout: Duration) -> bool {
        now.duration_since(self.last_seen) < idle_timeout
    }
}
