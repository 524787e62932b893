//! Packet capture backends
//!
//! The daemon moves frames between interfaces and the translator through
//! the [`Capture`] trait. AF_PACKET is the only backend; it needs no setup
//! beyond CAP_NET_RAW.

mod af_packet;

pub use af_packet::AfPacketSocket;

use crate::Result;
use std::future::Future;

/// Information about a received packet
#[derive(Debug, Clone)]
pub struct RxInfo {
    /// Number of bytes received
    pub len: usize,
}

/// Packet capture backend trait
pub trait Capture: Send + Sync {
    /// Receive a frame into the provided buffer
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<RxInfo>> + Send;

    /// Send a frame
    fn send(&self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}
