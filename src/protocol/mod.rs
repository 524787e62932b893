//! Packet classifier and header rewrite
//!
//! Parsing is split into three pop stages (link, network, transport), each
//! returning a typed header plus the remaining bytes, or a parse error on
//! malformed input. Nothing in here panics on adversarial bytes.

pub mod checksum;
pub mod ethernet;
pub mod ipv4;
pub mod rewrite;
pub mod tcp;
pub mod transport;
pub mod types;
pub mod udp;

pub use ethernet::{pop_link_header, EtherHeader};
pub use ipv4::{pop_network_header, Ipv4Header};
pub use rewrite::{rewrite, HeaderOverrides, Layout};
pub use transport::{pop_transport_header, TcpUdpHeader, TransportProtocol};
pub use types::*;
