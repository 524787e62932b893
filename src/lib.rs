//! flownat - stateful NAPT data plane
//!
//! Translates TCP/UDP over IPv4 between internal interfaces and one external
//! interface, keeping a bounded table of live flows that expire when idle.
//! Return traffic is only accepted from the remote peer that the internal
//! flow originally contacted.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
