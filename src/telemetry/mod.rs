//! Telemetry module for logging and metrics.
//!
//! Provides:
//! - Logging configuration and initialization
//! - NAT counters and per-interface packet statistics

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{Counter, DropCounters, InterfaceStats, NatMetrics};
