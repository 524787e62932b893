//! NAT counters.
//!
//! Lock-free counters updated on the packet path, plus per-interface
//! statistics kept by the daemon's I/O tasks.

use crate::dataplane::DropReason;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-interface statistics.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub rx_packets: Counter,
    pub rx_bytes: Counter,
    pub tx_packets: Counter,
    pub tx_bytes: Counter,
    pub rx_errors: Counter,
    pub tx_errors: Counter,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }
}

/// Drop counters, one per [`DropReason`]
#[derive(Debug, Default)]
pub struct DropCounters {
    pub malformed: Counter,
    pub unsupported_protocol: Counter,
    pub fragment: Counter,
    pub index_out_of_range: Counter,
    pub no_flow: Counter,
    pub spoof_mismatch: Counter,
    pub table_full: Counter,
}

impl DropCounters {
    pub fn counter(&self, reason: DropReason) -> &Counter {
        match reason {
            DropReason::Malformed => &self.malformed,
            DropReason::UnsupportedProtocol => &self.unsupported_protocol,
            DropReason::Fragment => &self.fragment,
            DropReason::IndexOutOfRange => &self.index_out_of_range,
            DropReason::NoFlow => &self.no_flow,
            DropReason::SpoofMismatch => &self.spoof_mismatch,
            DropReason::TableFull => &self.table_full,
        }
    }

    pub fn total(&self) -> u64 {
        DropReason::ALL
            .iter()
            .map(|reason| self.counter(*reason).get())
            .sum()
    }
}

/// Counters for one translator instance.
#[derive(Debug, Default)]
pub struct NatMetrics {
    interfaces: RwLock<BTreeMap<String, InterfaceStats>>,

    /// Packets handed to the translator
    pub packets_received: Counter,
    /// Internal -> external packets forwarded
    pub forwarded_outbound: Counter,
    /// External -> internal packets forwarded
    pub forwarded_inbound: Counter,
    pub flows_created: Counter,
    pub flows_expired: Counter,
    pub drops: DropCounters,

    /// Live entries after the last decision
    pub flow_table_size: AtomicU64,
}

impl NatMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_drop(&self, reason: DropReason) {
        self.drops.counter(reason).inc();
    }

    pub fn set_flow_table_size(&self, size: usize) {
        self.flow_table_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn register_interface(&self, name: &str) {
        self.interfaces.write().entry(name.to_string()).or_default();
    }

    pub fn record_rx(&self, interface: &str, bytes: usize) {
        if let Some(stats) = self.interfaces.read().get(interface) {
            stats.record_rx(bytes);
        }
    }

    pub fn record_tx(&self, interface: &str, bytes: usize) {
        if let Some(stats) = self.interfaces.read().get(interface) {
            stats.record_tx(bytes);
        }
    }

    pub fn record_rx_error(&self, interface: &str) {
        if let Some(stats) = self.interfaces.read().get(interface) {
            stats.rx_errors.inc();
        }
    }

    pub fn record_tx_error(&self, interface: &str) {
        if let Some(stats) = self.interfaces.read().get(interface) {
            stats.tx_errors.inc();
        }
    }

    /// All metrics as key-value pairs, global ones first.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("packets_received".into(), self.packets_received.get()),
            ("forwarded_outbound".into(), self.forwarded_outbound.get()),
            ("forwarded_inbound".into(), self.forwarded_inbound.get()),
            ("flows_created".into(), self.flows_created.get()),
            ("flows_expired".into(), self.flows_expired.get()),
            (
                "flow_table_size".into(),
                self.flow_table_size.load(Ordering::Relaxed),
            ),
            ("dropped_total".into(), self.drops.total()),
        ];

        for reason in DropReason::ALL {
            result.push((
                format!("dropped_{}", reason.as_str()),
                self.drops.counter(reason).get(),
            ));
        }

        let interfaces = self.interfaces.read();
        for (name, stats) in interfaces.iter() {
            result.extend([
                (format!("{}_rx_packets", name), stats.rx_packets.get()),
                (format!("{}_rx_bytes", name), stats.rx_bytes.get()),
                (format!("{}_tx_packets", name), stats.tx_packets.get()),
                (format!("{}_tx_bytes", name), stats.tx_bytes.get()),
                (format!("{}_rx_errors", name), stats.rx_errors.get()),
                (format!("{}_tx_errors", name), stats.tx_errors.get()),
            ]);
        }

        result
    }
}
