//! NAPT translator
//!
//! Per-packet decision for a many-to-one source NAT. Internal flows are
//! identified by their full 5-tuple plus ingress interface and get one port
//! of the external range each. Return traffic is matched by port alone and
//! then checked against the remote endpoint the internal host contacted.
//!
//! Expiry is driven by packet arrivals: an opportunistic sweep runs every
//! `sweep_interval`, and any entry found idle on lookup is removed on the
//! spot.

use super::allocator::{AllocationPolicy, IndexAllocator};
use super::flow::{FlowKey, InterfaceId, PortIndex, Timestamp};
use super::flow_table::{FlowTable, MAX_CAPACITY};
use crate::protocol::{
    pop_link_header, pop_network_header, pop_transport_header, rewrite, HeaderOverrides, Layout,
    MacAddr, TcpUdpHeader, TransportProtocol,
};
use crate::telemetry::NatMetrics;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Order of refresh and anti-spoof check on the return path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyOrder {
    /// A mismatching packet leaves the flow's age untouched
    #[default]
    VerifyThenRefresh,
    /// Any packet hitting an allocated port keeps the flow alive
    RefreshThenVerify,
}

impl fmt::Display for VerifyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyOrder::VerifyThenRefresh => write!(f, "verify-then-refresh"),
            VerifyOrder::RefreshThenVerify => write!(f, "refresh-then-verify"),
        }
    }
}

/// Ethernet addresses written on frames leaving an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRewrite {
    /// Our own address on the link
    pub src_mac: MacAddr,
    /// Next hop on the link
    pub dst_mac: MacAddr,
}

/// Translator settings, fixed for the lifetime of a [`Translator`]
#[derive(Debug, Clone)]
pub struct NatConfig {
    pub idle_timeout: Duration,
    pub external_address: Ipv4Addr,
    pub external_interface: InterfaceId,
    pub start_port: u16,
    pub capacity: usize,
    pub allocation: AllocationPolicy,
    pub verify_order: VerifyOrder,
    /// Defaults to `idle_timeout`
    pub sweep_interval: Option<Duration>,
    /// Interfaces without an entry keep the frame's MAC addresses
    pub links: HashMap<InterfaceId, LinkRewrite>,
}

impl NatConfig {
    pub fn new(
        idle_timeout: Duration,
        external_address: Ipv4Addr,
        external_interface: InterfaceId,
        start_port: u16,
        capacity: usize,
    ) -> Self {
        Self {
            idle_timeout,
            external_address,
            external_interface,
            start_port,
            capacity,
            allocation: AllocationPolicy::default(),
            verify_order: VerifyOrder::default(),
            sweep_interval: None,
            links: HashMap::new(),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval.unwrap_or(self.idle_timeout)
    }

    /// Last external port handed out, if the range is not empty
    pub fn end_port(&self) -> Option<u16> {
        let last = (self.start_port as usize + self.capacity).checked_sub(1)?;
        u16::try_from(last).ok()
    }

    fn check(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle_timeout must be greater than zero".into()));
        }
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be greater than zero".into()));
        }
        if self.start_port as usize + self.capacity > MAX_CAPACITY {
            return Err(Error::Config(format!(
                "port range {}+{} exceeds 65535",
                self.start_port, self.capacity
            )));
        }
        Ok(())
    }
}

/// Forwarding action for an accepted packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub egress: InterfaceId,
    pub packet: Vec<u8>,
}

/// Why a packet produced no output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Truncated or inconsistent headers
    Malformed,
    /// Not IPv4, or not TCP/UDP
    UnsupportedProtocol,
    /// IPv4 fragment
    Fragment,
    /// Return-path port outside the external range
    IndexOutOfRange,
    /// Return-path port with no live flow
    NoFlow,
    /// Return traffic from a peer other than the one the flow contacted
    SpoofMismatch,
    /// New flow while every index is held by a live flow
    TableFull,
}

impl DropReason {
    pub const ALL: [DropReason; 7] = [
        DropReason::Malformed,
        DropReason::UnsupportedProtocol,
        DropReason::Fragment,
        DropReason::IndexOutOfRange,
        DropReason::NoFlow,
        DropReason::SpoofMismatch,
        DropReason::TableFull,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::UnsupportedProtocol => "unsupported_protocol",
            DropReason::Fragment => "fragment",
            DropReason::IndexOutOfRange => "index_out_of_range",
            DropReason::NoFlow => "no_flow",
            DropReason::SpoofMismatch => "spoof_mismatch",
            DropReason::TableFull => "table_full",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headers of a packet the translator can handle
struct Classified {
    layout: Layout,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    l4: TcpUdpHeader,
}

fn classify(packet: &[u8]) -> std::result::Result<Classified, DropReason> {
    let (link, rest) = pop_link_header(packet).map_err(|_| DropReason::Malformed)?;
    if !link.carries_ipv4() {
        return Err(DropReason::UnsupportedProtocol);
    }

    let (ip, rest) = pop_network_header(rest).map_err(|_| DropReason::Malformed)?;
    if !ip.validate_checksum() {
        return Err(DropReason::Malformed);
    }
    if ip.is_fragment() {
        return Err(DropReason::Fragment);
    }
    let protocol =
        TransportProtocol::from_u8(ip.protocol()).ok_or(DropReason::UnsupportedProtocol)?;

    let (l4, _) = pop_transport_header(rest, protocol).map_err(|_| DropReason::Malformed)?;

    Ok(Classified {
        layout: Layout::new(&link, &ip, &l4),
        src_addr: ip.src_addr(),
        dst_addr: ip.dst_addr(),
        l4,
    })
}

/// Stateful NAPT over one flow table
pub struct Translator {
    config: NatConfig,
    table: FlowTable,
    allocator: IndexAllocator,
    last_sweep: Timestamp,
    metrics: Arc<NatMetrics>,
}

impl Translator {
    pub fn new(config: NatConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NatMetrics::new()))
    }

    pub fn with_metrics(config: NatConfig, metrics: Arc<NatMetrics>) -> Result<Self> {
        config.check()?;

        let table = FlowTable::new(config.capacity)?;
        let allocator = IndexAllocator::new(config.allocation);

        info!(
            external_address = %config.external_address,
            external_interface = %config.external_interface,
            start_port = config.start_port,
            capacity = config.capacity,
            idle_timeout = ?config.idle_timeout,
            allocation = %config.allocation,
            verify_order = %config.verify_order,
            "NAPT translator ready"
        );

        Ok(Self {
            config,
            table,
            allocator,
            last_sweep: Timestamp::ZERO,
            metrics,
        })
    }

    pub fn config(&self) -> &NatConfig {
        &self.config
    }

    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    pub fn metrics(&self) -> &Arc<NatMetrics> {
        &self.metrics
    }

    /// Translate one packet received on `ingress` at `now`.
    ///
    /// `None` means the packet is dropped.
    pub fn process(
        &mut self,
        ingress: InterfaceId,
        packet: &[u8],
        now: Timestamp,
    ) -> Option<Translation> {
        self.decide(ingress, packet, now).ok()
    }

    /// Same as [`process`](Self::process), reporting why a packet was dropped.
    pub fn decide(
        &mut self,
        ingress: InterfaceId,
        packet: &[u8],
        now: Timestamp,
    ) -> std::result::Result<Translation, DropReason> {
        self.metrics.packets_received.inc();

        if now.duration_since(self.last_sweep) >= self.config.sweep_interval() {
            self.sweep(now);
        }

        let result = classify(packet).and_then(|c| {
            if ingress == self.config.external_interface {
                self.inbound(packet, &c, now)
            } else {
                self.outbound(ingress, packet, &c, now)
            }
        });

        if let Err(reason) = result {
            self.metrics.record_drop(reason);
            debug!(%ingress, %reason, len = packet.len(), "packet dropped");
        }
        self.metrics.set_flow_table_size(self.table.len());

        result
    }

    /// Remove every idle flow; returns how many were removed
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        self.last_sweep = self.last_sweep.max(now);

        let freed = self.table.expire_idle(now, self.config.idle_timeout);
        if !freed.is_empty() {
            self.metrics.flows_expired.add(freed.len() as u64);
            info!(
                expired = freed.len(),
                remaining = self.table.len(),
                "flow sweep"
            );
        }
        freed.len()
    }

    /// Drop the entry at `index` if it is no longer live
    fn expire_if_idle(&mut self, index: PortIndex, now: Timestamp) {
        let idle = self
            .table
            .lookup_by_index(index)
            .is_some_and(|entry| !entry.is_live(now, self.config.idle_timeout));

        if idle {
            if let Some(entry) = self.table.remove(index) {
                self.metrics.flows_expired.inc();
                debug!(flow = %entry.key, %index, "idle flow removed on lookup");
            }
        }
    }

    fn external_port(&self, index: PortIndex) -> std::result::Result<u16, DropReason> {
        self.config
            .start_port
            .checked_add(index.get())
            .ok_or(DropReason::IndexOutOfRange)
    }

    fn link_overrides(&self, egress: InterfaceId) -> HeaderOverrides {
        match self.config.links.get(&egress) {
            Some(link) => HeaderOverrides {
                src_mac: Some(link.src_mac),
                dst_mac: Some(link.dst_mac),
                ..Default::default()
            },
            None => HeaderOverrides::default(),
        }
    }

    /// Internal -> external
    fn outbound(
        &mut self,
        ingress: InterfaceId,
        packet: &[u8],
        c: &Classified,
        now: Timestamp,
    ) -> std::result::Result<Translation, DropReason> {
        let key = FlowKey {
            src_port: c.l4.src_port,
            dst_port: c.l4.dst_port,
            src_addr: c.src_addr,
            dst_addr: c.dst_addr,
            ingress,
            protocol: c.l4.protocol,
        };

        let existing = self
            .table
            .lookup_by_key(&key)
            .map(|(index, entry)| (index, entry.is_live(now, self.config.idle_timeout)));

        let index = match existing {
            Some((index, true)) => {
                self.table.refresh(index, now);
                trace!(flow = %key, %index, "flow refreshed");
                index
            }
            Some((index, false)) => {
                self.expire_if_idle(index, now);
                self.admit(key, now)?
            }
            None => self.admit(key, now)?,
        };

        let egress = self.config.external_interface;
        let overrides = HeaderOverrides {
            src_addr: Some(self.config.external_address),
            src_port: Some(self.external_port(index)?),
            ..self.link_overrides(egress)
        };
        let packet = rewrite(packet, &c.layout, &overrides).map_err(|_| DropReason::Malformed)?;

        self.metrics.forwarded_outbound.inc();
        Ok(Translation { egress, packet })
    }

    /// Create a flow for `key`; live flows are never displaced
    fn admit(&mut self, key: FlowKey, now: Timestamp) -> std::result::Result<PortIndex, DropReason> {
        if self.table.is_full() {
            self.sweep(now);
        }

        let Some(index) = self.allocator.allocate(&self.table) else {
            debug!(flow = %key, capacity = self.table.capacity(), "flow table full");
            return Err(DropReason::TableFull);
        };

        if let Err(e) = self.table.insert(key, index, now) {
            debug!(flow = %key, %index, error = %e, "flow insert rejected");
            return Err(DropReason::TableFull);
        }

        self.metrics.flows_created.inc();
        debug!(
            flow = %key,
            %index,
            external_port = self.config.start_port as usize + index.as_usize(),
            "flow created"
        );
        Ok(index)
    }

    /// External -> internal
    fn inbound(
        &mut self,
        packet: &[u8],
        c: &Classified,
        now: Timestamp,
    ) -> std::result::Result<Translation, DropReason> {
        let index = c
            .l4
            .dst_port
            .checked_sub(self.config.start_port)
            .map(PortIndex::new)
            .filter(|index| index.as_usize() < self.table.capacity())
            .ok_or(DropReason::IndexOutOfRange)?;

        self.expire_if_idle(index, now);
        let key = self
            .table
            .lookup_by_index(index)
            .map(|entry| entry.key)
            .ok_or(DropReason::NoFlow)?;

        let genuine = key.matches_remote(c.src_addr, c.l4.src_port, c.l4.protocol);
        match self.config.verify_order {
            VerifyOrder::VerifyThenRefresh => {
                if !genuine {
                    return Err(DropReason::SpoofMismatch);
                }
                self.table.refresh(index, now);
            }
            VerifyOrder::RefreshThenVerify => {
                self.table.refresh(index, now);
                if !genuine {
                    return Err(DropReason::SpoofMismatch);
                }
            }
        }
        trace!(flow = %key, %index, "return traffic");

        let egress = key.ingress;
        let overrides = HeaderOverrides {
            dst_addr: Some(key.src_addr),
            dst_port: Some(key.src_port),
            ..self.link_overrides(egress)
        };
        let packet = rewrite(packet, &c.layout, &overrides).map_err(|_| DropReason::Malformed)?;

        self.metrics.forwarded_inbound.inc();
        Ok(Translation { egress, packet })
    }
}
