//! Configuration types

use crate::dataplane::{AllocationPolicy, InterfaceId, LinkRewrite, NatConfig, VerifyOrder};
use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// User-defined configuration (flownat.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub nat: NatSection,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceConfig>,
    #[serde(default)]
    pub logging: LogConfig,
}

/// `[nat]` section
#[derive(Debug, Clone, Deserialize)]
pub struct NatSection {
    /// Seconds
    pub idle_timeout: u64,
    pub external_address: Ipv4Addr,
    /// Name of an entry in `[interfaces]`
    pub external_interface: String,
    #[serde(default = "default_start_port")]
    pub start_port: u16,
    pub capacity: usize,
    #[serde(default)]
    pub allocation: AllocationPolicy,
    #[serde(default)]
    pub verify_order: VerifyOrder,
    /// Seconds, defaults to `idle_timeout`
    pub sweep_interval: Option<u64>,
}

fn default_start_port() -> u16 {
    1024
}

/// `[interfaces.NAME]` section
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub id: u16,
    /// Source MAC for frames sent on this interface
    pub mac: Option<MacAddr>,
    /// Destination MAC for frames sent on this interface
    pub peer_mac: Option<MacAddr>,
}

impl InterfaceConfig {
    pub fn link_rewrite(&self) -> Option<LinkRewrite> {
        Some(LinkRewrite {
            src_mac: self.mac?,
            dst_mac: self.peer_mac?,
        })
    }
}

impl Config {
    pub fn interface_id(&self, name: &str) -> Option<InterfaceId> {
        self.interfaces.get(name).map(|iface| InterfaceId(iface.id))
    }

    /// Interface name for `id`, if configured
    pub fn interface_name(&self, id: InterfaceId) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|(_, iface)| iface.id == id.0)
            .map(|(name, _)| name.as_str())
    }

    /// Translator settings with interface names resolved
    pub fn nat_config(&self) -> Result<NatConfig> {
        let nat = &self.nat;
        let external_interface =
            self.interface_id(&nat.external_interface)
                .ok_or_else(|| Error::InterfaceNotFound {
                    name: nat.external_interface.clone(),
                })?;

        let links = self
            .interfaces
            .values()
            .filter_map(|iface| Some((InterfaceId(iface.id), iface.link_rewrite()?)))
            .collect();

        Ok(NatConfig {
            idle_timeout: Duration::from_secs(nat.idle_timeout),
            external_address: nat.external_address,
            external_interface,
            start_port: nat.start_port,
            capacity: nat.capacity,
            allocation: nat.allocation,
            verify_order: nat.verify_order,
            sweep_interval: nat.sweep_interval.map(Duration::from_secs),
            links,
        })
    }
}
