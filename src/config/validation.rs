//! Configuration validation

use super::Config;
use crate::dataplane::MAX_CAPACITY;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_nat(config, &mut result);
    validate_interfaces(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_nat(config: &Config, result: &mut ValidationResult) {
    let nat = &config.nat;

    if nat.idle_timeout == 0 {
        result.error("nat.idle_timeout: must be greater than zero");
    }

    if nat.capacity == 0 {
        result.error("nat.capacity: must be greater than zero");
    } else if nat.start_port as usize + nat.capacity > MAX_CAPACITY {
        result.error(format!(
            "nat: port range {}..{} exceeds 65535",
            nat.start_port,
            nat.start_port as usize + nat.capacity
        ));
    }

    if nat.start_port < 1024 {
        result.warn(format!(
            "nat.start_port: {} overlaps well-known ports",
            nat.start_port
        ));
    }

    if let Some(sweep) = nat.sweep_interval {
        if sweep == 0 {
            result.warn("nat.sweep_interval: 0 sweeps on every packet");
        } else if sweep > nat.idle_timeout {
            result.warn(format!(
                "nat.sweep_interval: {}s is longer than idle_timeout {}s",
                sweep, nat.idle_timeout
            ));
        }
    }

    if !config.interfaces.contains_key(&nat.external_interface) {
        result.error(format!(
            "nat.external_interface: interface '{}' not defined",
            nat.external_interface
        ));
    }

    if nat.external_address.is_unspecified() || nat.external_address.is_broadcast() {
        result.error(format!(
            "nat.external_address: {} is not a usable address",
            nat.external_address
        ));
    }
}

fn validate_interfaces(config: &Config, result: &mut ValidationResult) {
    if config.interfaces.len() < 2 {
        result.error("interfaces: at least one internal and one external interface required");
    }

    let mut seen: HashMap<u16, &str> = HashMap::new();
    for (name, iface) in &config.interfaces {
        if let Some(other) = seen.insert(iface.id, name.as_str()) {
            result.error(format!(
                "interfaces.{}: id {} already used by '{}'",
                name, iface.id, other
            ));
        }

        if iface.mac.is_some_and(|mac| mac.is_multicast()) {
            result.error(format!(
                "interfaces.{}: mac must be a unicast address",
                name
            ));
        }

        match (iface.mac, iface.peer_mac) {
            (Some(_), None) => result.warn(format!(
                "interfaces.{}: mac set without peer_mac, MAC rewrite disabled",
                name
            )),
            (None, Some(_)) => result.warn(format!(
                "interfaces.{}: peer_mac set without mac, MAC rewrite disabled",
                name
            )),
            _ => {}
        }
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    if !config.logging.has_valid_level() {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            config.logging.level
        ));
    }
}
