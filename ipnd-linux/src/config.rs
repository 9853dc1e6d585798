//! Load config from file and environment.

use serde::Deserialize;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use ipnd_core::protocol::{DISCOVERY_PORT, MULTICAST_GROUP_V4, MULTICAST_GROUP_V6};

/// Daemon configuration. File: ~/.config/ipnd/config.toml or /etc/ipnd/config.toml.
/// Env overrides: IPND_PERIOD, IPND_PORT, IPND_CLA_PORT, IPND_NODE_EID, IPND_IDENTITY.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Beacon period in seconds (default 3).
    #[serde(default = "default_period")]
    pub period: u64,
    /// Discovery UDP port (default 3003).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_group_v4")]
    pub group_v4: Ipv4Addr,
    #[serde(default = "default_group_v6")]
    pub group_v6: Ipv6Addr,
    /// Beacon over IPv4 (default true).
    #[serde(default = "default_true")]
    pub ipv4: bool,
    /// Beacon over IPv6 (default true).
    #[serde(default = "default_true")]
    pub ipv6: bool,
    /// TCP convergence-layer port advertised for every local address (default 4556).
    #[serde(default = "default_cla_port")]
    pub cla_port: u16,
    /// Advertise loopback addresses too (default false).
    #[serde(default)]
    pub include_loopback: bool,
    /// EID this node advertises and uses to drop its own beacons. The JSON lines router link
    /// reports this value back on registration without consulting `identity_suffix`, so it must
    /// match the EID the routing daemon actually assigns.
    #[serde(default = "default_node_eid")]
    pub node_eid: String,
    /// Suffix registered with the router; a random UUID when unset.
    #[serde(default)]
    pub identity_suffix: Option<String>,
    /// Data volume (bytes) placed in derived contact windows (default 1000).
    #[serde(default = "default_contact_capacity")]
    pub contact_capacity: u64,
}

fn default_period() -> u64 {
    3
}
fn default_port() -> u16 {
    DISCOVERY_PORT
}
fn default_group_v4() -> Ipv4Addr {
    MULTICAST_GROUP_V4.parse().unwrap_or(Ipv4Addr::new(224, 0, 0, 26))
}
fn default_group_v6() -> Ipv6Addr {
    MULTICAST_GROUP_V6.parse().unwrap_or(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1))
}
fn default_true() -> bool {
    true
}
fn default_cla_port() -> u16 {
    4556
}
fn default_node_eid() -> String {
    "dtn://localhost.dtn".to_string()
}
fn default_contact_capacity() -> u64 {
    ipnd_core::core::DEFAULT_CONTACT_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period: default_period(),
            port: default_port(),
            group_v4: default_group_v4(),
            group_v6: default_group_v6(),
            ipv4: default_true(),
            ipv6: default_true(),
            cla_port: default_cla_port(),
            include_loopback: false,
            node_eid: default_node_eid(),
            identity_suffix: None,
            contact_capacity: default_contact_capacity(),
        }
    }
}

impl Config {
    /// Identity suffix to register with, generating one when not configured.
    pub fn identity_suffix(&self) -> String {
        self.identity_suffix
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file(&config_paths()).unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    if c.period == 0 {
        tracing::warn!("beacon period 0 is invalid, using {}s", default_period());
        c.period = default_period();
    }
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("IPND_PERIOD").and_then(|s| s.parse::<u64>().ok()) {
        c.period = p;
    }
    if let Some(p) = var("IPND_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.port = p;
    }
    if let Some(p) = var("IPND_CLA_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.cla_port = p;
    }
    if let Some(eid) = var("IPND_NODE_EID") {
        c.node_eid = eid;
    }
    if let Some(id) = var("IPND_IDENTITY") {
        c.identity_suffix = Some(id);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/ipnd/config.toml"));
    }
    out.push(PathBuf::from("/etc/ipnd/config.toml"));
    out
}

/// First existing path wins; an unreadable or invalid file falls back to defaults.
fn load_file(paths: &[PathBuf]) -> Option<Config> {
    let path = paths.iter().find(|p| p.exists())?;
    match read_file(path) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!("ignoring config {}: {}", path.display(), e);
            None
        }
    }
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<Config>(&s)?)
}
