//! Node configuration and self-detection.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use liftnet_car::ClearVariant;
use liftnet_types::NodeId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("none of the configured hosts is on a local interface")]
    NoSelfMatch,

    #[error("self detection is ambiguous, multiple configured hosts are local: {0:?}")]
    AmbiguousSelf(Vec<NodeId>),

    #[error("node id {0} is not in the membership table")]
    UnknownId(NodeId),
}

/// Car-level tuning, loaded under `[car]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarSettings {
    pub door_open_duration_ms: u64,
    pub clear_variant: ClearVariant,
}

impl Default for CarSettings {
    fn default() -> Self {
        Self {
            door_open_duration_ms: 3000,
            clear_variant: ClearVariant::InDirn,
        }
    }
}

/// Static node configuration.
///
/// Membership is closed: every node carries the same `hosts` table and finds
/// itself in it by probing which configured address is locally bindable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// QUIC port shared by every node.
    pub port: u16,
    /// Node id to IPv4 host.
    pub hosts: BTreeMap<NodeId, Ipv4Addr>,
    /// Elevator hardware server address.
    pub hw_addr: String,
    /// Path of the external hall request assigner executable.
    pub assigner: String,
    pub car: CarSettings,
}

impl Default for Config {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(NodeId(1), Ipv4Addr::new(10, 100, 23, 34));
        hosts.insert(NodeId(2), Ipv4Addr::new(10, 100, 23, 35));
        hosts.insert(NodeId(3), Ipv4Addr::new(10, 100, 23, 37));
        Self {
            port: 4242,
            hosts,
            hw_addr: "localhost:15657".to_string(),
            assigner: "hall_request_assigner".to_string(),
            car: CarSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// All member ids, ascending.
    pub fn members(&self) -> Vec<NodeId> {
        self.hosts.keys().copied().collect()
    }

    /// Find our own id by probing which configured host address this machine
    /// can bind. Exactly one must match.
    pub fn detect_self_id(&self) -> Result<NodeId, ConfigError> {
        let matches: Vec<NodeId> = self
            .hosts
            .iter()
            .filter(|(_, &ip)| UdpSocket::bind((ip, 0)).is_ok())
            .map(|(&id, _)| id)
            .collect();

        match matches.as_slice() {
            [] => Err(ConfigError::NoSelfMatch),
            [id] => Ok(*id),
            _ => Err(ConfigError::AmbiguousSelf(matches)),
        }
    }

    /// Dial addresses of every node except ourselves.
    pub fn peer_addrs(&self, self_id: NodeId) -> Result<BTreeMap<NodeId, SocketAddr>, ConfigError> {
        if !self.hosts.contains_key(&self_id) {
            return Err(ConfigError::UnknownId(self_id));
        }
        Ok(self
            .hosts
            .iter()
            .filter(|(&id, _)| id != self_id)
            .map(|(&id, &ip)| (id, SocketAddr::from((ip, self.port))))
            .collect())
    }
}
