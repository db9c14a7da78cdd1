// ── Target identity ──
//
// Every snapshot and command addresses a TargetId. Home-automation nodes
// use the gateway's small integer ids; LAN hosts are identified by MAC;
// hardware metrics by name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw.as_ref().to_lowercase().replace('-', ":");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Canonical identifier for anything the bridge publishes or commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetId {
    /// A home-automation node (shutter, alarm panel, sensor).
    Node(u32),
    /// A host on the LAN, keyed by MAC.
    Host(MacAddress),
    /// A hardware metric, keyed by its stable name.
    Metric(String),
    /// The gateway itself (reboot).
    Gateway,
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node:{id}"),
            Self::Host(mac) => write!(f, "host:{mac}"),
            Self::Metric(name) => write!(f, "metric:{name}"),
            Self::Gateway => write!(f, "gateway"),
        }
    }
}
