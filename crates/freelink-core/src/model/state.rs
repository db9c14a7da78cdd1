// ── Device state snapshots ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::target::{MacAddress, TargetId};

/// Published state categories. Each category is one subscription stream
/// and one unit of partial-failure isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Shutter,
    Alarm,
    Sensor,
    Metric,
    LanHost,
}

/// Alarm panel mode, normalized from the gateway's state strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum AlarmMode {
    Disarmed,
    ArmedHome,
    ArmedAway,
    Triggered,
    /// Arming countdown or entry delay in progress.
    Pending,
}

/// What a security-pack sensor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum SensorKind {
    Motion,
    DoorWindow,
    Button,
    Camera,
}

/// Immutable state of one device, produced each poll cycle and
/// superseded wholesale by the next snapshot for its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceState {
    Shutter {
        /// 0 is closed, 100 is fully open.
        position: u8,
        moving: bool,
    },
    AlarmPanel {
        mode: AlarmMode,
    },
    Sensor {
        kind: SensorKind,
        value: bool,
        timestamp: DateTime<Utc>,
    },
    HardwareMetric {
        name: String,
        value: f64,
        unit: String,
    },
    LanHost {
        mac: MacAddress,
        ip: Option<String>,
        reachable: bool,
        last_seen: Option<DateTime<Utc>>,
    },
}

impl DeviceState {
    pub fn category(&self) -> Category {
        match self {
            Self::Shutter { .. } => Category::Shutter,
            Self::AlarmPanel { .. } => Category::Alarm,
            Self::Sensor { .. } => Category::Sensor,
            Self::HardwareMetric { .. } => Category::Metric,
            Self::LanHost { .. } => Category::LanHost,
        }
    }

    /// Whether this polled state satisfies a command's desired state.
    ///
    /// Exact equality, except a shutter's motion flag: the desired side
    /// only ever asserts a resting position.
    pub(crate) fn satisfies(&self, desired: &Self) -> bool {
        match (self, desired) {
            (
                Self::Shutter { position, .. },
                Self::Shutter {
                    position: wanted, ..
                },
            ) => position == wanted,
            _ => self == desired,
        }
    }
}

/// Where a published snapshot's state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotOrigin {
    /// Read from the gateway this cycle.
    Polled,
    /// A pending command's desired state, published until the gateway
    /// confirms or the command times out.
    Optimistic,
    /// The pending command timed out unconfirmed; this is the polled
    /// truth, flagged so the consumer can warn.
    Unconfirmed,
}

/// One published device state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub target: TargetId,
    pub label: String,
    pub state: DeviceState,
    pub origin: SnapshotOrigin,
}

/// Gateway identity captured at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfo {
    pub mac: Option<MacAddress>,
    pub name: Option<String>,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
}

/// Pairing progress as observed by the collaborator.
///
/// The physical button press is an external event the core can only
/// observe; the host platform polls this instead of blocking on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum PairingStatus {
    Unpaired,
    AwaitingConfirmation,
    Paired,
}
