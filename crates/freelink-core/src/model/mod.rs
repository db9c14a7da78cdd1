// ── Domain model ──
//
// Typed snapshots of gateway-exposed devices. All wire parsing lives in
// `convert`; these types are what consumers see.

mod state;
mod target;

pub use state::{
    AlarmMode, Category, DeviceState, GatewayInfo, PairingStatus, SensorKind, Snapshot,
    SnapshotOrigin,
};
pub use target::{MacAddress, TargetId};
