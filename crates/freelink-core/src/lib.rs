// freelink-core: Polling and command bridge between freelink-api and consumers.

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;

mod convert;
mod pending;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{ConnectionState, FreeboxBridge};
pub use command::Command;
pub use config::{CredentialStore, FileCredentialStore, GatewayConfig, TlsVerification};
pub use error::CoreError;
pub use store::StateStore;
pub use stream::SnapshotStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Identity
    MacAddress, TargetId,
    // State
    AlarmMode, Category, DeviceState, SensorKind, Snapshot, SnapshotOrigin,
    // Lifecycle
    GatewayInfo, PairingStatus,
};
