// ── Command API ──
//
// All write operations flow through a unified `Command` enum. The bridge
// validates each command against its target's category, registers the
// pending intent, and routes the write to the matching home endpoint.

use strum::Display;

use crate::error::CoreError;
use crate::model::{AlarmMode, Category, DeviceState, TargetId};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub target: TargetId,
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<(), CoreError>>,
}

/// All write operations the bridge can perform against the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    // ── Shutter operations ───────────────────────────────────────────
    OpenShutter,
    CloseShutter,
    StopShutter,
    SetShutterPosition { position: u8 },

    // ── Alarm operations ─────────────────────────────────────────────
    ArmAway,
    ArmHome,
    Disarm,

    // ── Gateway operations ───────────────────────────────────────────
    Reboot,
}

impl Command {
    /// The target category this command applies to. `None` means the
    /// command addresses the gateway itself.
    pub(crate) fn required_category(&self) -> Option<Category> {
        match self {
            Self::OpenShutter
            | Self::CloseShutter
            | Self::StopShutter
            | Self::SetShutterPosition { .. } => Some(Category::Shutter),
            Self::ArmAway | Self::ArmHome | Self::Disarm => Some(Category::Alarm),
            Self::Reboot => None,
        }
    }

    /// The state a confirming poll must observe, if this command has
    /// one. Stop and reboot have no target state to confirm.
    pub(crate) fn desired_state(&self) -> Option<DeviceState> {
        match self {
            Self::OpenShutter => Some(DeviceState::Shutter {
                position: 100,
                moving: false,
            }),
            Self::CloseShutter => Some(DeviceState::Shutter {
                position: 0,
                moving: false,
            }),
            Self::SetShutterPosition { position } => Some(DeviceState::Shutter {
                position: *position,
                moving: false,
            }),
            Self::ArmAway => Some(DeviceState::AlarmPanel {
                mode: AlarmMode::ArmedAway,
            }),
            Self::ArmHome => Some(DeviceState::AlarmPanel {
                mode: AlarmMode::ArmedHome,
            }),
            Self::Disarm => Some(DeviceState::AlarmPanel {
                mode: AlarmMode::Disarmed,
            }),
            Self::StopShutter | Self::Reboot => None,
        }
    }
}
