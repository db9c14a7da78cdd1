// ── Wire-to-domain conversion ──
//
// Tagged parsing of gateway payloads into DeviceState snapshots, one
// category at a time. A node that fails to parse is logged and skipped;
// it never takes the rest of its category (or the poll cycle) down.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use freelink_api::models::{ConnectionStatus, HomeNode, LanHostEntry, StorageDisk, SystemConfig};

use crate::model::{
    AlarmMode, DeviceState, GatewayInfo, MacAddress, SensorKind, Snapshot, SnapshotOrigin,
    TargetId,
};

/// Node categories the bridge understands. Everything else is skipped
/// with a debug log, mirroring the gateway's habit of inventing new ones.
const SUPPORTED_CATEGORIES: &[&str] = &[
    "shutter",
    "opener",
    "basic_shutter",
    "alarm",
    "pir",
    "dws",
    "kfb",
    "camera",
];

/// Slot endpoint ids needed to command a node, resolved once per poll
/// from the node listing.
#[derive(Debug, Clone)]
pub(crate) enum NodeControls {
    /// Position-driven shutter (RTS / IOHome). `invert` is true when the
    /// wire position is reversed from the 0=closed/100=open convention.
    PositionShutter {
        position_set: u32,
        stop: Option<u32>,
        invert: bool,
    },
    /// Up/stop/down shutter without position feedback.
    BasicShutter { up: u32, down: u32, stop: u32 },
    /// Alarm panel trigger slots. `arm_home` is only present on panels
    /// with a second (night/home) zone.
    Alarm {
        arm_away: Option<u32>,
        arm_home: Option<u32>,
        off: Option<u32>,
    },
}

/// Parsed result of one home-nodes listing.
#[derive(Debug, Default)]
pub(crate) struct HomeBatch {
    pub shutters: Vec<Snapshot>,
    pub alarms: Vec<Snapshot>,
    pub sensors: Vec<Snapshot>,
    pub controls: Vec<(u32, NodeControls)>,
}

/// Convert a home-nodes listing into per-category snapshots plus the
/// command endpoints for each controllable node.
pub(crate) fn home_batch(nodes: &[HomeNode], now: DateTime<Utc>) -> HomeBatch {
    let mut batch = HomeBatch::default();

    for node in nodes {
        if !SUPPORTED_CATEGORIES.contains(&node.category.as_str()) {
            debug!(node = node.id, category = %node.category, "node category not supported");
            continue;
        }

        match node.category.as_str() {
            "shutter" | "opener" => convert_position_shutter(node, &mut batch),
            "basic_shutter" => convert_basic_shutter(node, &mut batch),
            "alarm" => convert_alarm(node, &mut batch),
            _ => convert_sensor(node, now, &mut batch),
        }
    }

    batch
}

fn label_of(node: &HomeNode) -> String {
    node.label.trim().to_owned()
}

fn bool_signal(node: &HomeNode, name: &str) -> Option<bool> {
    node.signal_value(name).and_then(Value::as_bool)
}

fn convert_position_shutter(node: &HomeNode, batch: &mut HomeBatch) {
    // Garage openers report positions in the expected direction; RTS and
    // IOHome shutters are inverted on the wire.
    let invert = !node
        .node_type
        .icon
        .as_deref()
        .is_some_and(|icon| icon.contains("Porte_Garage"));

    let Some(raw) = node
        .signal_value("position_set")
        .and_then(Value::as_u64)
        .filter(|v| *v <= 100)
    else {
        warn!(node = node.id, "shutter node has no usable position signal, skipping");
        return;
    };
    #[allow(clippy::cast_possible_truncation)]
    let raw = raw as u8;
    let position = if invert { 100 - raw } else { raw };

    batch.shutters.push(Snapshot {
        target: TargetId::Node(node.id),
        label: label_of(node),
        state: DeviceState::Shutter {
            position,
            // The gateway reports no motion signal; polls always observe
            // the last settled position.
            moving: false,
        },
        origin: SnapshotOrigin::Polled,
    });

    if let Some(position_set) = node.endpoint_id("slot", "position_set") {
        batch.controls.push((
            node.id,
            NodeControls::PositionShutter {
                position_set,
                stop: node.endpoint_id("slot", "stop"),
                invert,
            },
        ));
    } else {
        warn!(node = node.id, "shutter node has no position_set slot");
    }
}

fn convert_basic_shutter(node: &HomeNode, batch: &mut HomeBatch) {
    // Basic shutters only report a closed/open boolean.
    let Some(closed) = bool_signal(node, "state") else {
        warn!(node = node.id, "basic shutter has no state signal, skipping");
        return;
    };

    batch.shutters.push(Snapshot {
        target: TargetId::Node(node.id),
        label: label_of(node),
        state: DeviceState::Shutter {
            position: if closed { 0 } else { 100 },
            moving: false,
        },
        origin: SnapshotOrigin::Polled,
    });

    match (
        node.endpoint_id("slot", "up"),
        node.endpoint_id("slot", "down"),
        node.endpoint_id("slot", "stop"),
    ) {
        (Some(up), Some(down), Some(stop)) => {
            batch
                .controls
                .push((node.id, NodeControls::BasicShutter { up, down, stop }));
        }
        _ => warn!(node = node.id, "basic shutter is missing command slots"),
    }
}

fn convert_alarm(node: &HomeNode, batch: &mut HomeBatch) {
    let Some(state) = node.signal_value("state").and_then(Value::as_str) else {
        warn!(node = node.id, "alarm node has no state signal, skipping");
        return;
    };
    let Some(mode) = alarm_mode_from_wire(state) else {
        warn!(node = node.id, state, "unrecognized alarm state, skipping");
        return;
    };

    batch.alarms.push(Snapshot {
        target: TargetId::Node(node.id),
        label: label_of(node),
        state: DeviceState::AlarmPanel { mode },
        origin: SnapshotOrigin::Polled,
    });

    batch.controls.push((
        node.id,
        NodeControls::Alarm {
            arm_away: node.endpoint_id("slot", "alarm1"),
            arm_home: node.endpoint_id("slot", "alarm2"),
            off: node.endpoint_id("slot", "off"),
        },
    ));
}

/// Map the gateway's alarm state strings onto panel modes. Zone 1 is the
/// full (away) alarm, zone 2 the night/home alarm.
fn alarm_mode_from_wire(state: &str) -> Option<AlarmMode> {
    match state {
        "idle" => Some(AlarmMode::Disarmed),
        "alarm1_armed" => Some(AlarmMode::ArmedAway),
        "alarm2_armed" => Some(AlarmMode::ArmedHome),
        "alarm1_arming" | "alarm2_arming" => Some(AlarmMode::Pending),
        "alert" | "alert_timer" | "alarm1_alert_timer" | "alarm2_alert_timer" => {
            Some(AlarmMode::Triggered)
        }
        _ => None,
    }
}

fn convert_sensor(node: &HomeNode, now: DateTime<Utc>, batch: &mut HomeBatch) {
    let (kind, value) = match node.category.as_str() {
        // Motion and door sensors report an inverted trigger signal:
        // `false` means a detection.
        "pir" => (SensorKind::Motion, bool_signal(node, "trigger").map(|t| !t)),
        "dws" => (
            SensorKind::DoorWindow,
            bool_signal(node, "trigger").map(|t| !t),
        ),
        "kfb" => (SensorKind::Button, bool_signal(node, "pushed").or(Some(false))),
        "camera" => (SensorKind::Camera, bool_signal(node, "detection")),
        _ => return,
    };

    let Some(value) = value else {
        warn!(node = node.id, category = %node.category, "sensor node has no usable signal, skipping");
        return;
    };

    batch.sensors.push(Snapshot {
        target: TargetId::Node(node.id),
        label: label_of(node),
        state: DeviceState::Sensor {
            kind,
            value,
            timestamp: now,
        },
        origin: SnapshotOrigin::Polled,
    });
}

// ── LAN hosts ────────────────────────────────────────────────────────

const DEFAULT_DEVICE_NAME: &str = "Unknown device";

/// Convert the LAN browser listing into host snapshots.
pub(crate) fn host_snapshots(hosts: &[LanHostEntry]) -> Vec<Snapshot> {
    hosts
        .iter()
        .map(|host| {
            let mac = MacAddress::new(&host.l2ident.id);
            let ip = host
                .l3connectivities
                .iter()
                .find(|l3| l3.af == "ipv4" && l3.active)
                .or_else(|| host.l3connectivities.first())
                .map(|l3| l3.addr.clone());
            let last_seen = host
                .last_activity
                .and_then(|ts| DateTime::from_timestamp(ts, 0));

            Snapshot {
                target: TargetId::Host(mac.clone()),
                label: host
                    .primary_name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_owned()),
                state: DeviceState::LanHost {
                    mac,
                    ip,
                    reachable: host.active,
                    last_seen,
                },
                origin: SnapshotOrigin::Polled,
            }
        })
        .collect()
}

// ── Hardware metrics ─────────────────────────────────────────────────

/// Flatten system sensors, fans, connection rates, and disk health into
/// metric snapshots.
pub(crate) fn metric_snapshots(
    system: &SystemConfig,
    connection: &ConnectionStatus,
    disks: &[StorageDisk],
) -> Vec<Snapshot> {
    let mut metrics = Vec::new();

    for sensor in &system.sensors {
        if let Some(value) = sensor.value {
            let key = sensor.id.as_deref().unwrap_or(&sensor.name);
            metrics.push(metric(format!("temp:{key}"), sensor.name.clone(), value, "°C"));
        }
    }

    for fan in &system.fans {
        if let Some(value) = fan.value {
            let key = fan.id.as_deref().unwrap_or(&fan.name);
            metrics.push(metric(format!("fan:{key}"), fan.name.clone(), value, "rpm"));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    {
        if let Some(rate) = connection.rate_down {
            metrics.push(metric("rate_down".into(), "Download speed".into(), rate as f64, "B/s"));
        }
        if let Some(rate) = connection.rate_up {
            metrics.push(metric("rate_up".into(), "Upload speed".into(), rate as f64, "B/s"));
        }

        for disk in disks {
            if let Some(free) = disk.free_bytes {
                metrics.push(metric(
                    format!("disk:{}:free", disk.id),
                    format!("Disk {} free space", disk.id),
                    free as f64,
                    "B",
                ));
            }
            if let Some(temp) = disk.temp {
                metrics.push(metric(
                    format!("disk:{}:temp", disk.id),
                    format!("Disk {} temperature", disk.id),
                    temp as f64,
                    "°C",
                ));
            }
        }
    }

    metrics
}

fn metric(key: String, name: String, value: f64, unit: &str) -> Snapshot {
    Snapshot {
        target: TargetId::Metric(key),
        label: name.clone(),
        state: DeviceState::HardwareMetric {
            name,
            value,
            unit: unit.to_owned(),
        },
        origin: SnapshotOrigin::Polled,
    }
}

/// Gateway identity from the system config.
pub(crate) fn gateway_info(system: &SystemConfig) -> GatewayInfo {
    GatewayInfo {
        mac: system.mac.as_deref().map(MacAddress::new),
        name: system
            .model_info
            .as_ref()
            .and_then(|m| m.pretty_name.clone()),
        serial: system.serial.clone(),
        firmware_version: system.firmware_version.clone(),
    }
}
