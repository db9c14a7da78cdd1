// Freebox OS wire types
//
// Models for the gateway's JSON API. Every response is wrapped in the
// `ApiResponse` envelope. Fields use `#[serde(default)]` liberally because
// the API is inconsistent about field presence across firmware versions.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Response envelope ────────────────────────────────────────────────

/// Standard Freebox OS response envelope.
///
/// Every endpoint wraps its payload:
/// ```json
/// { "success": true, "result": ... }
/// { "success": false, "error_code": "auth_required", "msg": "..." }
/// ```
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// Error codes that mean the session token was rejected and a fresh
/// handshake is worth attempting.
const AUTH_REJECTED_CODES: &[&str] = &[
    "auth_required",
    "invalid_token",
    "expired_token",
    "invalid_session",
];

/// Parse the `{success, result, error_code, msg}` envelope, returning
/// `result` on success.
///
/// Authentication-rejected responses (HTTP 401/403 or one of the
/// session error codes) become [`Error::Authentication`] so callers can
/// invalidate and retry once. Other `success: false` responses become
/// [`Error::Api`]; anything unparseable becomes [`Error::Protocol`].
pub(crate) async fn unwrap_envelope<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;

    let envelope: ApiResponse = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            // The gateway always answers with the envelope; a bare 401/403
            // still means the token was rejected.
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(Error::Authentication {
                    message: format!("session rejected (HTTP {status})"),
                });
            }
            if !status.is_success() {
                return Err(Error::Api {
                    code: format!("http_{}", status.as_u16()),
                    message: body_preview(&body).to_owned(),
                });
            }
            return Err(Error::Protocol {
                message: format!("{e} (body preview: {:?})", body_preview(&body)),
            });
        }
    };

    if !envelope.success {
        let code = envelope.error_code.unwrap_or_default();
        let message = envelope
            .msg
            .unwrap_or_else(|| format!("request failed (HTTP {status})"));
        if AUTH_REJECTED_CODES.contains(&code.as_str()) {
            return Err(Error::Authentication { message });
        }
        return Err(Error::Api { code, message });
    }

    let result = envelope.result.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(result).map_err(|e| Error::Protocol {
        message: format!("unexpected result shape: {e}"),
    })
}

fn body_preview(body: &str) -> &str {
    &body[..body.len().min(200)]
}

// ── Home automation nodes ────────────────────────────────────────────

/// A home-automation node from `home/nodes`: shutter, alarm panel,
/// motion/door sensor, remote, camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeNode {
    pub id: u32,
    #[serde(default)]
    pub label: String,
    pub category: String,
    #[serde(default)]
    pub show_endpoints: Vec<NodeEndpoint>,
    #[serde(default, rename = "type")]
    pub node_type: NodeTypeInfo,
    /// Device properties (firmware version, etc.). Shape varies per model.
    #[serde(default)]
    pub props: serde_json::Map<String, serde_json::Value>,
}

/// One endpoint of a node. `ep_type` is `"signal"` for readable state and
/// `"slot"` for writable commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub id: u32,
    pub name: String,
    pub ep_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Static type information for a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeTypeInfo {
    #[serde(default)]
    pub endpoints: Vec<NodeEndpoint>,
    #[serde(default)]
    pub inherit: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl HomeNode {
    /// Find the id of an endpoint by type and name, e.g. `("slot", "stop")`.
    pub fn endpoint_id(&self, ep_type: &str, name: &str) -> Option<u32> {
        self.show_endpoints
            .iter()
            .chain(self.node_type.endpoints.iter())
            .find(|ep| ep.ep_type == ep_type && ep.name == name)
            .map(|ep| ep.id)
    }

    /// Current value of a signal endpoint, if the node reports one.
    pub fn signal_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.show_endpoints
            .iter()
            .find(|ep| ep.ep_type == "signal" && ep.name == name)
            .and_then(|ep| ep.value.as_ref())
    }
}

/// Value wrapper returned by `home/endpoints/{node}/{endpoint}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointValue {
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

// ── LAN hosts ────────────────────────────────────────────────────────

/// A host known to the gateway's LAN browser (`lan/browser/pub/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanHostEntry {
    pub l2ident: L2Ident,
    #[serde(default)]
    pub primary_name: Option<String>,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub host_type: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub reachable: bool,
    /// Unix timestamp of the last activity seen from this host.
    #[serde(default)]
    pub last_activity: Option<i64>,
    #[serde(default)]
    pub l3connectivities: Vec<L3Connectivity>,
}

/// Layer-2 identifier (MAC address for ethernet hosts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2Ident {
    pub id: String,
    #[serde(default, rename = "type")]
    pub ident_type: String,
}

/// One layer-3 address of a LAN host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L3Connectivity {
    pub addr: String,
    #[serde(default)]
    pub af: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub reachable: bool,
}

// ── System / hardware ────────────────────────────────────────────────

/// Gateway system configuration from `system/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub uptime_val: Option<i64>,
    /// Temperature sensors in celsius. Name and id vary per model.
    #[serde(default)]
    pub sensors: Vec<SystemSensor>,
    #[serde(default)]
    pub fans: Vec<SystemSensor>,
    #[serde(default)]
    pub model_info: Option<ModelInfo>,
}

/// One hardware sensor reading (temperature probe or fan tachometer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSensor {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub value: Option<f64>,
}

/// Gateway model information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub pretty_name: Option<String>,
    #[serde(default)]
    pub has_home_automation: bool,
}

/// WAN connection status from `connection/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Upload rate in bytes/s.
    #[serde(default)]
    pub rate_up: Option<u64>,
    /// Download rate in bytes/s.
    #[serde(default)]
    pub rate_down: Option<u64>,
    #[serde(default)]
    pub ipv4: Option<String>,
    #[serde(default)]
    pub ipv6: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// A disk attached to the gateway (`storage/disk/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDisk {
    pub id: u64,
    #[serde(default, rename = "type")]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub free_bytes: Option<u64>,
    /// Drive temperature in celsius.
    #[serde(default)]
    pub temp: Option<i64>,
}
