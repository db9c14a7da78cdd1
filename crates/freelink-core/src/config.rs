// ── Runtime gateway configuration ──
//
// These types describe *how* to reach a Freebox gateway and how the
// bridge should pace itself. The host platform constructs a
// `GatewayConfig` and hands it in -- the core never reads config files.
// Credential persistence goes through the `CredentialStore` collaborator.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use freelink_api::{AppCredential, AppDescriptor};

use crate::error::CoreError;

/// TLS verification strategy.
#[derive(Debug, Clone, Default)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file (e.g. the Freebox ISP root).
    CustomCa(PathBuf),
    /// Skip verification. Default for local gateways, which present a
    /// certificate for the vendor domain; a warning is logged when the
    /// connection is built.
    #[default]
    DangerAcceptInvalid,
}

impl PartialEq for TlsVerification {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SystemDefaults, Self::SystemDefaults) => true,
            (Self::CustomCa(a), Self::CustomCa(b)) => a == b,
            (Self::DangerAcceptInvalid, Self::DangerAcceptInvalid) => true,
            _ => false,
        }
    }
}

impl Eq for TlsVerification {}

/// Configuration for bridging a single gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway root URL (e.g. `https://mafreebox.freebox.fr` or
    /// `https://192.168.1.254`).
    pub url: Url,
    /// API version path segment.
    pub api_version: String,
    /// Application identity used for pairing and login.
    pub app: AppDescriptor,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How often to poll device state.
    pub poll_interval: Duration,
    /// How long a dispatched command may stay unconfirmed by polls
    /// before it is resolved as unconfirmed and the polled state wins.
    pub pending_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "https://mafreebox.freebox.fr".parse().expect("valid default URL"),
            api_version: "v6".into(),
            app: AppDescriptor {
                app_id: "org.freelink.bridge".into(),
                app_name: "Freelink".into(),
                app_version: env!("CARGO_PKG_VERSION").into(),
                device_name: "freelink-bridge".into(),
            },
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            pending_timeout: Duration::from_secs(30),
        }
    }
}

// ── Credential persistence ───────────────────────────────────────────

/// Collaborator-provided persistence for the paired app credential.
///
/// The credential is created once through the pairing exchange and lives
/// for the integration's lifetime; the core only ever loads and saves it.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<AppCredential>, CoreError>;
    fn save(&self, credential: &AppCredential) -> Result<(), CoreError>;
}

/// Serialized form of the credential. The app token is a long-lived
/// secret; the file should live in the host platform's protected
/// storage directory.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    app_id: String,
    app_token: String,
    track_id: u64,
}

/// File-backed credential store, one JSON file per gateway.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<AppCredential>, CoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::Config {
                    message: format!("failed to read credential file: {e}"),
                });
            }
        };

        let stored: StoredCredential =
            serde_json::from_str(&raw).map_err(|e| CoreError::Config {
                message: format!("credential file is corrupt: {e}"),
            })?;

        Ok(Some(AppCredential {
            app_id: stored.app_id,
            app_token: SecretString::from(stored.app_token),
            track_id: stored.track_id,
        }))
    }

    fn save(&self, credential: &AppCredential) -> Result<(), CoreError> {
        let stored = StoredCredential {
            app_id: credential.app_id.clone(),
            app_token: credential.app_token.expose_secret().to_owned(),
            track_id: credential.track_id,
        };
        let raw = serde_json::to_string_pretty(&stored).map_err(|e| CoreError::Internal(
            format!("failed to serialize credential: {e}"),
        ))?;
        std::fs::write(&self.path, raw).map_err(|e| CoreError::Config {
            message: format!("failed to write credential file: {e}"),
        })
    }
}
