// ── Core error types ──
//
// Consumer-facing errors from freelink-core. These are NOT API-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<freelink_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to gateway at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Gateway is not paired -- complete the pairing flow first")]
    NotPaired,

    #[error("Bridge is not connected")]
    NotConnected,

    #[error("Gateway request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Target not found: {target}")]
    TargetNotFound { target: String },

    #[error("Command {command} is not supported by target {target}")]
    UnsupportedCommand { target: String, command: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Gateway rejected the request [{code}]: {message}")]
    Api { code: String, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<freelink_api::Error> for CoreError {
    fn from(err: freelink_api::Error) -> Self {
        match err {
            freelink_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            freelink_api::Error::TransientSession { message } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: message,
            },
            freelink_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        code: "transport".into(),
                        message: e.to_string(),
                    }
                }
            }
            freelink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            freelink_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            freelink_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            freelink_api::Error::Api { code, message } => CoreError::Api { code, message },
            freelink_api::Error::Protocol { message } => {
                CoreError::Internal(format!("Protocol error: {message}"))
            }
        }
    }
}
