use thiserror::Error;

/// Top-level error type for the `freelink-api` crate.
///
/// Covers every failure mode against the gateway: credential rejection,
/// session handshake trouble, transport, per-request API errors, and
/// malformed payloads. `freelink-core` maps these into consumer-facing
/// diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The app credential is missing, revoked, or was rejected by the
    /// gateway. Not retriable -- the integration must be re-paired.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The session handshake failed for a transient reason (network,
    /// timing). Retriable with backoff.
    #[error("Session handshake failed: {message}")]
    TransientSession { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request exceeded the configured timeout.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// The gateway rejected this specific request (parsed from the
    /// `{success, error_code, msg}` envelope). The request itself was
    /// malformed or unsupported -- not retried.
    #[error("API error [{code}]: {message}")]
    Api { code: String, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// Response shape did not match any known payload.
    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl Error {
    /// Returns `true` if the gateway rejected the session token and
    /// re-authentication might resolve it.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::TransientSession { .. } => true,
            _ => false,
        }
    }
}
