// Session lifecycle against the gateway
//
// Owns the authentication state machine: app-token pairing (physical
// button confirmation), challenge/password derivation, session-token
// acquisition, and invalidation. `ensure_session()` is single-flight:
// concurrent callers during a renewal share one handshake and one outcome.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha1::Sha1;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::unwrap_envelope;
use crate::transport::TransportConfig;

type HmacSha1 = Hmac<Sha1>;

// ── Credential types ─────────────────────────────────────────────────

/// Application identity sent with the authorization request. The
/// `device_name` is what the gateway's display shows while waiting for
/// the button press.
#[derive(Debug, Clone, Serialize)]
pub struct AppDescriptor {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub device_name: String,
}

/// Long-lived credential obtained once through the pairing exchange.
///
/// Persisted by the collaborator's credential store; treated here as an
/// opaque secret and never regenerated automatically.
#[derive(Debug, Clone)]
pub struct AppCredential {
    pub app_id: String,
    pub app_token: SecretString,
    pub track_id: u64,
}

/// Outcome of polling `login/authorize/{track_id}` while the gateway
/// waits for the physical button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// The gateway has no record of this track id.
    Unknown,
    /// Waiting for the user to press the button.
    Pending,
    /// The button was never pressed and the request expired.
    Timeout,
    /// The user confirmed; the app token is now valid.
    Granted,
    /// The user refused on the gateway's front panel.
    Denied,
}

impl AuthorizationStatus {
    fn from_wire(status: &str) -> Self {
        match status {
            "pending" => Self::Pending,
            "granted" => Self::Granted,
            "denied" => Self::Denied,
            "timeout" => Self::Timeout,
            other => {
                warn!(status = other, "unrecognized authorization status");
                Self::Unknown
            }
        }
    }
}

/// Short-lived session token derived from the app credential.
///
/// The raw value never leaves this crate -- the client attaches it to
/// requests via [`header_value`](Self::header_value).
#[derive(Debug, Clone)]
pub struct SessionToken {
    value: SecretString,
    pub issued_at: DateTime<Utc>,
    /// The gateway does not advertise a token lifetime, so this stays
    /// `None` on real responses; invalidation is reactive (403-driven).
    pub expiry_hint: Option<DateTime<Utc>>,
    /// Permission flags granted to this session (`"home"`, `"settings"`, ...).
    pub permissions: HashMap<String, bool>,
}

impl SessionToken {
    pub(crate) fn header_value(&self) -> &str {
        self.value.expose_secret()
    }

    /// `false` once the expiry hint (if any) has passed.
    pub fn is_fresh(&self) -> bool {
        self.expiry_hint.is_none_or(|t| Utc::now() < t)
    }
}

// ── Wire payloads ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LoginChallenge {
    #[serde(default)]
    #[allow(dead_code)]
    logged_in: bool,
    #[serde(default)]
    challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionOpened {
    session_token: String,
    #[serde(default)]
    permissions: HashMap<String, bool>,
}

#[derive(Debug, Deserialize)]
struct AuthorizeGrant {
    app_token: String,
    track_id: u64,
}

#[derive(Debug, Deserialize)]
struct TrackAuthorization {
    status: String,
}

// ── Handshake outcome ────────────────────────────────────────────────

/// Cloneable handshake failure, so the leader's outcome can be shared
/// with every follower of the same renewal.
#[derive(Debug, Clone)]
enum HandshakeError {
    Authentication(String),
    Transient(String),
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        match e {
            HandshakeError::Authentication(message) => Error::Authentication { message },
            HandshakeError::Transient(message) => Error::TransientSession { message },
        }
    }
}

fn classify(e: Error) -> HandshakeError {
    // Login rate limiting is timing, not a credential problem.
    if matches!(&e, Error::Api { code, .. } if code == "ratelimited") || e.is_transient() {
        HandshakeError::Transient(e.to_string())
    } else {
        HandshakeError::Authentication(e.to_string())
    }
}

type HandshakeOutcome = Result<SessionToken, HandshakeError>;

/// Session state machine:
/// `Unauthenticated -> Challenging -> Authenticated -> (Unauthenticated -> Challenging)`.
/// `Authenticated` is the only state from which API calls proceed.
enum TokenState {
    Unauthenticated,
    /// A handshake is in flight; followers await its outcome here.
    Challenging(watch::Receiver<Option<HandshakeOutcome>>),
    Authenticated(SessionToken),
}

// ── SessionManager ───────────────────────────────────────────────────

/// Owns the current session token and the renewal handshake.
///
/// All authenticated traffic obtains its token here, so renewal is
/// single-flight by construction: the first caller to find the state
/// stale leads the handshake, everyone else follows its outcome.
pub struct SessionManager {
    http: reqwest::Client,
    api_base: Url,
    credential: AppCredential,
    state: Mutex<TokenState>,
}

impl SessionManager {
    /// Create a manager for an already-paired credential. `api_base` is
    /// the versioned API root, e.g. `https://mafreebox.freebox.fr/api/v6/`.
    pub fn new(http: reqwest::Client, api_base: Url, credential: AppCredential) -> Self {
        Self {
            http,
            api_base,
            credential,
            state: Mutex::new(TokenState::Unauthenticated),
        }
    }

    pub fn credential(&self) -> &AppCredential {
        &self.credential
    }

    /// Return a currently-valid session token, performing the full
    /// challenge handshake if none is held.
    ///
    /// Safe to call concurrently: at most one handshake executes per
    /// invalidation, and every caller waiting on it observes the same
    /// token or the same failure.
    pub async fn ensure_session(&self) -> Result<SessionToken, Error> {
        loop {
            enum Role {
                Lead(watch::Sender<Option<HandshakeOutcome>>),
                Follow(watch::Receiver<Option<HandshakeOutcome>>),
            }

            let role = {
                let mut state = self.state.lock().expect("session state lock poisoned");
                if let TokenState::Authenticated(token) = &*state {
                    if token.is_fresh() {
                        return Ok(token.clone());
                    }
                }
                if let TokenState::Challenging(rx) = &*state {
                    Role::Follow(rx.clone())
                } else {
                    let (tx, rx) = watch::channel(None);
                    *state = TokenState::Challenging(rx);
                    Role::Lead(tx)
                }
            };

            match role {
                Role::Lead(tx) => return self.lead_handshake(tx).await,
                Role::Follow(rx) => {
                    if let Some(outcome) = follow_handshake(rx).await {
                        return outcome.map_err(Error::from);
                    }
                    // Leader was cancelled mid-flight without reporting.
                    self.clear_stale_challenge();
                }
            }
        }
    }

    /// Mark the held token stale. Called by the client when the gateway
    /// rejects a request's authentication. Idempotent; a renewal already
    /// in flight is left to finish.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        if let TokenState::Authenticated(_) = &*state {
            debug!("session token invalidated");
            *state = TokenState::Unauthenticated;
        }
    }

    /// Drop any held token state. No network call is made -- used at
    /// shutdown where a logout round-trip is explicitly not wanted.
    pub fn clear(&self) {
        *self.state.lock().expect("session state lock poisoned") = TokenState::Unauthenticated;
    }

    // ── Pairing (pre-credential) ─────────────────────────────────

    /// Ask the gateway to authorize a new application.
    ///
    /// Returns immediately with the app token and a track id; the
    /// credential only becomes usable once the user presses the
    /// gateway's physical button ([`track_authorization`](Self::track_authorization)
    /// reports `Granted`). Pairing happens before any credential exists,
    /// so these are associated functions building their own transport.
    pub async fn request_authorization(
        transport: &TransportConfig,
        api_base: &Url,
        app: &AppDescriptor,
    ) -> Result<AppCredential, Error> {
        let http = transport.build_client()?;
        let url = api_base.join("login/authorize/")?;
        debug!(app_id = %app.app_id, "requesting app authorization");

        let resp = http.post(url).json(app).send().await.map_err(Error::Transport)?;
        let grant: AuthorizeGrant = unwrap_envelope(resp).await?;

        Ok(AppCredential {
            app_id: app.app_id.clone(),
            app_token: SecretString::from(grant.app_token),
            track_id: grant.track_id,
        })
    }

    /// Poll the authorization progress for a pairing started with
    /// [`request_authorization`](Self::request_authorization).
    pub async fn track_authorization(
        transport: &TransportConfig,
        api_base: &Url,
        track_id: u64,
    ) -> Result<AuthorizationStatus, Error> {
        let http = transport.build_client()?;
        let url = api_base.join(&format!("login/authorize/{track_id}"))?;
        let resp = http.get(url).send().await.map_err(Error::Transport)?;
        let track: TrackAuthorization = unwrap_envelope(resp).await?;
        Ok(AuthorizationStatus::from_wire(&track.status))
    }

    // ── Handshake internals ──────────────────────────────────────

    async fn lead_handshake(
        &self,
        tx: watch::Sender<Option<HandshakeOutcome>>,
    ) -> Result<SessionToken, Error> {
        let outcome = self.open_session().await;
        {
            let mut state = self.state.lock().expect("session state lock poisoned");
            *state = match &outcome {
                Ok(token) => TokenState::Authenticated(token.clone()),
                Err(_) => TokenState::Unauthenticated,
            };
        }
        let _ = tx.send(Some(outcome.clone()));
        outcome.map_err(Error::from)
    }

    /// The full handshake: fetch challenge, derive the password from the
    /// app token, exchange it for a session token.
    async fn open_session(&self) -> HandshakeOutcome {
        debug!("opening gateway session");

        let challenge = self.fetch_challenge().await?;
        let password = derive_password(&self.credential.app_token, &challenge);

        let url = self
            .api_base
            .join("login/session/")
            .map_err(|e| HandshakeError::Transient(e.to_string()))?;
        let body = json!({
            "app_id": self.credential.app_id,
            "password": password,
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(Error::Transport(e)))?;
        let opened: SessionOpened = unwrap_envelope(resp).await.map_err(classify)?;

        debug!("session established");
        Ok(SessionToken {
            value: SecretString::from(opened.session_token),
            issued_at: Utc::now(),
            expiry_hint: None,
            permissions: opened.permissions,
        })
    }

    async fn fetch_challenge(&self) -> Result<String, HandshakeError> {
        let url = self
            .api_base
            .join("login/")
            .map_err(|e| HandshakeError::Transient(e.to_string()))?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify(Error::Transport(e)))?;
        let login: LoginChallenge = unwrap_envelope(resp).await.map_err(classify)?;
        login.challenge.ok_or_else(|| {
            HandshakeError::Transient("login challenge missing from response".into())
        })
    }

    fn clear_stale_challenge(&self) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        if let TokenState::Challenging(rx) = &*state {
            if rx.has_changed().is_err() {
                *state = TokenState::Unauthenticated;
            }
        }
    }
}

/// Wait for the leading handshake's outcome. `None` means the leader
/// dropped its sender without reporting (cancelled mid-flight).
async fn follow_handshake(
    mut rx: watch::Receiver<Option<HandshakeOutcome>>,
) -> Option<HandshakeOutcome> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return Some(outcome);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

/// Session password: `hex(HMAC-SHA1(app_token, challenge))`.
fn derive_password(app_token: &SecretString, challenge: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(app_token.expose_secret().as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(challenge.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
