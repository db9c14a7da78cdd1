// Freebox OS HTTP client
//
// Wraps `reqwest::Client` with versioned URL construction, envelope
// unwrapping, and the invalidate-and-retry-once behavior on session
// rejection. Endpoint modules (home, lan, system) are implemented as
// inherent methods via separate files to keep this module focused on
// transport mechanics.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::unwrap_envelope;
use crate::session::{AppCredential, SessionManager};
use crate::transport::TransportConfig;

/// Header carrying the session token on authenticated requests.
const AUTH_HEADER: &str = "X-Fbx-App-Auth";

/// Typed HTTP client for the gateway's versioned API.
///
/// Every authenticated call obtains a token from the shared
/// [`SessionManager`], attaches it, and on a session-rejected response
/// invalidates and retries exactly once before surfacing the error.
pub struct FreeboxClient {
    http: reqwest::Client,
    api_base: Url,
    session: Arc<SessionManager>,
    timeout: Duration,
}

impl FreeboxClient {
    /// Create a client from a gateway root URL (e.g. `https://192.168.1.254`),
    /// an API version (e.g. `"v6"`), and a paired credential.
    pub fn new(
        base_url: &Url,
        api_version: &str,
        credential: AppCredential,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let api_base = api_base_url(base_url, api_version)?;
        let http = transport.build_client()?;
        let session = Arc::new(SessionManager::new(
            http.clone(),
            api_base.clone(),
            credential,
        ));
        Ok(Self {
            http,
            api_base,
            session,
            timeout: transport.timeout,
        })
    }

    /// The shared session manager (for explicit invalidation or teardown).
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// The versioned API root this client talks to.
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// The underlying HTTP client (for pre-credential pairing calls).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ── Request helpers ──────────────────────────────────────────────

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.request(Method::GET, path, None).await
    }

    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, Error> {
        self.request(Method::POST, path, body).await
    }

    pub(crate) async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, Error> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Issue an authenticated request. On a session-rejected response the
    /// token is invalidated and the request retried exactly once with a
    /// fresh token; every other failure is returned as-is.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, Error> {
        let url = self.api_base.join(path)?;

        match self.send_once(method.clone(), url.clone(), body.as_ref()).await {
            Err(e) if e.is_auth_rejected() => {
                debug!("session rejected, re-authenticating once");
                self.session.invalidate();
                self.send_once(method, url, body.as_ref()).await
            }
            other => other,
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> Result<T, Error> {
        let token = self.session.ensure_session().await?;

        debug!("{} {}", method, url);
        let mut builder = self
            .http
            .request(method, url)
            .header(AUTH_HEADER, token.header_value());
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| self.map_transport(e))?;
        unwrap_envelope(resp).await
    }

    fn map_transport(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(e)
        }
    }
}

/// Build the versioned API root: `{base}/api/{version}/`.
pub fn api_base_url(base_url: &Url, api_version: &str) -> Result<Url, Error> {
    let base = base_url.as_str().trim_end_matches('/');
    let full = format!("{base}/api/{api_version}/");
    Ok(Url::parse(&full)?)
}
