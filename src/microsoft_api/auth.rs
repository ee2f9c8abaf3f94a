//! Device-authorization flow for the Microsoft identity platform.
//!
//! `Authenticator::acquire` first tries the cached credential (refreshing it
//! if it has expired), and only falls back to the interactive device flow
//! when that fails. Every successful path persists the credential before
//! returning a `Session`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use super::token_store::{TokenStore, TokenStoreError};
use super::{
    expiry_from_now, http_client, is_token_expired, MicrosoftToken, Session, AUTHORITY,
    REQUEST_TIMEOUT, SCOPES,
};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Upper bound on how long we poll, whatever the provider's code lifetime.
const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Sign-in timed out before the device code was used")]
    Timeout,
    #[error("Sign-in was declined")]
    Denied,
    #[error("Identity provider rejected client id {client_id}: {message}")]
    ClientRejected { client_id: String, message: String },
    #[error("Identity provider error {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token cache: {0}")]
    Cache(#[from] TokenStoreError),
}

/// Verification details returned when a device flow starts.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until `device_code` expires
    #[serde(default = "default_code_lifetime")]
    pub expires_in: u64,
    /// Minimum seconds between polls
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    /// Ready-made instruction text from the provider
    #[serde(default)]
    pub message: Option<String>,
}

fn default_code_lifetime() -> u64 {
    900
}

fn default_poll_interval() -> u64 {
    5
}

/// Successful token-endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_lifetime")]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Granted(TokenGrant),
    Pending,
    SlowDown,
    Denied,
    Expired,
}

/// Error body shape shared by the devicecode and token endpoints.
#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// The identity provider operations the authenticator depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn start_device_flow(
        &self,
        client_id: &str,
        scopes: &[String],
    ) -> Result<DeviceCode, AuthError>;

    async fn poll_for_token(
        &self,
        client_id: &str,
        flow: &DeviceCode,
    ) -> Result<PollOutcome, AuthError>;

    async fn refresh(&self, token: &MicrosoftToken) -> Result<TokenGrant, AuthError>;
}

// ============================================================================
// Microsoft identity platform
// ============================================================================

pub struct MicrosoftIdentity {
    client: reqwest::Client,
    authority: String,
}

impl MicrosoftIdentity {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_authority(AUTHORITY, REQUEST_TIMEOUT)
    }

    pub fn with_authority(authority: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout)?,
            authority: authority.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/oauth2/v2.0/{}", self.authority, name)
    }
}

#[async_trait]
impl IdentityProvider for MicrosoftIdentity {
    async fn start_device_flow(
        &self,
        client_id: &str,
        scopes: &[String],
    ) -> Result<DeviceCode, AuthError> {
        let scope = scopes.join(" ");
        let resp = self
            .client
            .post(self.endpoint("devicecode"))
            .form(&[("client_id", client_id), ("scope", scope.as_str())])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let err: OAuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
            if is_client_rejection(&err.error) {
                return Err(AuthError::ClientRejected {
                    client_id: client_id.to_string(),
                    message: err.error_description,
                });
            }
            return Err(AuthError::Provider {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| AuthError::Provider {
            status: status.as_u16(),
            message: format!("malformed device code response: {}", e),
        })
    }

    async fn poll_for_token(
        &self,
        client_id: &str,
        flow: &DeviceCode,
    ) -> Result<PollOutcome, AuthError> {
        let resp = self
            .client
            .post(self.endpoint("token"))
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", client_id),
                ("device_code", flow.device_code.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            let grant: TokenGrant = serde_json::from_str(&body).map_err(|e| AuthError::Provider {
                status: status.as_u16(),
                message: format!("malformed token response: {}", e),
            })?;
            return Ok(PollOutcome::Granted(grant));
        }

        let err: OAuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
        classify_poll_error(client_id, status.as_u16(), err)
    }

    async fn refresh(&self, token: &MicrosoftToken) -> Result<TokenGrant, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token cached".into()))?;
        let scope = token.scopes.join(" ");

        let resp = self
            .client
            .post(self.endpoint("token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", token.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AuthError::RefreshFailed(format!("HTTP {}: {}", status, body)));
        }
        serde_json::from_str(&body)
            .map_err(|e| AuthError::RefreshFailed(format!("malformed token response: {}", e)))
    }
}

fn is_client_rejection(code: &str) -> bool {
    matches!(code, "invalid_client" | "unauthorized_client")
}

fn classify_poll_error(
    client_id: &str,
    status: u16,
    err: OAuthErrorBody,
) -> Result<PollOutcome, AuthError> {
    match err.error.as_str() {
        "authorization_pending" => Ok(PollOutcome::Pending),
        "slow_down" => Ok(PollOutcome::SlowDown),
        "authorization_declined" | "access_denied" => Ok(PollOutcome::Denied),
        "expired_token" | "code_expired" => Ok(PollOutcome::Expired),
        code if is_client_rejection(code) => Err(AuthError::ClientRejected {
            client_id: client_id.to_string(),
            message: err.error_description,
        }),
        _ => Err(AuthError::Provider {
            status,
            message: format!("{}: {}", err.error, err.error_description),
        }),
    }
}

// ============================================================================
// Authenticator
// ============================================================================

pub struct Authenticator<P> {
    provider: Arc<P>,
    store: TokenStore,
    scopes: Vec<String>,
    flow_timeout: Duration,
    open_browser: bool,
}

impl<P: IdentityProvider + 'static> Authenticator<P> {
    pub fn new(provider: P, store: TokenStore) -> Self {
        Self {
            provider: Arc::new(provider),
            store,
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
            open_browser: true,
        }
    }

    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self
    }

    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Return a session for `client_id`, signing in interactively if needed.
    /// The session keeps the refresh token so it can renew itself mid-run.
    pub async fn acquire(&self, client_id: &str) -> Result<Session, AuthError> {
        if let Some(token) = self.cached_token(client_id).await {
            return Ok(self.session(token));
        }

        let token = self.run_device_flow(client_id).await?;
        self.store.save(&token)?;
        log::info!("Signed in; credential cached at {}", self.store.path().display());
        Ok(self.session(token))
    }

    fn session(&self, token: MicrosoftToken) -> Session {
        let provider: Arc<dyn IdentityProvider> = self.provider.clone();
        Session::with_renewal(token, provider, self.store.clone())
    }

    /// A valid cached token, refreshed if it had expired. Cache problems are
    /// not fatal here; they just mean a fresh sign-in.
    async fn cached_token(&self, client_id: &str) -> Option<MicrosoftToken> {
        let token = match self.store.load() {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Ignoring unreadable token cache: {}", e);
                return None;
            }
        };

        if token.client_id != client_id {
            log::info!("Cached credential belongs to another client id; signing in again");
            return None;
        }

        if !is_token_expired(&token) {
            log::debug!("Using cached access token");
            return Some(token);
        }

        token.refresh_token.as_ref()?;
        match refresh_and_store(&*self.provider, &self.store, &token).await {
            Ok(refreshed) => {
                log::info!("Refreshed cached credential");
                Some(refreshed)
            }
            Err(e) => {
                log::warn!("Cached credential could not be refreshed: {}", e);
                None
            }
        }
    }

    async fn run_device_flow(&self, client_id: &str) -> Result<MicrosoftToken, AuthError> {
        let flow = self
            .provider
            .start_device_flow(client_id, &self.scopes)
            .await?;

        match &flow.message {
            Some(message) => println!("{}", message),
            None => println!(
                "To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
                flow.verification_uri, flow.user_code
            ),
        }
        if self.open_browser {
            if let Err(e) = open::that(&flow.verification_uri) {
                log::warn!("Failed to open browser: {}", e);
            }
        }

        let lifetime = Duration::from_secs(flow.expires_in).min(self.flow_timeout);
        let deadline = Instant::now() + lifetime;
        let mut interval = Duration::from_secs(flow.interval);

        loop {
            match self.provider.poll_for_token(client_id, &flow).await? {
                PollOutcome::Granted(grant) => {
                    return Ok(token_from_grant(client_id, grant, None));
                }
                PollOutcome::Denied => return Err(AuthError::Denied),
                PollOutcome::Expired => return Err(AuthError::Timeout),
                PollOutcome::SlowDown => {
                    interval += Duration::from_secs(5);
                    log::debug!("Identity provider asked to slow down; polling every {:?}", interval);
                }
                PollOutcome::Pending => {}
            }

            if Instant::now() + interval >= deadline {
                return Err(AuthError::Timeout);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// Exchange `token`'s refresh token and persist the result. A failed save
/// only costs the next run a refresh, so it is logged and not returned.
pub(crate) async fn refresh_and_store(
    provider: &dyn IdentityProvider,
    store: &TokenStore,
    token: &MicrosoftToken,
) -> Result<MicrosoftToken, AuthError> {
    let grant = provider.refresh(token).await?;
    let refreshed = token_from_grant(&token.client_id, grant, Some(token));
    if let Err(e) = store.save(&refreshed) {
        log::warn!("Could not persist refreshed token: {}", e);
    }
    Ok(refreshed)
}

/// Build the cached credential from a grant. Refresh responses may omit the
/// refresh token, in which case the previous one is kept.
fn token_from_grant(
    client_id: &str,
    grant: TokenGrant,
    previous: Option<&MicrosoftToken>,
) -> MicrosoftToken {
    let scopes = match &grant.scope {
        Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
        None => previous
            .map(|p| p.scopes.clone())
            .unwrap_or_else(|| SCOPES.iter().map(|s| s.to_string()).collect()),
    };
    MicrosoftToken {
        access_token: grant.access_token,
        refresh_token: grant
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        client_id: client_id.to_string(),
        scopes,
        expiry: Some(expiry_from_now(grant.expires_in)),
    }
}

// ============================================================================
// Tests
// ============================================================================
