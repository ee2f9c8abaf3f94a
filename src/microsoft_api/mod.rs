//! Native Microsoft identity platform + Graph client.
//!
//! Direct HTTP via reqwest, no SDK. The cached credential lives in a single
//! JSON file (see `token_store`) and is reused across runs.
//!
//! Modules:
//! - auth: device-authorization flow and session acquisition
//! - mail: Graph `me/messages` draft creation
//! - token_store: credential cache file

pub mod auth;
pub mod mail;
pub mod token_store;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use auth::{AuthError, IdentityProvider};
use token_store::TokenStore;

/// Identity platform authority for work, school and personal accounts.
pub const AUTHORITY: &str = "https://login.microsoftonline.com/common";

/// Microsoft Graph v1.0 root.
pub const GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

/// Delegated scopes requested by the device flow.
pub const SCOPES: &[&str] = &["Mail.ReadWrite", "offline_access"];

/// Whole-request timeout for identity and Graph calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// HTTP client shared by the identity and Graph clients. A stalled request
/// fails with a timeout error instead of hanging the run.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 credential persisted in the token cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrosoftToken {
    #[serde(alias = "token")]
    pub access_token: String,
    /// Long-lived renewal material; absent if `offline_access` was not granted
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Client id the token was issued to
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (RFC 3339)
    #[serde(default)]
    pub expiry: Option<String>,
}

/// The authenticated handle shared by every dispatch in a run.
///
/// Carries the full cached credential, so an expired or revoked access token
/// can be renewed mid-run from the refresh token without re-prompting.
pub struct Session {
    token: Mutex<MicrosoftToken>,
    renewal: Option<Renewal>,
}

struct Renewal {
    provider: Arc<dyn IdentityProvider>,
    store: TokenStore,
}

impl Session {
    /// A fixed access token with no way to renew it.
    pub fn new(access_token: impl Into<String>, expiry: Option<String>) -> Self {
        Self {
            token: Mutex::new(MicrosoftToken {
                access_token: access_token.into(),
                refresh_token: None,
                client_id: String::new(),
                scopes: Vec::new(),
                expiry,
            }),
            renewal: None,
        }
    }

    /// A session that refreshes through `provider` and persists to `store`.
    pub(crate) fn with_renewal(
        token: MicrosoftToken,
        provider: Arc<dyn IdentityProvider>,
        store: TokenStore,
    ) -> Self {
        Self {
            token: Mutex::new(token),
            renewal: Some(Renewal { provider, store }),
        }
    }

    pub fn access_token(&self) -> String {
        self.token.lock().access_token.clone()
    }

    pub fn can_renew(&self) -> bool {
        self.renewal.is_some() && self.token.lock().refresh_token.is_some()
    }

    /// Get a valid access token, refreshing first if it has expired.
    ///
    /// Without renewal material the current token is returned as is and the
    /// server gets to reject it.
    pub async fn valid_access_token(&self) -> Result<String, AuthError> {
        let expired = is_token_expired(&self.token.lock());
        if expired && self.can_renew() {
            return self.renew().await;
        }
        Ok(self.access_token())
    }

    /// Exchange the refresh token for a new access token unconditionally.
    pub async fn renew(&self) -> Result<String, AuthError> {
        let renewal = self
            .renewal
            .as_ref()
            .ok_or_else(|| AuthError::RefreshFailed("session has no renewal material".into()))?;
        let current = self.token.lock().clone();
        let refreshed =
            auth::refresh_and_store(renewal.provider.as_ref(), &renewal.store, &current).await?;
        let access_token = refreshed.access_token.clone();
        *self.token.lock() = refreshed;
        log::info!("Access token renewed");
        Ok(access_token)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.token.lock();
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("expiry", &token.expiry)
            .field("renewable", &self.renewal.is_some())
            .finish()
    }
}

// ============================================================================
// Error type
// ============================================================================

/// Errors from a single Graph request.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Access token expired or revoked")]
    AuthExpired,
    #[error("API error {status}: {message}")]
    ApiError {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl GraphError {
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            GraphError::Http(err) if err.is_timeout() || err.is_connect() => {
                RetryDecision::Retryable
            }
            GraphError::ApiError { status, .. } => retry_decision_for_status(*status),
            _ => RetryDecision::NonRetryable,
        }
    }

    /// Server-requested wait, if the response carried a `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GraphError::ApiError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// ============================================================================
// Retry policy
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per request, first try included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
            max_jitter_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

/// 507 is Graph's mailbox-quota signal and will not clear on retry.
pub fn retry_decision_for_status(status: u16) -> RetryDecision {
    match status {
        408 | 429 => RetryDecision::Retryable,
        507 => RetryDecision::NonRetryable,
        500..=599 => RetryDecision::Retryable,
        _ => RetryDecision::NonRetryable,
    }
}

/// Backoff before retry number `attempt` (1-based).
pub fn retry_delay(attempt: u32, policy: &RetryPolicy, retry_after: Option<Duration>) -> Duration {
    if let Some(wait) = retry_after {
        return wait.min(Duration::from_secs(30));
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = if policy.max_jitter_ms == 0 {
        0
    } else {
        (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0))
            % policy.max_jitter_ms
    };
    Duration::from_millis(base.saturating_add(jitter))
}

/// Parse a `Retry-After` header given in delta-seconds.
pub(crate) fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

// ============================================================================
// Token expiry
// ============================================================================

/// Default location of the credential cache.
pub fn token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".outreach-drafts")
        .join("token.json")
}

/// Check if a token is expired based on its expiry field.
pub fn is_token_expired(token: &MicrosoftToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => match chrono::DateTime::parse_from_rfc3339(expiry_str) {
            Ok(expiry) => {
                // Treat as expired within 60 seconds of expiry
                let now = chrono::Utc::now();
                expiry <= now + chrono::Duration::seconds(60)
            }
            Err(_) => true,
        },
    }
}

/// RFC 3339 expiry for a token issued now with the given lifetime.
/// Lifetimes beyond a day are clamped.
pub(crate) fn expiry_from_now(expires_in: u64) -> String {
    let lifetime = expires_in.min(MAX_TOKEN_LIFETIME_SECS) as i64;
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(lifetime);
    expiry.to_rfc3339()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_expiry(expiry: Option<String>) -> MicrosoftToken {
        MicrosoftToken {
            access_token: "eyJ0.test".to_string(),
            refresh_token: None,
            client_id: "client".to_string(),
            scopes: vec![],
            expiry,
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let token = MicrosoftToken {
            access_token: "eyJ0.access".to_string(),
            refresh_token: Some("M.R3_refresh".to_string()),
            client_id: "00000000-aaaa-bbbb-cccc-000000000000".to_string(),
            scopes: vec!["Mail.ReadWrite".to_string()],
            expiry: Some("2026-02-08T12:00:00+00:00".to_string()),
        };

        let json = serde_json::to_string_pretty(&token).unwrap();
        let parsed: MicrosoftToken = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.access_token, "eyJ0.access");
        assert_eq!(parsed.refresh_token.as_deref(), Some("M.R3_refresh"));
        assert_eq!(parsed.scopes, vec!["Mail.ReadWrite"]);
    }

    #[test]
    fn test_token_alias_and_defaults() {
        let json = r#"{"token": "abc", "client_id": "c"}"#;
        let token: MicrosoftToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(token.refresh_token.is_none());
        assert!(token.expiry.is_none());
    }

    #[test]
    fn test_is_token_expired_no_expiry() {
        assert!(is_token_expired(&token_with_expiry(None)));
    }

    #[test]
    fn test_is_token_expired_future() {
        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(!is_token_expired(&token_with_expiry(Some(future.to_rfc3339()))));
    }

    #[test]
    fn test_is_token_expired_past_and_skew() {
        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert!(is_token_expired(&token_with_expiry(Some(past.to_rfc3339()))));

        let almost = chrono::Utc::now() + chrono::Duration::seconds(30);
        assert!(is_token_expired(&token_with_expiry(Some(almost.to_rfc3339()))));
    }

    #[test]
    fn test_is_token_expired_garbage() {
        assert!(is_token_expired(&token_with_expiry(Some("tomorrow".into()))));
    }

    #[test]
    fn test_retry_decision_for_status() {
        assert_eq!(retry_decision_for_status(429), RetryDecision::Retryable);
        assert_eq!(retry_decision_for_status(408), RetryDecision::Retryable);
        assert_eq!(retry_decision_for_status(500), RetryDecision::Retryable);
        assert_eq!(retry_decision_for_status(503), RetryDecision::Retryable);
        assert_eq!(retry_decision_for_status(507), RetryDecision::NonRetryable);
        assert_eq!(retry_decision_for_status(400), RetryDecision::NonRetryable);
        assert_eq!(retry_decision_for_status(401), RetryDecision::NonRetryable);
        assert_eq!(retry_decision_for_status(403), RetryDecision::NonRetryable);
    }

    #[test]
    fn test_graph_error_classification() {
        let throttled = GraphError::ApiError {
            status: 429,
            message: "TooManyRequests".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(throttled.retry_decision(), RetryDecision::Retryable);
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(2)));

        assert_eq!(
            GraphError::AuthExpired.retry_decision(),
            RetryDecision::NonRetryable
        );
        assert_eq!(
            GraphError::InvalidResponse("no id".into()).retry_decision(),
            RetryDecision::NonRetryable
        );
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            max_jitter_ms: 0,
        };
        assert_eq!(retry_delay(1, &policy, None), Duration::from_millis(100));
        assert_eq!(retry_delay(2, &policy, None), Duration::from_millis(200));
        assert_eq!(retry_delay(3, &policy, None), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_delay_prefers_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(
            retry_delay(1, &policy, Some(Duration::from_secs(4))),
            Duration::from_secs(4)
        );
        assert_eq!(
            retry_delay(1, &policy, Some(Duration::from_secs(120))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_parse_retry_after() {
        let value = reqwest::header::HeaderValue::from_static("7");
        assert_eq!(parse_retry_after(Some(&value)), Some(Duration::from_secs(7)));

        let date = reqwest::header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&date)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let session = Session::new("secret-token", None);
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("secret-token"));
        assert_eq!(session.access_token(), "secret-token");
        assert!(!session.can_renew());
    }

    #[tokio::test]
    async fn test_session_without_renewal_material() {
        let session = Session::new("stale", None);
        // Expired by the clock, but nothing to renew with: hand it over as is
        assert_eq!(session.valid_access_token().await.unwrap(), "stale");
        assert!(matches!(
            session.renew().await,
            Err(AuthError::RefreshFailed(_))
        ));
    }

    #[test]
    fn test_expiry_from_now_clamps_lifetime() {
        let expiry = expiry_from_now(u64::MAX);
        let parsed = chrono::DateTime::parse_from_rfc3339(&expiry).unwrap();
        let limit = chrono::Utc::now() + chrono::Duration::seconds(MAX_TOKEN_LIFETIME_SECS as i64 + 5);
        assert!(parsed <= limit);

        let hour = chrono::DateTime::parse_from_rfc3339(&expiry_from_now(3600)).unwrap();
        assert!(hour > chrono::Utc::now() + chrono::Duration::minutes(59));
    }
}
