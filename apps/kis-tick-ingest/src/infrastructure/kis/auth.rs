//! KIS Approval Key Exchange
//!
//! The streaming endpoint only accepts subscriptions carrying an approval
//! key obtained from the REST token endpoint.
//!
//! # Exchange
//!
//! ```text
//! POST {rest_url}/oauth2/Approval
//! {"grant_type":"client_credentials","appkey":"...","secretkey":"..."}
//!
//! 200 {"approval_key":"..."}
//! ```
//!
//! Keys are short-lived. [`Authenticator`] caches the last key for a bounded
//! age and drops it whenever an established session fails, so the next
//! connection cycle re-authenticates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::application::ports::{ApprovalKey, ApprovalProvider, AuthError};

/// Path of the approval endpoint relative to the REST base URL.
pub const APPROVAL_PATH: &str = "/oauth2/Approval";

const MAX_ERROR_BODY_CHARS: usize = 256;

// =============================================================================
// Credentials
// =============================================================================

/// KIS application credentials.
///
/// `Debug` redacts both values.
#[derive(Clone)]
pub struct Credentials {
    app_key: String,
    app_secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is empty.
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let app_key = app_key.into();
        let app_secret = app_secret.into();

        if app_key.trim().is_empty() {
            return Err(AuthError::InvalidCredentials(
                "app key cannot be empty".to_string(),
            ));
        }
        if app_secret.trim().is_empty() {
            return Err(AuthError::InvalidCredentials(
                "app secret cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            app_key,
            app_secret,
        })
    }

    /// Get the app key.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Get the app secret.
    #[must_use]
    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &"[REDACTED]")
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ApprovalRequest<'a> {
    grant_type: &'static str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApprovalResponse {
    #[serde(default)]
    approval_key: Option<String>,
}

// =============================================================================
// HTTP Client
// =============================================================================

/// Performs the approval exchange over HTTPS.
#[derive(Debug, Clone)]
pub struct KisApprovalClient {
    client: Client,
    endpoint: String,
    credentials: Credentials,
}

impl KisApprovalClient {
    /// Create a client for the given REST base URL.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unreachable` if the HTTP client cannot be built.
    pub fn new(
        rest_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}{APPROVAL_PATH}", rest_url.trim_end_matches('/')),
            credentials,
        })
    }

    /// Full URL of the approval endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ApprovalProvider for KisApprovalClient {
    async fn obtain_approval_key(&self) -> Result<ApprovalKey, AuthError> {
        let request = ApprovalRequest {
            grant_type: "client_credentials",
            appkey: self.credentials.app_key(),
            secretkey: self.credentials.app_secret(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: ApprovalResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout
            } else {
                tracing::debug!(error = %e, "Approval response is not the expected JSON");
                AuthError::MissingKey
            }
        })?;

        ApprovalKey::new(parsed.approval_key.unwrap_or_default())
    }
}

fn map_transport_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Unreachable(err.to_string())
    }
}

// =============================================================================
// Cached Authenticator
// =============================================================================

#[derive(Debug, Clone)]
struct CachedKey {
    key: ApprovalKey,
    issued_at: Instant,
}

/// Caches approval keys from an [`ApprovalProvider`].
pub struct Authenticator {
    provider: Arc<dyn ApprovalProvider>,
    ttl: Duration,
    cached: Mutex<Option<CachedKey>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("ttl", &self.ttl)
            .field("has_cached_key", &self.has_cached_key())
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Wrap a provider, reusing keys younger than `ttl`.
    #[must_use]
    pub fn new(provider: Arc<dyn ApprovalProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached key, or perform a fresh exchange.
    ///
    /// # Errors
    ///
    /// Propagates the provider's `AuthError`; nothing is cached on failure.
    pub async fn approval_key(&self) -> Result<ApprovalKey, AuthError> {
        let cached = self.cached.lock().clone();
        if let Some(cached) = cached {
            if cached.issued_at.elapsed() < self.ttl {
                return Ok(cached.key);
            }
            tracing::debug!("Cached approval key expired");
        }

        let key = self.provider.obtain_approval_key().await?;
        *self.cached.lock() = Some(CachedKey {
            key: key.clone(),
            issued_at: Instant::now(),
        });
        tracing::info!("Obtained new approval key");
        Ok(key)
    }

    /// Discard the cached key so the next cycle re-authenticates.
    pub fn invalidate(&self) {
        if self.cached.lock().take().is_some() {
            tracing::info!("Discarded cached approval key");
        }
    }

    /// Whether a key is currently cached.
    #[must_use]
    pub fn has_cached_key(&self) -> bool {
        self.cached.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("PSappkey", "secret-value").unwrap()
    }

    fn client(server: &MockServer) -> KisApprovalClient {
        KisApprovalClient::new(&server.uri(), credentials(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn credentials_reject_empty() {
        assert!(matches!(
            Credentials::new("", "secret"),
            Err(AuthError::InvalidCredentials(_))
        ));
        assert!(matches!(
            Credentials::new("key", " "),
            Err(AuthError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn credentials_redacted_debug() {
        let debug = format!("{:?}", credentials());
        assert!(!debug.contains("PSappkey"));
        assert!(!debug.contains("secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = KisApprovalClient::new(
            "https://openapivts.koreainvestment.com:29443/",
            credentials(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.endpoint(),
            "https://openapivts.koreainvestment.com:29443/oauth2/Approval"
        );
    }

    #[tokio::test]
    async fn exchange_posts_credentials_and_reads_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(APPROVAL_PATH))
            .and(body_json(json!({
                "grant_type": "client_credentials",
                "appkey": "PSappkey",
                "secretkey": "secret-value",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"approval_key": "a1b2-c3d4"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let key = client(&server).obtain_approval_key().await.unwrap();
        assert_eq!(key.as_str(), "a1b2-c3d4");
    }

    #[tokio::test]
    async fn missing_key_field_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let err = client(&server).obtain_approval_key().await.unwrap_err();
        assert!(matches!(err, AuthError::MissingKey));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = client(&server).obtain_approval_key().await.unwrap_err();
        match err {
            AuthError::Rejected { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"approval_key": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            KisApprovalClient::new(&server.uri(), credentials(), Duration::from_millis(50))
                .unwrap();
        let err = client.obtain_approval_key().await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout));
    }

    #[tokio::test]
    async fn unreachable_endpoint() {
        let client = KisApprovalClient::new(
            "http://127.0.0.1:1",
            credentials(),
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.obtain_approval_key().await.unwrap_err();
        assert!(matches!(err, AuthError::Unreachable(_) | AuthError::Timeout));
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApprovalProvider for CountingProvider {
        async fn obtain_approval_key(&self) -> Result<ApprovalKey, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            ApprovalKey::new(format!("key-{n}"))
        }
    }

    fn counting() -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn authenticator_reuses_cached_key() {
        let provider = counting();
        let auth = Authenticator::new(provider.clone(), Duration::from_secs(60));

        assert_eq!(auth.approval_key().await.unwrap().as_str(), "key-1");
        assert_eq!(auth.approval_key().await.unwrap().as_str(), "key-1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_fresh_exchange() {
        let provider = counting();
        let auth = Authenticator::new(provider.clone(), Duration::from_secs(60));

        let _ = auth.approval_key().await.unwrap();
        auth.invalidate();
        assert!(!auth.has_cached_key());

        assert_eq!(auth.approval_key().await.unwrap().as_str(), "key-2");
    }

    #[tokio::test]
    async fn expired_key_is_refreshed() {
        let provider = counting();
        let auth = Authenticator::new(provider.clone(), Duration::ZERO);

        let _ = auth.approval_key().await.unwrap();
        assert_eq!(auth.approval_key().await.unwrap().as_str(), "key-2");
    }
}
