//! Bearer credentials for the issue tracker.
//!
//! Tokens are expiring capabilities. [`CredentialCache`] hands out the
//! cached token while it is fresh, re-acquires shortly before expiry, and
//! drops it whenever a caller reports a `401`.

use crate::error::ErrorCode;
use crate::retry::{RetryPolicy, Sleeper};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Refresh this many seconds before a token's stated expiry.
pub const REFRESH_SKEW_SECS: i64 = 60;

/// GitHub rejects app JWTs valid for more than ten minutes.
const APP_JWT_LIFETIME_SECS: i64 = 540;
/// Backdate `iat` to tolerate clock drift against GitHub.
const APP_JWT_BACKDATE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("credential configuration invalid: {0}")]
    Config(String),

    #[error("failed to sign app JWT: {0}")]
    Signing(String),

    #[error("installation token exchange failed: {0}")]
    Exchange(String),

    #[error("gave up acquiring a credential after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl AuthError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::Signing(_) | Self::Exchange(_) | Self::Exhausted { .. } => ErrorCode::AuthFailed,
        }
    }

    /// Only exchange failures are worth another attempt; configuration and
    /// signing problems will fail identically every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Exchange(_))
    }
}

/// A bearer token and its expiry, if the issuer stated one.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    #[must_use]
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the token can still be used at `now`, keeping `skew` in hand.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, skew: ChronoDuration) -> bool {
        self.expires_at.is_none_or(|expiry| now + skew < expiry)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can issue a bearer token.
pub trait CredentialSource: Send + Sync {
    /// Acquire a new token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when no token could be issued.
    fn acquire(&self) -> Result<BearerToken, AuthError>;

    /// Short description for logs.
    fn describe(&self) -> &'static str;
}

/// A fixed token (personal access token, `GITHUB_TOKEN`). Never expires
/// from our point of view; a `401` is surfaced on the next call.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

impl CredentialSource for StaticToken {
    fn acquire(&self) -> Result<BearerToken, AuthError> {
        if self.0.trim().is_empty() {
            return Err(AuthError::Config("static token is empty".to_string()));
        }
        Ok(BearerToken::new(self.0.clone(), None))
    }

    fn describe(&self) -> &'static str {
        "static-token"
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// GitHub App installation tokens: sign an RS256 JWT with the app key and
/// exchange it for a short-lived installation token.
pub struct GitHubAppSource {
    app_id: String,
    installation_id: String,
    key: EncodingKey,
    api_base: String,
    agent: ureq::Agent,
}

impl GitHubAppSource {
    /// Build a source from the app's PEM private key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] when ids are blank or the key is not a
    /// valid RSA PEM.
    pub fn from_pem(
        app_id: &str,
        installation_id: &str,
        private_key_pem: &[u8],
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        if app_id.trim().is_empty() || installation_id.trim().is_empty() {
            return Err(AuthError::Config(
                "app id and installation id are required".to_string(),
            ));
        }
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|err| AuthError::Config(format!("invalid app private key: {err}")))?;

        Ok(Self {
            app_id: app_id.trim().to_string(),
            installation_id: installation_id.trim().to_string(),
            key,
            api_base: api_base.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }

    /// Sign the app JWT for `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if encoding fails.
    pub fn sign_jwt(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let issued = now.timestamp();
        let claims = AppClaims {
            iat: issued - APP_JWT_BACKDATE_SECS,
            exp: issued + APP_JWT_LIFETIME_SECS,
            iss: self.app_id.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|err| AuthError::Signing(err.to_string()))
    }
}

impl CredentialSource for GitHubAppSource {
    fn acquire(&self) -> Result<BearerToken, AuthError> {
        let jwt = self.sign_jwt(Utc::now())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, self.installation_id
        );

        let response = self
            .agent
            .post(&url)
            .set("Accept", "application/vnd.github+json")
            .set("Authorization", &format!("Bearer {jwt}"))
            .call()
            .map_err(|err| AuthError::Exchange(err.to_string()))?;

        let payload: InstallationTokenResponse = response
            .into_json()
            .map_err(|err| AuthError::Exchange(format!("undecodable token response: {err}")))?;

        tracing::info!(
            installation = %self.installation_id,
            expires_at = ?payload.expires_at,
            "acquired installation token"
        );
        Ok(BearerToken::new(payload.token, payload.expires_at))
    }

    fn describe(&self) -> &'static str {
        "github-app"
    }
}

/// Shared, refreshable credential used by sync passes and webhook requests.
pub struct CredentialCache {
    source: Box<dyn CredentialSource>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    cached: Mutex<Option<BearerToken>>,
}

impl CredentialCache {
    #[must_use]
    pub fn new(
        source: Box<dyn CredentialSource>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            source,
            policy,
            sleeper,
            cached: Mutex::new(None),
        }
    }

    /// Current token secret, acquiring a new one when needed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Exhausted`] after the retry budget is spent, or
    /// the first non-retryable error.
    pub fn token(&self) -> Result<String, AuthError> {
        self.token_at(Utc::now())
    }

    /// [`Self::token`] against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`Self::token`].
    pub fn token_at(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        // Held across acquisition so concurrent callers share one refresh.
        let mut cached = self.lock();
        let skew = ChronoDuration::seconds(REFRESH_SKEW_SECS);
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh_at(now, skew)) {
            return Ok(token.secret().to_string());
        }

        let token = self.acquire_with_retry()?;
        let secret = token.secret().to_string();
        *cached = Some(token);
        Ok(secret)
    }

    /// Forget the cached token after the remote rejected it.
    pub fn invalidate(&self) {
        let mut cached = self.lock();
        if cached.take().is_some() {
            tracing::info!(source = self.source.describe(), "credential invalidated");
        }
    }

    fn acquire_with_retry(&self) -> Result<BearerToken, AuthError> {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match self.source.acquire() {
                Ok(token) => return Ok(token),
                Err(err) if !err.is_retryable() => {
                    tracing::error!(
                        source = self.source.describe(),
                        %err,
                        "credential acquisition failed"
                    );
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        source = self.source.describe(),
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        %err,
                        "credential acquisition attempt failed"
                    );
                    let Some(delay) = self.policy.delay_after(attempt) else {
                        return Err(AuthError::Exhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    };
                    self.sleeper.sleep(delay);
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<BearerToken>> {
        self.cached
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("source", &self.source.describe())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSleeper, ScriptedCredentials};
    use jsonwebtoken::{DecodingKey, Validation};

    const APP_KEY: &str = include_str!("../tests/fixtures/app-key.pem");
    const APP_PUB: &str = include_str!("../tests/fixtures/app-key.pub.pem");

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn cache_with(
        source: ScriptedCredentials,
        attempts: u32,
    ) -> (CredentialCache, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let cache = CredentialCache::new(
            Box::new(source),
            RetryPolicy::new(attempts, Duration::from_millis(100)),
            sleeper.clone(),
        );
        (cache, sleeper)
    }

    #[test]
    fn fresh_token_is_reused() {
        let source = ScriptedCredentials::expiring_at(at(10_000));
        let calls = source.calls();
        let (cache, _) = cache_with(source, 3);

        assert_eq!(cache.token_at(at(1_000)).expect("token"), "token-1");
        assert_eq!(cache.token_at(at(2_000)).expect("token"), "token-1");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn token_near_expiry_is_refreshed() {
        let source = ScriptedCredentials::expiring_at(at(10_000));
        let calls = source.calls();
        let (cache, _) = cache_with(source, 3);

        assert_eq!(cache.token_at(at(1_000)).expect("token"), "token-1");
        // Inside the refresh skew window.
        assert_eq!(cache.token_at(at(9_950)).expect("token"), "token-2");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn invalidate_forces_reacquire() {
        let source = ScriptedCredentials::never_expiring();
        let calls = source.calls();
        let (cache, _) = cache_with(source, 3);

        assert_eq!(cache.token().expect("token"), "token-1");
        cache.invalidate();
        assert_eq!(cache.token().expect("token"), "token-2");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn transient_failures_retry_with_backoff() {
        let source = ScriptedCredentials::never_expiring().failing_first(2);
        let (cache, sleeper) = cache_with(source, 3);

        assert_eq!(cache.token().expect("third attempt succeeds"), "token-3");
        assert_eq!(sleeper.total_sleeps(), 2);
        assert_eq!(sleeper.durations(), vec![Duration::from_millis(100); 2]);
    }

    #[test]
    fn exhausted_after_budget() {
        let source = ScriptedCredentials::never_expiring().failing_first(5);
        let calls = source.calls();
        let (cache, sleeper) = cache_with(source, 3);

        let err = cache.token().unwrap_err();
        assert!(matches!(err, AuthError::Exhausted { attempts: 3, .. }), "{err}");
        assert_eq!(err.code(), ErrorCode::AuthFailed);
        assert_eq!(calls.get(), 3);
        assert_eq!(sleeper.total_sleeps(), 2);
    }

    #[test]
    fn config_errors_are_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let cache = CredentialCache::new(
            Box::new(StaticToken::new("  ")),
            RetryPolicy::new(4, Duration::from_millis(10)),
            sleeper.clone(),
        );

        assert!(matches!(cache.token(), Err(AuthError::Config(_))));
        assert_eq!(sleeper.total_sleeps(), 0);
    }

    #[test]
    fn static_token_has_no_expiry() {
        let token = StaticToken::new("ghp_example").acquire().expect("token");
        assert_eq!(token.secret(), "ghp_example");
        assert!(token.is_fresh_at(
            at(i64::from(i32::MAX)),
            ChronoDuration::seconds(REFRESH_SKEW_SECS)
        ));
        assert!(!format!("{token:?}").contains("ghp_example"));
    }

    #[test]
    fn app_jwt_carries_issuer_and_bounded_lifetime() {
        let source = GitHubAppSource::from_pem(
            "12345",
            "678",
            APP_KEY.as_bytes(),
            "https://api.github.com/",
            Duration::from_secs(5),
        )
        .expect("key parses");

        let now = Utc::now();
        let jwt = source.sign_jwt(now).expect("jwt signs");

        let key = DecodingKey::from_rsa_pem(APP_PUB.as_bytes()).expect("public key parses");
        let validation = Validation::new(Algorithm::RS256);
        let decoded =
            jsonwebtoken::decode::<AppClaims>(&jwt, &key, &validation).expect("jwt verifies");
        assert_eq!(decoded.claims.iss, "12345");
        assert_eq!(decoded.claims.iat, now.timestamp() - APP_JWT_BACKDATE_SECS);
        assert!(decoded.claims.exp - decoded.claims.iat <= 600);
    }

    #[test]
    fn app_source_rejects_bad_key_and_blank_ids() {
        let timeout = Duration::from_secs(1);
        let bad_key =
            GitHubAppSource::from_pem("1", "2", b"not a key", DEFAULT_TEST_BASE, timeout);
        assert!(matches!(bad_key, Err(AuthError::Config(_))));

        let blank =
            GitHubAppSource::from_pem(" ", "2", APP_KEY.as_bytes(), DEFAULT_TEST_BASE, timeout);
        assert!(matches!(blank, Err(AuthError::Config(_))));
    }

    const DEFAULT_TEST_BASE: &str = "https://api.github.com";
}
