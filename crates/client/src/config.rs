//! Client configuration
//!
//! Credentials come either from code ([`AuthConfig`]) or from the
//! environment via [`ClientConfig::from_env`].

use pco_sdk_core::{PcoError, Result};
use pco_sdk_resilience::RateLimitConfig;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.planningcenteronline.com/people/v2";
pub const DEFAULT_RATE_LIMIT_HEADER_PREFIX: &str = "X-PCO-API-Request-Rate";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens returned by the OAuth token endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

pub type TokenRefreshedCallback = Arc<dyn Fn(&TokenSet) + Send + Sync>;
pub type RefreshFailureCallback = Arc<dyn Fn(&PcoError) + Send + Sync>;

/// OAuth credentials and refresh hooks
#[derive(Clone, Default)]
pub struct OAuthConfig {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub on_token_refreshed: Option<TokenRefreshedCallback>,
    pub on_refresh_failure: Option<RefreshFailureCallback>,
}

impl OAuthConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Called with the new tokens after every successful refresh, so callers
    /// can persist them.
    pub fn on_token_refreshed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TokenSet) + Send + Sync + 'static,
    {
        self.on_token_refreshed = Some(Arc::new(callback));
        self
    }

    pub fn on_refresh_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PcoError) + Send + Sync + 'static,
    {
        self.on_refresh_failure = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("on_token_refreshed", &self.on_token_refreshed.is_some())
            .field("on_refresh_failure", &self.on_refresh_failure.is_some())
            .finish()
    }
}

/// How requests are authenticated
#[derive(Clone)]
pub enum AuthConfig {
    /// HTTP Basic with an application id and secret
    PersonalAccessToken { app_id: String, secret: String },
    /// Bearer token, refreshed on 401
    OAuth(OAuthConfig),
}

impl AuthConfig {
    pub fn personal_access_token(app_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::PersonalAccessToken {
            app_id: app_id.into(),
            secret: secret.into(),
        }
    }

    pub fn oauth(config: OAuthConfig) -> Self {
        Self::OAuth(config)
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuth(_))
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersonalAccessToken { app_id, .. } => f
                .debug_struct("PersonalAccessToken")
                .field("app_id", app_id)
                .field("secret", &"[REDACTED]")
                .finish(),
            Self::OAuth(config) => fmt::Debug::fmt(config, f),
        }
    }
}

/// Full client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth: AuthConfig,
    /// Per-request timeout, overridable per call
    pub timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub user_agent: String,
    /// Prefix of the `-Limit`/`-Period`/`-Count` response headers
    pub rate_limit_header_prefix: String,
}

impl ClientConfig {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth,
            timeout: DEFAULT_TIMEOUT,
            rate_limit: RateLimitConfig::planning_center(),
            user_agent: format!("pco-sdk-rust/{}", env!("CARGO_PKG_VERSION")),
            rate_limit_header_prefix: DEFAULT_RATE_LIMIT_HEADER_PREFIX.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_rate_limit_header_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.rate_limit_header_prefix = prefix.into();
        self
    }

    /// Build from `PCO_*` environment variables.
    ///
    /// `PCO_APP_ID` + `PCO_SECRET` select personal-access-token mode;
    /// otherwise `PCO_ACCESS_TOKEN` (with optional `PCO_REFRESH_TOKEN`,
    /// `PCO_CLIENT_ID`, `PCO_CLIENT_SECRET`) selects OAuth. `PCO_BASE_URL`
    /// and `PCO_TIMEOUT_SECS` are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let auth = match (var("PCO_APP_ID"), var("PCO_SECRET"), var("PCO_ACCESS_TOKEN")) {
            (Some(app_id), Some(secret), _) => AuthConfig::personal_access_token(app_id, secret),
            (_, _, Some(access_token)) => {
                let mut oauth = OAuthConfig::new(access_token);
                oauth.refresh_token = var("PCO_REFRESH_TOKEN");
                oauth.client_id = var("PCO_CLIENT_ID");
                oauth.client_secret = var("PCO_CLIENT_SECRET");
                AuthConfig::OAuth(oauth)
            }
            _ => {
                return Err(PcoError::Config(
                    "set PCO_APP_ID and PCO_SECRET, or PCO_ACCESS_TOKEN".to_string(),
                ))
            }
        };

        let mut config = Self::new(auth);
        if let Some(base_url) = var("PCO_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(timeout) = var("PCO_TIMEOUT_SECS") {
            let secs = timeout.trim().parse::<u64>().map_err(|_| {
                PcoError::Config(format!("PCO_TIMEOUT_SECS is not a number: {timeout}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .map_err(|e| PcoError::Config(format!("invalid base URL {}: {e}", self.base_url)))?;
        if self.timeout.is_zero() {
            return Err(PcoError::Config("timeout must be greater than zero".into()));
        }
        Ok(())
    }

    /// `<scheme>://<host>[:port]/oauth/token` for the configured base URL
    pub fn token_url(&self) -> Result<String> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| PcoError::Config(format!("invalid base URL {}: {e}", self.base_url)))?;
        Ok(format!("{}/oauth/token", url.origin().ascii_serialization()))
    }
}
