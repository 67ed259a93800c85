//! Request authentication and OAuth token refresh

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pco_sdk_core::{PcoError, Result};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::config::{AuthConfig, OAuthConfig, TokenSet};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Clone)]
struct OAuthTokens {
    access_token: String,
    refresh_token: Option<String>,
}

enum Credentials {
    Basic(String),
    OAuth {
        config: OAuthConfig,
        tokens: RwLock<OAuthTokens>,
        refresh_lock: Mutex<()>,
    },
}

/// Produces the single `Authorization` header of every request
pub struct Authenticator {
    credentials: Credentials,
    token_url: String,
    http: reqwest::Client,
}

impl Authenticator {
    pub fn new(auth: &AuthConfig, token_url: impl Into<String>, http: reqwest::Client) -> Self {
        let credentials = match auth {
            AuthConfig::PersonalAccessToken { app_id, secret } => {
                let encoded = STANDARD.encode(format!("{app_id}:{secret}"));
                Credentials::Basic(format!("Basic {encoded}"))
            }
            AuthConfig::OAuth(config) => Credentials::OAuth {
                tokens: RwLock::new(OAuthTokens {
                    access_token: config.access_token.clone(),
                    refresh_token: config.refresh_token.clone(),
                }),
                config: config.clone(),
                refresh_lock: Mutex::new(()),
            },
        };

        Self {
            credentials,
            token_url: token_url.into(),
            http,
        }
    }

    /// Whether a 401 may be answered with a token refresh
    pub fn can_refresh(&self) -> bool {
        matches!(self.credentials, Credentials::OAuth { .. })
    }

    pub async fn authorization_header(&self) -> String {
        match &self.credentials {
            Credentials::Basic(header) => header.clone(),
            Credentials::OAuth { tokens, .. } => {
                format!("Bearer {}", tokens.read().await.access_token)
            }
        }
    }

    /// Exchange the refresh token for new credentials.
    ///
    /// `rejected_header` is the `Authorization` value the server refused. If
    /// another task already replaced it, the refresh is skipped and the current
    /// token reused. On failure the refresh-failure callback runs before the
    /// error is returned.
    pub async fn refresh(&self, rejected_header: &str) -> Result<()> {
        let Credentials::OAuth {
            config,
            tokens,
            refresh_lock,
        } = &self.credentials
        else {
            return Err(PcoError::TokenRefresh(
                "personal access tokens cannot be refreshed".into(),
            ));
        };

        let _guard = refresh_lock.lock().await;

        if self.authorization_header().await != rejected_header {
            debug!("Token already refreshed by a concurrent request");
            return Ok(());
        }

        let refresh_token = tokens.read().await.refresh_token.clone();
        let result = match refresh_token {
            Some(refresh_token) => self.request_tokens(config, &refresh_token).await,
            None => Err(PcoError::TokenRefresh("no refresh token configured".into())),
        };

        match result {
            Ok(token_set) => {
                {
                    let mut current = tokens.write().await;
                    current.access_token = token_set.access_token.clone();
                    if let Some(refresh_token) = &token_set.refresh_token {
                        current.refresh_token = Some(refresh_token.clone());
                    }
                }
                info!("OAuth access token refreshed");
                if let Some(callback) = &config.on_token_refreshed {
                    callback(&token_set);
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "OAuth token refresh failed");
                if let Some(callback) = &config.on_refresh_failure {
                    callback(&e);
                }
                Err(e)
            }
        }
    }

    async fn request_tokens(&self, config: &OAuthConfig, refresh_token: &str) -> Result<TokenSet> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(client_id) = &config.client_id {
            form.push(("client_id", client_id.as_str()));
        }
        if let Some(client_secret) = &config.client_secret {
            form.push(("client_secret", client_secret.as_str()));
        }

        debug!(token_url = %self.token_url, "Refreshing OAuth access token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| PcoError::TokenRefresh(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(PcoError::TokenRefresh(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| PcoError::TokenRefresh(format!("invalid token response: {e}")))?;

        Ok(TokenSet {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            token_type: tokens.token_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_header_for_personal_access_token() {
        let auth = Authenticator::new(
            &AuthConfig::personal_access_token("app", "secret"),
            "http://localhost/oauth/token",
            reqwest::Client::new(),
        );

        // base64("app:secret")
        assert_eq!(auth.authorization_header().await, "Basic YXBwOnNlY3JldA==");
        assert!(!auth.can_refresh());
    }

    #[tokio::test]
    async fn test_bearer_header_for_oauth() {
        let auth = Authenticator::new(
            &AuthConfig::oauth(OAuthConfig::new("tok")),
            "http://localhost/oauth/token",
            reqwest::Client::new(),
        );
        assert_eq!(auth.authorization_header().await, "Bearer tok");
        assert!(auth.can_refresh());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_invokes_failure_callback() {
        let failures = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = failures.clone();
        let auth = Authenticator::new(
            &AuthConfig::oauth(OAuthConfig::new("tok").on_refresh_failure(move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })),
            "http://localhost/oauth/token",
            reqwest::Client::new(),
        );

        let err = auth.refresh("Bearer tok").await.unwrap_err();
        assert!(matches!(err, PcoError::TokenRefresh(_)));
        assert_eq!(failures.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_skipped_when_token_already_replaced() {
        let auth = Authenticator::new(
            &AuthConfig::oauth(OAuthConfig::new("fresh")),
            "http://localhost/oauth/token",
            reqwest::Client::new(),
        );
        auth.refresh("Bearer stale").await.unwrap();
        assert_eq!(auth.authorization_header().await, "Bearer fresh");
    }
}
