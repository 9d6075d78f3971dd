//! OAuth2 provider client
//!
//! Implements the two provider-facing halves of the authorization code flow:
//! building the authorization redirect and exchanging the code for a token.

use axum::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use url::Url;

use super::session::SessionToken;
use crate::config::OAuthSettings;
use crate::error::AppError;

/// Provider body bytes kept in debug logs
const MAX_LOGGED_BODY: usize = 512;

/// Operations the gate needs from an OAuth2 provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Build the authorization endpoint URL the client is redirected to
    ///
    /// Pure construction, no network access.
    fn authorization_url(&self, state: &str) -> Url;

    /// Trade an authorization code for a token
    ///
    /// Performs exactly one request; retries are left to the caller.
    async fn exchange_code(&self, code: &str) -> Result<SessionToken, AppError>;
}

/// reqwest-backed provider client
pub struct OAuth2Client {
    settings: OAuthSettings,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a provider client
    ///
    /// # Arguments
    /// * `settings` - Validated provider settings
    /// * `http_client` - Shared HTTP client; the exchange timeout is applied per request
    pub fn new(settings: OAuthSettings, http_client: reqwest::Client) -> Self {
        Self {
            settings,
            http_client,
        }
    }
}

/// Raw token endpoint response
///
/// Accepts both JSON and form-encoded bodies.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
}

/// `expires_in` as sent by providers: a number, or a number in a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Option<i64> {
        match self {
            ExpiresIn::Seconds(seconds) => Some(*seconds),
            ExpiresIn::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl TokenEndpointResponse {
    fn into_session_token(self) -> Result<SessionToken, AppError> {
        if self.access_token.is_empty() {
            return Err(AppError::ExchangeFailed(
                "provider response missing access_token".to_string(),
            ));
        }

        let expiry = self
            .expires_in
            .as_ref()
            .and_then(ExpiresIn::seconds)
            .filter(|seconds| *seconds > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));

        Ok(SessionToken {
            access_token: self.access_token,
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expiry,
        })
    }
}

/// Parse a token endpoint body according to its content type
fn parse_token_response(content_type: &str, body: &str) -> Result<SessionToken, AppError> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let response: TokenEndpointResponse =
        if media_type == "application/x-www-form-urlencoded" || media_type == "text/plain" {
            serde_urlencoded::from_str(body)
                .map_err(|e| AppError::ExchangeFailed(format!("invalid form token response: {e}")))?
        } else {
            serde_json::from_str(body)
                .map_err(|e| AppError::ExchangeFailed(format!("invalid JSON token response: {e}")))?
        };

    response.into_session_token()
}

fn truncate_for_log(body: &str) -> &str {
    match body.char_indices().nth(MAX_LOGGED_BODY) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[async_trait]
impl ProviderClient for OAuth2Client {
    fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.settings.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("access_type", "online")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", self.settings.redirect_url.as_str())
            .append_pair("response_type", "code")
            .append_pair("state", state);
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<SessionToken, AppError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];

        tracing::debug!(token_url = %self.settings.token_url, "Exchanging authorization code");

        let response = self
            .http_client
            .post(self.settings.token_url.clone())
            .header(ACCEPT, "application/json")
            .timeout(self.settings.exchange_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::ExchangeFailed(format!("token request failed: {e}")))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::ExchangeFailed(format!("reading token response failed: {e}")))?;

        if !status.is_success() {
            tracing::debug!(
                status = %status,
                body = %truncate_for_log(&body),
                "Provider rejected authorization code"
            );
            return Err(AppError::ExchangeFailed(format!(
                "provider returned status {status}"
            )));
        }

        parse_token_response(&content_type, &body)
    }
}
