//! Session credential codec
//!
//! The provider's token response is the whole session. It is stored
//! client-side as percent-escaped JSON (cookie value or request header).
//! No server-side session storage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Token obtained from the provider's token endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Access token issued by the provider
    pub access_token: String,
    /// Token type, usually "Bearer"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    /// Refresh token, if the provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the access token expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl SessionToken {
    /// Check if the token's own expiry has passed
    ///
    /// Tokens without an expiry never expire.
    pub fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| expiry < Utc::now())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Encode a token for transport
///
/// Format: percent-escape(json(token)). Only unreserved characters are left
/// as-is, so the result is a valid cookie value and header value.
///
/// # Errors
/// Returns `SerializationFailed` if the token cannot be serialized
pub fn encode_session(token: &SessionToken) -> Result<String, AppError> {
    let payload =
        serde_json::to_string(token).map_err(|e| AppError::SerializationFailed(e.to_string()))?;

    Ok(urlencoding::encode(&payload).into_owned())
}

/// Decode a transported token
///
/// # Errors
/// Returns `MalformedSession` on empty input, bad escaping, or a payload
/// that is not a token
pub fn decode_session(encoded: &str) -> Result<SessionToken, AppError> {
    if encoded.trim().is_empty() {
        return Err(AppError::MalformedSession("empty session value".to_string()));
    }

    let payload = urlencoding::decode(encoded)
        .map_err(|e| AppError::MalformedSession(format!("invalid escaping: {e}")))?;

    serde_json::from_str(&payload)
        .map_err(|e| AppError::MalformedSession(format!("invalid payload: {e}")))
}
