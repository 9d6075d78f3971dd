//! Request classification
//!
//! Decides, from the request path and session evidence alone, which step of
//! the authorization code flow a request belongs to.

use axum::http::{HeaderMap, header::COOKIE};
use axum_extra::extract::cookie::Cookie;

use super::session::{SessionToken, decode_session};
use crate::config::{OAuthSettings, SessionCarriage, UnmatchedPolicy, decode_path};

/// What the gate should do with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Provider callback carrying an authorization code
    NeedsCallback,
    /// Send the client to the provider
    NeedsRedirect,
    /// Session evidence present
    Authenticated,
    /// Outside the enforced scope
    PassThrough,
}

impl Classification {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::NeedsCallback => "needs_callback",
            Classification::NeedsRedirect => "needs_redirect",
            Classification::Authenticated => "authenticated",
            Classification::PassThrough => "pass_through",
        }
    }
}

/// Classify a request
///
/// First match wins:
/// 1. callback path
/// 2. configured auth path
/// 3. session present
/// 4. unmatched policy
///
/// Paths are compared for exact equality after percent-decoding, so
/// `/c%61llback` is the callback path `/callback`.
pub fn classify(
    path: &str,
    session: Option<&SessionToken>,
    settings: &OAuthSettings,
) -> Classification {
    let path = decode_path(path);
    let path = path.as_ref();

    if path == settings.callback_path {
        return Classification::NeedsCallback;
    }

    if settings.auth_path.as_deref() == Some(path) {
        return Classification::NeedsRedirect;
    }

    if session.is_some() {
        return Classification::Authenticated;
    }

    match settings.unmatched {
        UnmatchedPolicy::Redirect => Classification::NeedsRedirect,
        UnmatchedPolicy::PassThrough => Classification::PassThrough,
    }
}

/// Find and decode the session evidence on a request
///
/// The cookie is checked first; in header-forward mode the session header is
/// also accepted. Undecodable values and tokens without an access token
/// count as no session.
pub fn extract_session(headers: &HeaderMap, settings: &OAuthSettings) -> Option<SessionToken> {
    let from_cookie = session_cookie(headers, &settings.cookie_name);
    let from_header = match settings.session_carriage {
        SessionCarriage::HeaderForward => headers
            .get(&settings.header_name)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned),
        SessionCarriage::Cookie => None,
    };

    from_cookie
        .into_iter()
        .chain(from_header)
        .filter(|value| !value.is_empty())
        .find_map(|value| match decode_session(&value) {
            Ok(token) if !token.access_token.is_empty() => Some(token),
            Ok(_) => {
                tracing::debug!("Ignoring session evidence without access token");
                None
            }
            Err(error) => {
                tracing::debug!(%error, "Ignoring undecodable session evidence");
                None
            }
        })
}

/// Raw value of the named cookie, without percent-decoding
fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_owned())
}
