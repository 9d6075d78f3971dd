//! Authentication middleware
//!
//! Runs the authorization code flow in front of protected routes.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{HeaderValue, Request, StatusCode, Uri, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::Cookie;
use serde::Deserialize;

use super::classifier::{Classification, classify, extract_session};
use super::provider::ProviderClient;
use super::session::{SessionToken, encode_session};
use crate::config::{OAuthSettings, SessionCarriage};
use crate::error::AppError;
use crate::metrics::{AUTH_DECISIONS_TOTAL, TOKEN_EXCHANGES_TOTAL};

/// `state` parameter sent to the provider
///
/// Constant and never verified on callback.
pub const AUTHORIZATION_STATE: &str = "state";

/// Where the client lands after a cookie-mode callback
const POST_LOGIN_LOCATION: &str = "/";

/// Shared, read-only state of the auth layer
#[derive(Clone)]
pub struct AuthState {
    pub settings: Arc<OAuthSettings>,
    pub provider: Arc<dyn ProviderClient>,
}

impl AuthState {
    pub fn new(settings: OAuthSettings, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            settings: Arc::new(settings),
            provider,
        }
    }
}

/// Query parameters the provider sends to the callback path
#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
}

/// Middleware enforcing OAuth2 login
///
/// Every request ends in exactly one of: a redirect, the next handler's
/// response, or an error.
///
/// # Usage
/// ```ignore
/// let protected = Router::new()
///     .route("/...", ...)
///     .layer(middleware::from_fn_with_state(auth_state, require_oauth));
/// ```
pub async fn require_oauth(
    State(state): State<AuthState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let settings = &state.settings;
    let session = extract_session(request.headers(), settings);
    // Only the gate may set the session header seen downstream
    request.headers_mut().remove(&settings.header_name);
    let decision = classify(request.uri().path(), session.as_ref(), settings);

    AUTH_DECISIONS_TOTAL
        .with_label_values(&[decision.as_str()])
        .inc();
    tracing::debug!(
        path = %request.uri().path(),
        decision = decision.as_str(),
        "Classified request"
    );

    match decision {
        Classification::NeedsRedirect => {
            let url = state.provider.authorization_url(AUTHORIZATION_STATE);
            Ok(Redirect::temporary(url.as_str()).into_response())
        }
        Classification::NeedsCallback => {
            let code = callback_code(request.uri())?;
            let token = exchange_code(&state, &code).await?;
            let encoded = encode_session(&token)?;

            match settings.session_carriage {
                SessionCarriage::Cookie => {
                    let cookie = session_cookie(&settings.cookie_name, encoded, &token)?;
                    Ok((
                        StatusCode::FOUND,
                        [
                            (header::SET_COOKIE, cookie),
                            (header::LOCATION, HeaderValue::from_static(POST_LOGIN_LOCATION)),
                        ],
                    )
                        .into_response())
                }
                SessionCarriage::HeaderForward => {
                    attach_session(&mut request, settings, &encoded)?;
                    request.extensions_mut().insert(token);
                    Ok(next.run(request).await)
                }
            }
        }
        Classification::Authenticated => {
            if let Some(token) = session {
                if settings.session_carriage == SessionCarriage::HeaderForward {
                    let encoded = encode_session(&token)?;
                    attach_session(&mut request, settings, &encoded)?;
                }
                request.extensions_mut().insert(token);
            }
            Ok(next.run(request).await)
        }
        Classification::PassThrough => Ok(next.run(request).await),
    }
}

/// Read the authorization code from the callback query
///
/// A provider `error` parameter or a missing code fails without contacting
/// the provider.
fn callback_code(uri: &Uri) -> Result<String, AppError> {
    let Query(query) = Query::<CallbackQuery>::try_from_uri(uri)
        .map_err(|e| AppError::ExchangeFailed(format!("invalid callback query: {e}")))?;

    if let Some(error) = query.error {
        TOKEN_EXCHANGES_TOTAL
            .with_label_values(&["provider_error"])
            .inc();
        return Err(AppError::ExchangeFailed(format!(
            "provider returned error on callback: {error}"
        )));
    }

    query.code.filter(|code| !code.is_empty()).ok_or_else(|| {
        TOKEN_EXCHANGES_TOTAL
            .with_label_values(&["missing_code"])
            .inc();
        AppError::ExchangeFailed("callback without authorization code".to_string())
    })
}

/// Trade an authorization code for a token
async fn exchange_code(state: &AuthState, code: &str) -> Result<SessionToken, AppError> {
    match state.provider.exchange_code(code).await {
        Ok(token) => {
            TOKEN_EXCHANGES_TOTAL.with_label_values(&["success"]).inc();
            tracing::info!(
                token_type = %token.token_type,
                expiry = ?token.expiry,
                "Authorization code exchanged"
            );
            Ok(token)
        }
        Err(error) => {
            TOKEN_EXCHANGES_TOTAL.with_label_values(&["failure"]).inc();
            Err(error)
        }
    }
}

/// Build the `Set-Cookie` value for a new session
///
/// `Path=/`, and `Expires` mirrors the token expiry when the provider gave one.
/// Expiries beyond what a cookie date can express are capped at the last
/// representable second.
fn session_cookie(
    name: &str,
    encoded: String,
    token: &SessionToken,
) -> Result<HeaderValue, AppError> {
    let mut cookie = Cookie::build((name.to_owned(), encoded)).path("/").build();

    if let Some(expiry) = token.expiry {
        let expires = time::OffsetDateTime::from_unix_timestamp(expiry.timestamp())
            .unwrap_or_else(|_| time::PrimitiveDateTime::MAX.assume_utc());
        cookie.set_expires(expires);
    }

    HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| AppError::SerializationFailed(format!("cookie header: {e}")))
}

/// Set the session header on a request that continues downstream
fn attach_session<B>(
    request: &mut Request<B>,
    settings: &OAuthSettings,
    encoded: &str,
) -> Result<(), AppError> {
    let value = HeaderValue::from_str(encoded)
        .map_err(|e| AppError::SerializationFailed(format!("session header: {e}")))?;
    request
        .headers_mut()
        .insert(settings.header_name.clone(), value);
    Ok(())
}

/// Extractor for the session established by [`require_oauth`]
///
/// Use in handlers behind the auth layer.
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentSession(token): CurrentSession) -> impl IntoResponse {
///     format!("token type {}", token.token_type)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentSession(pub SessionToken);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionToken>()
            .cloned()
            .map(CurrentSession)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Optional session extractor
///
/// Returns None for passed-through requests instead of rejecting them.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<SessionToken>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeSession(parts.extensions.get::<SessionToken>().cloned()))
    }
}
