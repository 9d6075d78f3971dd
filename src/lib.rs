//! oauth-gate - OAuth2 authorization code gate for HTTP services
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Host Router (Axum)                         │
//! │  - /health, /metrics (not gated)                            │
//! │  - everything else through the auth layer                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Auth Layer                              │
//! │  - classify: callback / redirect / authenticated / pass     │
//! │  - provider redirect and code exchange                      │
//! │  - session cookie or forwarded header                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Protected Backend                          │
//! │  - upstream proxy (reqwest) or placeholder                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `auth`: session codec, provider client, classifier, middleware
//! - `proxy`: upstream forwarding
//! - `config`: Configuration management
//! - `metrics`: Prometheus instruments
//! - `error`: Error types

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;

use std::sync::Arc;

use axum::{Router, middleware};
use url::Url;

/// Application state shared across all handlers
///
/// Cloned for each request; everything inside is read-only.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Auth layer state (validated settings and provider client)
    pub auth: auth::AuthState,

    /// HTTP client shared by the provider client and the upstream proxy
    pub http_client: reqwest::Client,

    /// Parsed `server.upstream`
    pub upstream: Option<Url>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Validate OAuth settings
    /// 2. Build the shared HTTP client
    /// 3. Build the provider client
    ///
    /// # Errors
    /// Returns `ConfigurationInvalid` if any setting is missing or malformed
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        config.validate()?;
        let settings = config.oauth.settings()?;

        let upstream = config
            .server
            .upstream
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| error::AppError::ConfigurationInvalid(format!("server.upstream: {e}")))?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("oauth-gate/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let provider = auth::OAuth2Client::new(settings.clone(), http_client.clone());
        let auth = auth::AuthState::new(settings, Arc::new(provider));

        tracing::info!(
            callback_path = %auth.settings.callback_path,
            auth_path = ?auth.settings.auth_path,
            session_carriage = ?auth.settings.session_carriage,
            unmatched = ?auth.settings.unmatched,
            upstream = ?upstream.as_ref().map(Url::as_str),
            "Application state initialized successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            auth,
            http_client,
            upstream,
        })
    }
}

/// Put the auth layer in front of every route of `router`
pub fn protect<S>(router: Router<S>, auth: auth::AuthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(auth, auth::require_oauth))
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> Router {
    use tower_http::trace::TraceLayer;

    let gated = protect(
        Router::new().fallback(proxy::forward),
        state.auth.clone(),
    )
    .with_state(state);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(metrics::metrics_router())
        .merge(gated)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK"
}
