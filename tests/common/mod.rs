//! Common test utilities for E2E tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    Form, Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use oauth_gate::{
    AppState,
    auth::{SessionToken, encode_session},
    config::{self, SessionCarriage, UnmatchedPolicy},
};
use tokio::net::TcpListener;

/// Code the fake provider accepts and answers with JSON
pub const GOOD_CODE: &str = "abc123";
/// Code the fake provider accepts and answers form-encoded
pub const FORM_CODE: &str = "form-code";
/// Code the fake provider sits on for [`SLOW_TOKEN_DELAY`] before answering
pub const SLOW_CODE: &str = "slow-code";
/// How long the fake provider stalls on [`SLOW_CODE`]
pub const SLOW_TOKEN_DELAY: std::time::Duration = std::time::Duration::from_secs(5);
/// Lifetime the fake provider grants, in seconds
pub const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Form bodies received by the fake token endpoint
pub type ExchangeLog = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// Knobs for the gate under test
#[derive(Debug, Clone, Default)]
pub struct GateOptions {
    pub session_carriage: SessionCarriage,
    pub unmatched: UnmatchedPolicy,
    pub auth_path: Option<String>,
    pub with_upstream: bool,
    /// Exchange deadline; 5 seconds when unset
    pub exchange_timeout_seconds: Option<u64>,
}

/// Gate instance wired to a fake provider (and optionally an echo upstream)
pub struct TestServer {
    pub addr: String,
    pub provider_addr: String,
    pub state: AppState,
    pub exchanges: ExchangeLog,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Gate with default options: cookie carriage, redirect unmatched, no upstream
    pub async fn new() -> Self {
        Self::with_options(GateOptions::default()).await
    }

    pub async fn with_options(options: GateOptions) -> Self {
        let exchanges = ExchangeLog::default();
        let provider_addr = spawn(fake_provider(exchanges.clone())).await;

        let upstream = if options.with_upstream {
            Some(spawn(Router::new().fallback(echo)).await)
        } else {
            None
        };

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                upstream,
            },
            oauth: config::OAuthConfig {
                auth_path: options.auth_path,
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                auth_url: format!("{provider_addr}/authorize"),
                token_url: format!("{provider_addr}/token"),
                redirect_url: "http://svc.test/callback".to_string(),
                session_carriage: options.session_carriage,
                unmatched: options.unmatched,
                cookie_name: "COOKIEDATA".to_string(),
                header_name: "oauth2-token".to_string(),
                exchange_timeout_seconds: options.exchange_timeout_seconds.unwrap_or(5),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let state = AppState::new(config).expect("valid test configuration");
        let addr = spawn(oauth_gate::build_router(state.clone())).await;

        Self {
            addr,
            provider_addr,
            state,
            exchanges,
            client: no_redirect_client(),
        }
    }

    /// Get base URL for gate requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Cookie header carrying a validly encoded session
    pub fn session_cookie(token: &SessionToken) -> String {
        format!(
            "COOKIEDATA={}",
            encode_session(token).expect("token encodes")
        )
    }
}

/// A token as the gate would have issued it
pub fn sample_token() -> SessionToken {
    SessionToken {
        access_token: "tok".to_string(),
        token_type: "Bearer".to_string(),
        refresh_token: None,
        expiry: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
    }
}

/// Client that reports redirects instead of following them
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build no-redirect client")
}

/// Serve `app` on a random local port and return its base URL
async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Token endpoint of a fake OAuth2 provider
fn fake_provider(exchanges: ExchangeLog) -> Router {
    Router::new()
        .route("/token", post(token_endpoint))
        .with_state(exchanges)
}

async fn token_endpoint(
    State(exchanges): State<ExchangeLog>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    exchanges.lock().unwrap().push(form.clone());

    if form.get("code").map(String::as_str) == Some(SLOW_CODE) {
        tokio::time::sleep(SLOW_TOKEN_DELAY).await;
    }

    match form.get("code").map(String::as_str) {
        Some(GOOD_CODE) => Json(serde_json::json!({
            "access_token": "tok",
            "token_type": "Bearer",
            "expires_in": TOKEN_LIFETIME_SECS,
        }))
        .into_response(),
        Some(FORM_CODE) => (
            [(header::CONTENT_TYPE, "application/x-www-form-urlencoded")],
            format!("access_token=form-tok&token_type=bearer&expires_in={TOKEN_LIFETIME_SECS}"),
        )
            .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "provider-internal-detail",
            })),
        )
            .into_response(),
    }
}

/// Upstream that describes the request it received
async fn echo(request: Request) -> String {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };

    format!(
        "{} {} token-header={} connection={}",
        request.method(),
        request.uri(),
        header("oauth2-token"),
        header("connection"),
    )
}
