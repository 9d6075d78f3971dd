//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use std::{borrow::Cow, fmt, path::Path, time::Duration};

use axum::http::HeaderName;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use url::Url;

use crate::error::AppError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Protected backend (e.g., "http://127.0.0.1:3000")
    ///
    /// Requests allowed through the gate are proxied here. When unset,
    /// a placeholder backend answers instead.
    pub upstream: Option<String>,
}

/// OAuth2 provider and session settings, as written in the config file
///
/// Required strings default to empty so a missing key surfaces as a
/// named `ConfigurationInvalid` error from [`OAuthConfig::settings`].
#[derive(Clone, Deserialize)]
pub struct OAuthConfig {
    /// Path that always starts the login flow
    pub auth_path: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Provider authorization endpoint
    #[serde(default)]
    pub auth_url: String,
    /// Provider token endpoint
    #[serde(default)]
    pub token_url: String,
    /// Callback URL registered with the provider
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default)]
    pub session_carriage: SessionCarriage,
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default = "default_exchange_timeout_seconds")]
    pub exchange_timeout_seconds: u64,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("auth_path", &self.auth_path)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_url", &self.redirect_url)
            .field("session_carriage", &self.session_carriage)
            .field("unmatched", &self.unmatched)
            .field("cookie_name", &self.cookie_name)
            .field("header_name", &self.header_name)
            .field("exchange_timeout_seconds", &self.exchange_timeout_seconds)
            .finish()
    }
}

/// How the session credential travels after a successful exchange
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionCarriage {
    /// Set a cookie on the client and redirect it to `/`
    #[default]
    Cookie,
    /// Attach the credential as a request header and forward downstream
    HeaderForward,
}

/// What to do with unauthenticated requests outside the callback and auth paths
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Send the client to the provider
    #[default]
    Redirect,
    /// Let the request through untouched
    PassThrough,
}

fn default_cookie_name() -> String {
    "COOKIEDATA".to_string()
}

fn default_header_name() -> String {
    "oauth2-token".to_string()
}

fn default_exchange_timeout_seconds() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> String {
        format!("oauth_gate={},tower_http=debug", self.level.trim())
    }

    /// Whether logs should be emitted as JSON
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Validated OAuth settings
///
/// Built once from [`OAuthConfig`] and shared read-only between requests.
#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: Url,
    /// Path component of `redirect_url`
    pub callback_path: String,
    /// Path component of `auth_path`, if configured
    pub auth_path: Option<String>,
    pub session_carriage: SessionCarriage,
    pub unmatched: UnmatchedPolicy,
    pub cookie_name: String,
    pub header_name: HeaderName,
    pub exchange_timeout: Duration,
}

impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("auth_url", &self.auth_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("redirect_url", &self.redirect_url.as_str())
            .field("callback_path", &self.callback_path)
            .field("auth_path", &self.auth_path)
            .field("session_carriage", &self.session_carriage)
            .field("unmatched", &self.unmatched)
            .field("cookie_name", &self.cookie_name)
            .field("header_name", &self.header_name)
            .field("exchange_timeout", &self.exchange_timeout)
            .finish()
    }
}

impl OAuthConfig {
    /// Validate and convert into [`OAuthSettings`]
    ///
    /// # Errors
    /// Returns `ConfigurationInvalid` naming the first offending key
    pub fn settings(&self) -> Result<OAuthSettings, AppError> {
        let client_id = required("oauth.client_id", &self.client_id)?;
        let client_secret = required("oauth.client_secret", &self.client_secret)?;
        let auth_url = absolute_url("oauth.auth_url", &self.auth_url)?;
        let token_url = absolute_url("oauth.token_url", &self.token_url)?;
        let redirect_url = absolute_url("oauth.redirect_url", &self.redirect_url)?;

        let callback_path = decode_path(redirect_url.path()).into_owned();
        if callback_path.is_empty() || callback_path == "/" {
            return Err(AppError::ConfigurationInvalid(
                "oauth.redirect_url must have a non-root path".to_string(),
            ));
        }

        let auth_path = self
            .auth_path
            .as_deref()
            .map(|raw| path_component("oauth.auth_path", raw))
            .transpose()?;

        let cookie_name = required("oauth.cookie_name", &self.cookie_name)?;
        if cookie_name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '=' | ';' | ','))
        {
            return Err(AppError::ConfigurationInvalid(
                "oauth.cookie_name contains characters not allowed in a cookie name".to_string(),
            ));
        }

        let header_name = HeaderName::from_bytes(
            required("oauth.header_name", &self.header_name)?.as_bytes(),
        )
        .map_err(|e| AppError::ConfigurationInvalid(format!("oauth.header_name: {e}")))?;

        if self.exchange_timeout_seconds == 0 {
            return Err(AppError::ConfigurationInvalid(
                "oauth.exchange_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(OAuthSettings {
            client_id,
            client_secret,
            auth_url,
            token_url,
            redirect_url,
            callback_path,
            auth_path,
            session_carriage: self.session_carriage,
            unmatched: self.unmatched,
            cookie_name,
            header_name,
            exchange_timeout: Duration::from_secs(self.exchange_timeout_seconds),
        })
    }
}

fn required(key: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::ConfigurationInvalid(format!(
            "{key} is required and must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn absolute_url(key: &str, value: &str) -> Result<Url, AppError> {
    let raw = required(key, value)?;
    let url = Url::parse(&raw)
        .map_err(|e| AppError::ConfigurationInvalid(format!("{key} is not a valid URL: {e}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(AppError::ConfigurationInvalid(format!(
            "{key} must be an absolute URL with a host"
        )));
    }
    Ok(url)
}

/// Accepts either a bare path ("/login") or an absolute URL and keeps the path
fn path_component(key: &str, value: &str) -> Result<String, AppError> {
    let raw = required(key, value)?;
    let base = Url::parse("http://localhost/").map_err(|e| AppError::Internal(e.into()))?;
    let url = base
        .join(&raw)
        .map_err(|e| AppError::ConfigurationInvalid(format!("{key} is not a valid path: {e}")))?;
    Ok(decode_path(url.path()).into_owned())
}

/// Percent-decode a URL path for comparison
///
/// Paths that do not decode to UTF-8 are kept as-is.
pub(crate) fn decode_path(path: &str) -> Cow<'_, str> {
    urlencoding::decode(path).unwrap_or(Cow::Borrowed(path))
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (OAUTH_GATE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        let config = Self::builder_with_defaults()?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (OAUTH_GATE__*)
            .add_source(
                Environment::with_prefix("OAUTH_GATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config)
    }

    /// Load configuration from a single explicit file on top of the defaults
    ///
    /// # Errors
    /// Returns error if the file is missing or the configuration is invalid
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let config = Self::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?;

        Self::finish(config)
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, AppError> {
        Ok(Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?)
    }

    fn finish(config: Config) -> Result<Self, AppError> {
        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Check every setting the gate depends on before serving requests
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(upstream) = &self.server.upstream {
            let url = absolute_url("server.upstream", upstream)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(AppError::ConfigurationInvalid(
                    "server.upstream must use http or https".to_string(),
                ));
            }
        }

        let settings = self.oauth.settings()?;

        if settings.unmatched == UnmatchedPolicy::PassThrough && settings.auth_path.is_none() {
            tracing::warn!(
                "oauth.unmatched=pass_through without oauth.auth_path: no request can start the login flow"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_oauth() -> OAuthConfig {
        OAuthConfig {
            auth_path: None,
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            auth_url: "http://idp.test/authorize".to_string(),
            token_url: "http://idp.test/token".to_string(),
            redirect_url: "http://svc.test/callback".to_string(),
            session_carriage: SessionCarriage::Cookie,
            unmatched: UnmatchedPolicy::Redirect,
            cookie_name: default_cookie_name(),
            header_name: default_header_name(),
            exchange_timeout_seconds: 30,
        }
    }

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                upstream: None,
            },
            oauth: valid_oauth(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn settings_extracts_callback_path() {
        let settings = valid_oauth().settings().expect("valid settings");
        assert_eq!(settings.callback_path, "/callback");
        assert_eq!(settings.auth_path, None);
        assert_eq!(settings.cookie_name, "COOKIEDATA");
        assert_eq!(settings.header_name.as_str(), "oauth2-token");
    }

    #[test]
    fn settings_rejects_each_missing_required_field() {
        let cases: [(&str, fn(&mut OAuthConfig)); 5] = [
            ("oauth.client_id", |c| c.client_id.clear()),
            ("oauth.client_secret", |c| c.client_secret = "  ".to_string()),
            ("oauth.auth_url", |c| c.auth_url.clear()),
            ("oauth.token_url", |c| c.token_url.clear()),
            ("oauth.redirect_url", |c| c.redirect_url.clear()),
        ];

        for (key, clear) in cases {
            let mut oauth = valid_oauth();
            clear(&mut oauth);
            let error = oauth.settings().expect_err("missing field must fail");
            assert!(
                matches!(&error, AppError::ConfigurationInvalid(message) if message.contains(key)),
                "unexpected error for {key}: {error}"
            );
        }
    }

    #[test]
    fn settings_rejects_relative_and_root_redirect_url() {
        let mut oauth = valid_oauth();
        oauth.redirect_url = "/callback".to_string();
        assert!(matches!(
            oauth.settings(),
            Err(AppError::ConfigurationInvalid(message)) if message.contains("oauth.redirect_url")
        ));

        oauth.redirect_url = "http://svc.test".to_string();
        assert!(matches!(
            oauth.settings(),
            Err(AppError::ConfigurationInvalid(message)) if message.contains("non-root path")
        ));
    }

    #[test]
    fn logging_config_drives_filter_and_format() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "JSON".to_string(),
        };
        assert_eq!(logging.filter_directive(), "oauth_gate=debug,tower_http=debug");
        assert!(logging.is_json());

        let config = valid_config();
        assert_eq!(config.logging.filter_directive(), "oauth_gate=info,tower_http=debug");
        assert!(!config.logging.is_json());
    }

    #[test]
    fn configured_paths_are_stored_decoded() {
        let mut oauth = valid_oauth();
        oauth.redirect_url = "http://svc.test/oauth%20cb".to_string();
        oauth.auth_path = Some("/sign%2Din".to_string());

        let settings = oauth.settings().unwrap();
        assert_eq!(settings.callback_path, "/oauth cb");
        assert_eq!(settings.auth_path.as_deref(), Some("/sign-in"));
    }

    #[test]
    fn auth_path_accepts_bare_path_or_absolute_url() {
        let mut oauth = valid_oauth();
        oauth.auth_path = Some("/login".to_string());
        assert_eq!(oauth.settings().unwrap().auth_path.as_deref(), Some("/login"));

        oauth.auth_path = Some("http://svc.test/auth/start?next=/".to_string());
        assert_eq!(
            oauth.settings().unwrap().auth_path.as_deref(),
            Some("/auth/start")
        );

        oauth.auth_path = Some(String::new());
        assert!(oauth.settings().is_err());
    }

    #[test]
    fn settings_rejects_invalid_header_and_cookie_names() {
        let mut oauth = valid_oauth();
        oauth.header_name = "not a header".to_string();
        assert!(oauth.settings().is_err());

        let mut oauth = valid_oauth();
        oauth.cookie_name = "COOKIE;DATA".to_string();
        assert!(oauth.settings().is_err());
    }

    #[test]
    fn settings_debug_redacts_client_secret() {
        let settings = valid_oauth().settings().unwrap();
        let rendered = format!("{settings:?} {:?}", valid_oauth());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("[redacted]"));
    }

    #[test]
    fn validate_rejects_non_http_upstream() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        config.server.upstream = Some("ftp://files.test/".to_string());
        let error = config.validate().expect_err("ftp upstream must fail");
        assert!(matches!(
            error,
            AppError::ConfigurationInvalid(message) if message.contains("server.upstream")
        ));
    }

    #[test]
    fn load_from_reads_toml_and_applies_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        write!(
            file,
            r#"
[oauth]
client_id = "cid"
client_secret = "secret"
auth_url = "http://idp.test/authorize"
token_url = "http://idp.test/token"
redirect_url = "http://svc.test/callback"
session_carriage = "header_forward"
unmatched = "pass_through"
auth_path = "/login"
"#
        )
        .expect("write config");

        let config = AppConfig::load_from(file.path()).expect("config loads");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.oauth.session_carriage, SessionCarriage::HeaderForward);
        assert_eq!(config.oauth.unmatched, UnmatchedPolicy::PassThrough);
        assert_eq!(config.oauth.cookie_name, "COOKIEDATA");
        assert_eq!(config.oauth.exchange_timeout_seconds, 30);
    }

    #[test]
    fn load_from_fails_fast_on_missing_secret() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        write!(
            file,
            r#"
[oauth]
client_id = "cid"
auth_url = "http://idp.test/authorize"
token_url = "http://idp.test/token"
redirect_url = "http://svc.test/callback"
"#
        )
        .expect("write config");

        let error = AppConfig::load_from(file.path()).expect_err("missing secret must fail");
        assert!(matches!(
            error,
            AppError::ConfigurationInvalid(message) if message.contains("oauth.client_secret")
        ));
    }
}
