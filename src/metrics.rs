//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::get,
};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Classification outcome per request
    pub static ref AUTH_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("oauth_gate_auth_decisions_total", "Total number of authentication decisions"),
        &["decision"]
    ).expect("metric can be created");

    /// Authorization code exchanges against the provider
    pub static ref TOKEN_EXCHANGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("oauth_gate_token_exchanges_total", "Total number of authorization code exchanges"),
        &["outcome"]
    ).expect("metric can be created");

    /// Errors rendered into responses
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("oauth_gate_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Register all instruments with the global registry
///
/// Safe to call more than once; duplicate registrations are ignored.
pub fn init_metrics() {
    for collector in [
        AUTH_DECISIONS_TOTAL.clone(),
        TOKEN_EXCHANGES_TOTAL.clone(),
        ERRORS_TOTAL.clone(),
    ] {
        if let Err(error) = REGISTRY.register(Box::new(collector)) {
            tracing::debug!(%error, "Metric already registered");
        }
    }
}

/// GET /metrics
///
/// Returns all registered metrics in the Prometheus text format.
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, encoder.format_type())],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}

/// Create metrics router
///
/// Exposes the `/metrics` endpoint outside the authentication layer.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}
