//! Upstream forwarding
//!
//! Requests the gate lets through are replayed against the configured
//! upstream with reqwest, and the upstream response is relayed back.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, header},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::AppState;
use crate::error::AppError;

/// Largest request body forwarded upstream (10 MiB)
const MAX_FORWARDED_BODY: usize = 10 * 1024 * 1024;

/// Connection-scoped headers that must not be forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Copy headers, dropping hop-by-hop ones and those named in `Connection`
fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(*name))
        .filter(|(name, _)| !connection_listed.iter().any(|listed| listed == name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Target URL for a request: upstream base joined with path and query
fn upstream_url(base: &Url, request: &Request) -> Url {
    let mut url = base.clone();
    let base_path = base.path().trim_end_matches('/');
    url.set_path(&format!("{base_path}{}", request.uri().path()));
    url.set_query(request.uri().query());
    url
}

/// Fallback handler forwarding to `server.upstream`
///
/// Without an upstream configured, answers with a short placeholder.
pub async fn forward(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let Some(upstream) = state.upstream.as_ref() else {
        return Ok("oauth-gate: authenticated, no upstream configured".into_response());
    };

    let target = upstream_url(upstream, &request);
    let method = request.method().clone();
    let mut headers = end_to_end_headers(request.headers());
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let body = axum::body::to_bytes(request.into_body(), MAX_FORWARDED_BODY)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("reading request body: {e}")))?;

    tracing::debug!(%method, target = %target.path(), "Forwarding upstream");

    let upstream_response = state
        .http_client
        .request(method, target)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream_response.status();
    let mut response_headers = end_to_end_headers(upstream_response.headers());
    response_headers.remove(header::CONTENT_LENGTH);
    let bytes = upstream_response.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
