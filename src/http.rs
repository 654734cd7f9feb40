//! Shared plumbing for the REST upstreams (Esplora, CKB Explorer, assets API)

use crate::error::{ResolveError, ResolveResult};
use crate::metrics;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Build an HTTP client with the per-call timeout every upstream carries
pub fn build_client(service: &str, timeout_ms: u64) -> ResolveResult<Client> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .user_agent(concat!("rgbpp-resolver/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ResolveError::Config(format!("{} client: {}", service, e)))
}

/// Classify a non-success status. `None` means 404, which callers map to
/// "absent" in whatever way fits their operation.
pub fn classify_status(service: &str, status: StatusCode, body: &str) -> Option<ResolveError> {
    if status == StatusCode::NOT_FOUND {
        return None;
    }
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(ResolveError::unavailable(service, message))
    } else {
        Some(ResolveError::protocol(service, message))
    }
}

/// Send a request and return the body text, `Ok(None)` on 404
pub async fn send_text(service: &str, request: RequestBuilder) -> ResolveResult<Option<String>> {
    let result = send_text_inner(service, request).await;
    metrics::record_upstream(service, &result);
    result
}

async fn send_text_inner(service: &str, request: RequestBuilder) -> ResolveResult<Option<String>> {
    let response = request
        .send()
        .await
        .map_err(|e| ResolveError::from_http(service, e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ResolveError::from_http(service, e))?;

    if status.is_success() {
        return Ok(Some(body));
    }
    match classify_status(service, status, &body) {
        None => Ok(None),
        Some(err) => Err(err),
    }
}

/// Send a request and decode a JSON body, `Ok(None)` on 404
pub async fn send_json<T: DeserializeOwned>(
    service: &str,
    request: RequestBuilder,
) -> ResolveResult<Option<T>> {
    match send_text(service, request).await? {
        Some(body) => decode(service, &body).map(Some),
        None => Ok(None),
    }
}

pub fn decode<T: DeserializeOwned>(service: &str, body: &str) -> ResolveResult<T> {
    serde_json::from_str(body).map_err(|e| ResolveError::protocol(service, e))
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
