//! Shared HTTP plumbing for webhook-style adapters.
//!
//! One `reqwest::Client` is built per process and cloned into every HTTP adapter,
//! so connections and TLS sessions are pooled across requests and rounds.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, Url};
use serde::Serialize;

use crate::SendResult;

/// Maximum response-body excerpt kept in an attempt's error text.
const ERROR_BODY_LIMIT: usize = 256;

/// Build the process-wide pooled HTTP client.
pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(5))
        .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Parse an endpoint address, accepting only absolute http(s) URLs.
pub fn parse_endpoint(address: &str) -> Result<Url, String> {
    let url = Url::parse(address).map_err(|e| format!("malformed URL '{address}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported URL scheme '{other}' in '{address}'")),
    }
}

/// Map an HTTP status to a delivery classification.
///
/// 2xx succeeds; 408, 429 and 5xx are retryable; any other 4xx is a permanent
/// rejection of this message or address.
pub fn classify_status(status: StatusCode, body: &str, duration: Duration) -> SendResult {
    if status.is_success() {
        return SendResult::success(duration);
    }

    let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let error = if excerpt.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {excerpt}")
    };

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        SendResult::failed(error, duration)
    } else {
        SendResult::invalid(error, duration)
    }
}

/// Map a transport error to a delivery classification.
pub fn classify_error(err: &reqwest::Error, duration: Duration) -> SendResult {
    if err.is_timeout() {
        SendResult::timeout(format!("request timed out: {err}"), duration)
    } else if err.is_builder() {
        SendResult::invalid(format!("invalid request: {err}"), duration)
    } else {
        SendResult::failed(format!("transport error: {err}"), duration)
    }
}

/// POST `payload` as JSON and classify the response. Exactly one request is made.
pub async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: Url,
    bearer: Option<&str>,
    payload: &T,
    timeout: Duration,
) -> SendResult {
    let started = Instant::now();

    let mut request = client.post(url).json(payload).timeout(timeout);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let body = if status.is_success() {
                String::new()
            } else {
                response.text().await.unwrap_or_default()
            };
            classify_status(status, &body, started.elapsed())
        }
        Err(e) => classify_error(&e, started.elapsed()),
    }
}
