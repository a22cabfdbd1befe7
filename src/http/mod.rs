use crate::config::Config;
use base64::Engine; // for URL_SAFE_NO_PAD.encode/decode
use log::warn;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate-limit metadata extracted from REST headers or the GraphQL
/// `rateLimit` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateMeta {
    pub remaining: Option<i32>,
    pub used: Option<i32>,
    pub reset_at: Option<String>,
}

/// Classified upstream failure. `retriable` is advisory for callers; the
/// polling engine never retries these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

impl ApiError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            code: "upstream_error".into(),
            message: message.into(),
            retriable: true,
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            code: "server_error".into(),
            message: message.into(),
            retriable: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found".into(),
            message: message.into(),
            retriable: false,
        }
    }
}

/// Successful REST response plus the metadata handlers care about.
#[derive(Debug, Clone)]
pub struct RestOk<T> {
    pub value: T,
    pub rate: Option<RateMeta>,
    pub headers: HeaderMap,
}

const MAX_ATTEMPTS: u32 = 5;

pub fn build_client(cfg: &Config) -> reqwest::Result<Client> {
    let mut default_headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&cfg.user_agent) {
        default_headers.insert(USER_AGENT, ua);
    }
    // Authorization header is injected per request to allow token rotation later.
    Client::builder()
        .default_headers(default_headers)
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls()
        .build()
}

fn auth_header(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {}", token)).ok()
}

pub fn map_status_to_error(status: StatusCode, message: String) -> ApiError {
    let (code, retriable) = match status {
        StatusCode::BAD_REQUEST => ("bad_request", false),
        StatusCode::UNAUTHORIZED => ("unauthorized", false),
        StatusCode::FORBIDDEN => ("forbidden", false),
        StatusCode::NOT_FOUND => ("not_found", false),
        StatusCode::CONFLICT => ("conflict", false),
        StatusCode::TOO_MANY_REQUESTS => ("rate_limited", true),
        s if s.is_server_error() => ("upstream_error", true),
        _ => ("server_error", false),
    };
    ApiError {
        code: code.to_string(),
        message,
        retriable,
    }
}

pub fn extract_rate_from_rest(headers: &HeaderMap) -> RateMeta {
    let header_i32 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i32>().ok())
    };
    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|epoch| chrono::DateTime::<chrono::Utc>::from_timestamp(epoch, 0))
        .map(|dt| dt.to_rfc3339());
    RateMeta {
        remaining: header_i32("x-ratelimit-remaining"),
        used: header_i32("x-ratelimit-used"),
        reset_at,
    }
}

fn compute_backoff(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d;
    }
    // Exponential backoff with jitter: base 200ms * 2^attempt, max 5s.
    let base = 200u64.saturating_mul(1u64 << attempt.min(5));
    let max = 5_000u64.min(base);
    let jitter = fastrand::u64(0..=max / 2);
    Duration::from_millis(max / 2 + jitter)
}

fn retry_after_from(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub async fn rest_get_json<T: DeserializeOwned>(
    client: &Client,
    cfg: &Config,
    path: &str,
) -> Result<RestOk<T>, ApiError> {
    let raw = rest_get_raw(client, cfg, path, "application/vnd.github+json").await?;
    match serde_json::from_str::<T>(&raw.value) {
        Ok(value) => Ok(RestOk {
            value,
            rate: raw.rate,
            headers: raw.headers,
        }),
        Err(e) => Err(ApiError::server(e.to_string())),
    }
}

async fn rest_get_raw(
    client: &Client,
    cfg: &Config,
    path: &str,
    accept: &str,
) -> Result<RestOk<String>, ApiError> {
    let url = format!("{}{}", cfg.api_url, path);
    let accept = HeaderValue::from_str(accept)
        .map_err(|e| ApiError::server(format!("invalid accept header: {}", e)))?;
    let auth = auth_header(&cfg.token)
        .ok_or_else(|| ApiError::server("token is not a valid header value"))?;
    let mut attempt: u32 = 0;
    loop {
        let res = client
            .get(&url)
            .header(AUTHORIZATION, auth.clone())
            .header("X-GitHub-Api-Version", &cfg.api_version)
            .header(ACCEPT, accept.clone())
            .send()
            .await;

        let res = match res {
            Ok(r) => r,
            Err(e) => {
                if attempt < MAX_ATTEMPTS {
                    warn!("REST GET {} send error, retrying: {}", url, e);
                    tokio::time::sleep(compute_backoff(attempt, None)).await;
                    attempt += 1;
                    continue;
                }
                return Err(ApiError::upstream(e.to_string()));
            }
        };

        let status = res.status();
        let headers = res.headers().clone();
        let rate = extract_rate_from_rest(&headers);
        let retry_after = retry_after_from(&headers);
        let text = res.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(RestOk {
                value: text,
                rate: Some(rate),
                headers,
            });
        }
        if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
            && attempt < MAX_ATTEMPTS
        {
            let backoff = compute_backoff(attempt, retry_after);
            warn!(
                "REST GET {} retrying (status {}), backoff {:?}",
                url, status, backoff
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
            continue;
        }
        return Err(map_status_to_error(status, text));
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>, // standard GraphQL errors
}

#[derive(Debug, Clone, Deserialize)]
struct GraphQlError {
    message: String,
}

pub async fn graphql_post<V: Serialize, T: DeserializeOwned>(
    client: &Client,
    cfg: &Config,
    query: &str,
    variables: &V,
) -> Result<(T, Option<RateMeta>), ApiError> {
    let auth = auth_header(&cfg.token)
        .ok_or_else(|| ApiError::server("token is not a valid header value"))?;
    let body = serde_json::json!({ "query": query, "variables": variables });
    let mut attempt: u32 = 0;
    loop {
        let res = client
            .post(&cfg.graphql_url)
            .header(AUTHORIZATION, auth.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&body)
            .send()
            .await;

        let res = match res {
            Ok(r) => r,
            Err(e) => {
                if attempt < MAX_ATTEMPTS {
                    warn!("GraphQL POST send error, retrying: {}", e);
                    tokio::time::sleep(compute_backoff(attempt, None)).await;
                    attempt += 1;
                    continue;
                }
                return Err(ApiError::upstream(e.to_string()));
            }
        };

        let status = res.status();
        let retry_after = retry_after_from(res.headers());
        let text = res.text().await.unwrap_or_default();

        if status.is_success() {
            // Parse as a raw value first to pull rateLimit out of whatever shape
            // the query selected, then as the typed envelope.
            let v: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| ApiError::server(e.to_string()))?;
            let envelope: GraphQlEnvelope<T> =
                serde_json::from_value(v.clone()).map_err(|e| ApiError::server(e.to_string()))?;
            if let Some(errors) = envelope.errors {
                let msg = errors
                    .iter()
                    .map(|e| e.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ApiError::upstream(msg));
            }
            let data = envelope
                .data
                .ok_or_else(|| ApiError::server("GraphQL response had no data"))?;
            let rate = v
                .get("data")
                .and_then(|d| d.get("rateLimit"))
                .map(|rl| RateMeta {
                    remaining: rl
                        .get("remaining")
                        .and_then(|x| x.as_i64())
                        .map(|x| x as i32),
                    used: rl.get("used").and_then(|x| x.as_i64()).map(|x| x as i32),
                    reset_at: rl
                        .get("resetAt")
                        .and_then(|x| x.as_str())
                        .map(|s| s.to_string()),
                });
            return Ok((data, rate));
        }

        if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
            && attempt < MAX_ATTEMPTS
        {
            tokio::time::sleep(compute_backoff(attempt, retry_after)).await;
            attempt += 1;
            continue;
        }
        return Err(map_status_to_error(status, text));
    }
}

pub fn has_next_page_from_link(headers: &HeaderMap) -> bool {
    if let Some(link) = headers.get("link").and_then(|v| v.to_str().ok()) {
        // Simple check for rel="next"
        return link.contains("rel=\"next\"");
    }
    false
}

/// Percent-encode a value destined for a URL path segment.
pub fn encode_path_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

// REST opaque cursor codec: base64(JSON { page, per_page })
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestCursor {
    pub page: u32,
    pub per_page: u32,
}

pub fn encode_rest_cursor(c: &RestCursor) -> String {
    let bytes = serde_json::to_vec(c).unwrap_or_default();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_rest_cursor(s: &str) -> Option<RestCursor> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
