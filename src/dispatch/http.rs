//! Shared plumbing for the JSON-over-HTTP adapters: config lookups that every
//! vendor needs, and one `send` that turns transport and status failures
//! into `ProviderError`.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use crate::config::ProviderConfig;
use crate::error::{ErrorCode, ProviderError};
use crate::extract::first_string_by_paths;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Longest slice of a vendor error body quoted in an error message.
const MAX_ERROR_SNIPPET: usize = 300;

pub const DEFAULT_REQUEST_ID_PATHS: &[&str] = &["request_id", "requestId", "id"];

const VENDOR_MESSAGE_PATHS: &[&str] = &[
    "error.message",
    "message",
    "msg",
    "detail",
    "error",
    "errors.message",
];

pub fn require_transport(
    provider: &str,
    transport: Option<Arc<dyn Transport>>,
) -> Result<Arc<dyn Transport>, ProviderError> {
    transport.ok_or_else(|| ProviderError::fetch_missing(provider))
}

/// Config string that must be present; absent means the provider cannot
/// be built.
pub fn require_string(
    config: &ProviderConfig,
    keys: &[&str],
    provider: &str,
) -> Result<String, ProviderError> {
    config.string(keys).ok_or_else(|| {
        ProviderError::config_invalid(format!("provider {provider} is missing {}", keys[0]))
    })
}

/// Config value, else the first non-empty environment variable.
pub fn string_or_env(config: &ProviderConfig, keys: &[&str], env_keys: &[&str]) -> Option<String> {
    config.string(keys).or_else(|| {
        env_keys.iter().find_map(|key| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    })
}

pub fn request_timeout(config: &ProviderConfig, default_ms: u64) -> Duration {
    Duration::from_millis(
        config
            .positive_ms(&["timeoutMs", "timeout_ms"])
            .unwrap_or(default_ms),
    )
}

/// `extra_body` merged with `extraBody`, camelCase winning.
pub fn extra_body(config: &ProviderConfig) -> Map<String, Value> {
    config.object(&["extra_body", "extraBody"])
}

pub fn configured_headers(config: &ProviderConfig) -> IndexMap<String, String> {
    config.string_map(&["headers"])
}

pub fn response_url_paths(config: &ProviderConfig, defaults: &[&str]) -> Vec<String> {
    paths_or_default(config, &["responseUrlPaths", "response_url_paths"], defaults)
}

pub fn request_id_paths(config: &ProviderConfig) -> Vec<String> {
    paths_or_default(
        config,
        &["requestIdPaths", "request_id_paths"],
        DEFAULT_REQUEST_ID_PATHS,
    )
}

fn paths_or_default(config: &ProviderConfig, keys: &[&str], defaults: &[&str]) -> Vec<String> {
    let configured = config.string_list(keys);
    if configured.is_empty() {
        defaults.iter().map(|p| p.to_string()).collect()
    } else {
        configured
    }
}

/// Apply `overrides` onto `base`, replacing same-named headers regardless of
/// case and appending new ones.
pub fn merge_headers(
    mut base: Vec<(String, String)>,
    overrides: &IndexMap<String, String>,
) -> Vec<(String, String)> {
    for (name, value) in overrides {
        match base.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(existing) => existing.1 = value.clone(),
            None => base.push((name.clone(), value.clone())),
        }
    }
    base
}

/// A successful response with its body decoded.
#[derive(Debug, Clone)]
pub struct DecodedResponse {
    pub status: u16,
    /// JSON body; a non-JSON text body becomes `Value::String`, and an
    /// `image/*` body becomes `{"data": [{"b64_json": ...}]}`.
    pub body: Value,
    pub raw: HttpResponse,
}

impl DecodedResponse {
    pub fn header(&self, name: &str) -> Option<String> {
        self.raw
            .header(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Request id from the body paths, else the first present header.
    pub fn request_id<S: AsRef<str>>(&self, paths: &[S], headers: &[&str]) -> Option<String> {
        first_string_by_paths(&self.body, paths)
            .or_else(|| headers.iter().find_map(|h| self.header(h)))
    }
}

pub fn decode_body(response: &HttpResponse) -> Value {
    let content_type = response
        .content_type()
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or_default();
    if content_type.starts_with("image/") {
        return json!({ "data": [{ "b64_json": BASE64.encode(&response.body) }] });
    }
    let text = String::from_utf8_lossy(&response.body);
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
}

pub fn map_transport_error(provider: &str, error: TransportError) -> ProviderError {
    match error {
        TransportError::Timeout { timeout_ms } => ProviderError::new(
            ErrorCode::ProviderTimeout,
            format!("{provider} request timed out after {timeout_ms}ms"),
        )
        .transient(true),
        TransportError::Connect(message) => ProviderError::new(
            ErrorCode::ProviderHttpFailed,
            format!("{provider} request failed: {message}"),
        )
        .transient(true),
        error @ TransportError::TooLarge { .. } => ProviderError::new(
            ErrorCode::ProviderHttpFailed,
            format!("{provider} {error}"),
        ),
    }
}

/// 5xx and 429 are worth retrying; every other failure status is not.
pub fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Send one request. Non-2xx statuses become `PROVIDER_HTTP_FAILED`.
pub async fn send(
    transport: &dyn Transport,
    provider: &str,
    request: HttpRequest,
) -> Result<DecodedResponse, ProviderError> {
    let response = transport
        .send(request)
        .await
        .map_err(|e| map_transport_error(provider, e))?;

    let body = decode_body(&response);
    let decoded = DecodedResponse {
        status: response.status,
        body,
        raw: response,
    };

    if !decoded.raw.is_success() {
        let status = decoded.status;
        return Err(ProviderError::new(
            ErrorCode::ProviderHttpFailed,
            format!("{provider} HTTP {status}: {}", vendor_message(&decoded.body)),
        )
        .transient(is_transient_status(status))
        .with_request_id(decoded.request_id(DEFAULT_REQUEST_ID_PATHS, &["x-request-id"]))
        .with_details(decoded.body));
    }

    Ok(decoded)
}

/// Best human-readable message in a vendor error body.
pub fn vendor_message(body: &Value) -> String {
    if let Some(message) = first_string_by_paths(body, VENDOR_MESSAGE_PATHS) {
        return truncate(&message);
    }
    match body {
        Value::Null => "empty response".to_string(),
        Value::String(text) => truncate(text.trim()),
        other => truncate(&other.to_string()),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_SNIPPET) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// A 2xx body that carries a vendor error instead of a result. Never retried.
pub fn business_error(provider: &str, body: &Value, request_id: Option<String>) -> ProviderError {
    ProviderError::new(
        ErrorCode::ProviderHttpFailed,
        format!("{provider} rejected the request: {}", vendor_message(body)),
    )
    .with_request_id(request_id)
    .with_details(body.clone())
}

/// A successful response in which no image could be found.
pub fn image_missing(provider: &str, body: &Value, request_id: Option<String>) -> ProviderError {
    ProviderError::new(
        ErrorCode::ProviderParseError,
        format!("provider {provider} response did not contain an image URL"),
    )
    .with_request_id(request_id)
    .with_details(body.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_headers_replaces_case_insensitively() {
        let mut overrides = IndexMap::new();
        overrides.insert("authorization".to_string(), "Key abc".to_string());
        overrides.insert("X-Trace".to_string(), "1".to_string());
        let merged = merge_headers(
            vec![("Authorization".to_string(), "Bearer x".to_string())],
            &overrides,
        );
        assert_eq!(
            merged,
            vec![
                ("Authorization".to_string(), "Key abc".to_string()),
                ("X-Trace".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn image_bodies_are_wrapped_as_b64_json() {
        let response = HttpResponse::new(200, vec![0x89, b'P', b'N', b'G'])
            .with_header("Content-Type", "image/png");
        let body = decode_body(&response);
        assert_eq!(body["data"][0]["b64_json"], "iVBORw==");
    }

    #[test]
    fn non_json_text_is_kept_as_string() {
        let response = HttpResponse::new(502, "Bad Gateway");
        assert_eq!(decode_body(&response), Value::String("Bad Gateway".into()));
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(503));
        assert!(is_transient_status(429));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(401));
    }

    #[test]
    fn long_vendor_messages_are_truncated() {
        let body = json!({ "message": "x".repeat(MAX_ERROR_SNIPPET + 50) });
        assert!(vendor_message(&body).ends_with("..."));
    }
}
