//! Protocol-agnostic helpers for pulling domain values out of vendor JSON.
//!
//! Vendors return images as bare URLs, as JSON fields nested in
//! vendor-specific places, as raw base64, or embedded in chat-completion
//! prose. Everything here is total: a miss yields `None`, never an error.

use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexSet;
use regex::Regex;
use serde_json::Value;

use crate::error::ProviderError;

/// Nesting ceiling for every recursive walk over vendor payloads.
pub const MAX_EXTRACT_DEPTH: usize = 8;

/// Shortest bare string accepted as a raw base64 image.
pub const MIN_RAW_BASE64_LEN: usize = 64;

/// Shortest base64 run accepted when it is embedded in surrounding text.
pub const MIN_EMBEDDED_BASE64_LEN: usize = 100;

/// Fields probed first, in order, when looking for an image in an object.
const DIRECT_IMAGE_KEYS: &[&str] = &[
    "b64_json",
    "url",
    "image_url",
    "output_images",
    "image",
    "image_base64",
    "input_image",
    "text",
    "content",
];

/// Containers descended into after the direct fields miss.
const NESTED_IMAGE_KEYS: &[&str] = &[
    "images", "message", "choices", "output", "data", "result", "delta",
];

static DATA_IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^data:image/[a-z0-9.+-]+;base64,[A-Za-z0-9+/=]+$").unwrap()
});
static WRAPPED_DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\((data:image/[a-z0-9.+-]+;base64,[A-Za-z0-9+/=]+)\)").unwrap()
});
static WRAPPED_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\((https?://[^\s)]+)\)").unwrap());
static EMBEDDED_DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(data:image/[a-z0-9.+-]+;base64,[A-Za-z0-9+/=]+)").unwrap()
});
static EMBEDDED_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://\S+").unwrap());
static EMBEDDED_BASE64_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"([A-Za-z0-9+/]{{{MIN_EMBEDDED_BASE64_LEN},}}={{0,2}})")).unwrap()
});
static BASE64_BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap());
static TRAILING_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[),.;!?]+$").unwrap());

/// Dotted-path lookup: `"data.0.url"`. Numeric segments index arrays, all
/// other segments index objects. Any miss returns `None`.
pub fn get_by_path<'a>(source: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    if dotted_path.is_empty() {
        return None;
    }
    dotted_path.split('.').try_fold(source, |acc, segment| {
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            let index: usize = segment.parse().ok()?;
            acc.as_array()?.get(index)
        } else {
            acc.as_object()?.get(segment)
        }
    })
}

/// String or number as text; everything else is absent.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First trimmed, non-empty string found at any of `paths`.
pub fn first_string_by_paths<S: AsRef<str>>(source: &Value, paths: &[S]) -> Option<String> {
    paths.iter().find_map(|path| {
        get_by_path(source, path.as_ref())
            .and_then(value_to_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

pub fn is_absolute_url(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn is_data_image_url(value: &str) -> bool {
    DATA_IMAGE_URL_RE.is_match(value)
}

/// Whole-string base64 check: length a multiple of 4, standard alphabet,
/// at most two trailing `=`.
pub fn is_likely_base64(text: &str) -> bool {
    text.len() >= 4 && text.len() % 4 == 0 && BASE64_BODY_RE.is_match(text)
}

/// Sniff the image container from the decoded leading bytes. Defaults to png.
pub fn detect_image_mime(base64: &str) -> &'static str {
    let head = base64.get(..12).unwrap_or(base64);
    let Ok(bytes) = BASE64.decode(head) else {
        return "image/png";
    };
    match bytes.as_slice() {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', ..] => "image/webp",
        _ => "image/png",
    }
}

pub fn as_image_data_url(base64: &str) -> String {
    format!("data:{};base64,{base64}", detect_image_mime(base64))
}

fn trim_potential_url(text: &str) -> String {
    TRAILING_PUNCT_RE.replace(text, "").into_owned()
}

fn trim_base64_wrapping(text: &str) -> &str {
    text.trim_matches(|c| matches!(c, '(' | ')' | '"' | '\''))
}

/// Best-effort image reference detection in a single string: URL, data
/// URL, raw base64, or any of those embedded in prose or markdown.
pub fn pick_image_candidate(value: &str) -> Option<String> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }

    if is_data_image_url(text) {
        return Some(text.to_string());
    }
    if is_absolute_url(text) && !text.contains(char::is_whitespace) {
        return Some(trim_potential_url(text));
    }

    let bare = trim_base64_wrapping(text);
    if bare.len() >= MIN_RAW_BASE64_LEN && is_likely_base64(bare) {
        return Some(as_image_data_url(bare));
    }

    if let Some(caps) = WRAPPED_DATA_URL_RE.captures(text) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = WRAPPED_URL_RE.captures(text) {
        return Some(trim_potential_url(&caps[1]));
    }
    if let Some(caps) = EMBEDDED_DATA_URL_RE.captures(text) {
        return Some(caps[1].to_string());
    }
    if let Some(found) = EMBEDDED_URL_RE.find(text) {
        return Some(trim_potential_url(found.as_str()));
    }
    if let Some(caps) = EMBEDDED_BASE64_RE.captures(text) {
        let run = trim_base64_wrapping(&caps[1]);
        if is_likely_base64(run) {
            return Some(as_image_data_url(run));
        }
    }
    None
}

/// Collect every image reference reachable through the well-known image
/// fields, deduplicated in discovery order.
pub fn collect_image_candidates(value: &Value, result: &mut IndexSet<String>) {
    collect_at_depth(value, result, 0);
}

fn collect_at_depth(value: &Value, result: &mut IndexSet<String>, depth: usize) {
    if depth > MAX_EXTRACT_DEPTH {
        return;
    }
    match value {
        Value::String(text) => {
            if let Some(candidate) = pick_image_candidate(text) {
                result.insert(candidate);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_at_depth(item, result, depth + 1);
            }
        }
        Value::Object(record) => {
            for key in DIRECT_IMAGE_KEYS.iter().chain(NESTED_IMAGE_KEYS) {
                if let Some(field) = record.get(*key) {
                    collect_at_depth(field, result, depth + 1);
                }
            }
        }
        _ => {}
    }
}

/// First image reference reachable through the well-known image fields.
pub fn extract_image_url(value: &Value) -> Option<String> {
    extract_at_depth(value, 0)
}

fn extract_at_depth(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_EXTRACT_DEPTH {
        return None;
    }
    match value {
        Value::String(text) => pick_image_candidate(text),
        Value::Array(items) => items
            .iter()
            .find_map(|item| extract_at_depth(item, depth + 1)),
        Value::Object(record) => DIRECT_IMAGE_KEYS
            .iter()
            .chain(NESTED_IMAGE_KEYS)
            .filter_map(|key| record.get(*key))
            .find_map(|field| extract_at_depth(field, depth + 1)),
        _ => None,
    }
}

/// Last resort: any string anywhere in the payload that is itself a URL or
/// data URL, regardless of the field it sits under.
pub fn scan_for_image_url(value: &Value) -> Option<String> {
    scan_at_depth(value, 0)
}

fn scan_at_depth(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_EXTRACT_DEPTH {
        return None;
    }
    match value {
        Value::String(text) => {
            let text = text.trim();
            if is_data_image_url(text) {
                Some(text.to_string())
            } else if is_absolute_url(text) && !text.contains(char::is_whitespace) {
                Some(trim_potential_url(text))
            } else {
                None
            }
        }
        Value::Array(items) => items.iter().find_map(|item| scan_at_depth(item, depth + 1)),
        Value::Object(record) => record
            .values()
            .find_map(|field| scan_at_depth(field, depth + 1)),
        _ => None,
    }
}

/// Try the configured dotted paths in order, then the well-known fields of
/// the whole payload, then a scan of every field.
pub fn resolve_image_url<S: AsRef<str>>(source: &Value, paths: &[S]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| get_by_path(source, path.as_ref()))
        .find_map(extract_image_url)
        .or_else(|| extract_image_url(source))
        .or_else(|| scan_for_image_url(source))
}

/// Absolute endpoints are used as-is; relative ones are joined onto the
/// base with exactly one slash.
pub fn build_request_url(
    base_url: Option<&str>,
    endpoint: &str,
    label: &str,
) -> Result<String, ProviderError> {
    if is_absolute_url(endpoint) {
        return Ok(endpoint.to_string());
    }
    let base = base_url.map(str::trim).filter(|b| !b.is_empty()).ok_or_else(|| {
        ProviderError::config_invalid(format!(
            "{label} has no baseUrl (required when endpoint is not absolute)"
        ))
    })?;
    Ok(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    ))
}

/// Trim, drop empties and duplicates, keep first-seen order.
pub fn dedupe_non_empty<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = IndexSet::new();
    for value in values {
        let trimmed = value.as_ref().trim();
        if !trimmed.is_empty() {
            seen.insert(trimmed.to_string());
        }
    }
    seen.into_iter().collect()
}

/// Percent-encode a path segment (task ids go into poll URL templates).
pub fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_punctuation_is_trimmed_from_urls() {
        assert_eq!(trim_potential_url("https://a/b.png)."), "https://a/b.png");
    }

    #[test]
    fn base64_wrapping_trims_quotes_but_keeps_interior() {
        assert_eq!(trim_base64_wrapping("(\"ABCD\")"), "ABCD");
        assert_eq!(trim_base64_wrapping("(\"AB CD\")"), "AB CD");
    }

    #[test]
    fn path_segment_encoding_escapes_reserved_bytes() {
        assert_eq!(encode_path_segment("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_path_segment("task-1_2.3~"), "task-1_2.3~");
    }
}
