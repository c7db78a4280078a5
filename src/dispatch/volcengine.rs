//! Volcengine Ark image generation: one synchronous JSON POST. The endpoint
//! may answer with raw image bytes instead of JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value, json};

use crate::config::ProviderConfig;
use crate::dispatch::http;
use crate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter, ProviderOutput};
use crate::error::ProviderError;
use crate::extract::{build_request_url, collect_image_candidates, resolve_image_url};
use crate::transport::{HttpRequest, Method, RequestBody, Transport};

pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com";
pub const DEFAULT_ENDPOINT: &str = "/api/v3/images/generations";
const DEFAULT_TIMEOUT_MS: u64 = 180_000;
const DEFAULT_RESPONSE_FORMAT: &str = "url";
const DEFAULT_RESPONSE_URL_PATHS: &[&str] = &["data.0.url", "data.0.b64_json"];

/// Vendor limit on reference images per request.
pub const MAX_REFERENCE_IMAGES: usize = 14;

const REFERENCE_KEYS: &[&str] = &["image", "images", "input_image", "image_url"];

pub struct VolcengineProvider {
    name: String,
    transport: Arc<dyn Transport>,
    url: String,
    api_key: String,
    model: String,
    size: Option<String>,
    response_format: String,
    watermark: bool,
    headers: IndexMap<String, String>,
    extra_body: Map<String, Value>,
    response_url_paths: Vec<String>,
    request_id_paths: Vec<String>,
    timeout: Duration,
}

impl VolcengineProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ProviderError> {
        let transport = http::require_transport(name, transport)?;
        let api_key = http::require_string(config, &["apiKey", "api_key"], name)?;
        let model = http::require_string(config, &["model"], name)?;
        let base_url = config
            .string(&["baseUrl", "base_url"])
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let endpoint = config
            .string(&["endpoint"])
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Ok(Self {
            name: name.to_string(),
            transport,
            url: build_request_url(Some(&base_url), &endpoint, "volcengine")?,
            api_key,
            model,
            size: config.string(&["size"]),
            response_format: config
                .string(&["responseFormat", "response_format"])
                .unwrap_or_else(|| DEFAULT_RESPONSE_FORMAT.to_string()),
            watermark: config.boolean(&["watermark"]).unwrap_or(false),
            headers: http::configured_headers(config),
            extra_body: http::extra_body(config),
            response_url_paths: http::response_url_paths(config, DEFAULT_RESPONSE_URL_PATHS),
            request_id_paths: http::request_id_paths(config),
            timeout: http::request_timeout(config, DEFAULT_TIMEOUT_MS),
        })
    }

    /// Extra body first, then fixed fields; knobs only where the extra body
    /// did not already set them.
    pub fn build_body(&self, request: &GenerateRequest) -> Value {
        let mut body = self.extra_body.clone();
        body.insert("model".into(), json!(self.model));
        body.insert("prompt".into(), json!(request.prompt));

        let mut found = IndexSet::new();
        for key in REFERENCE_KEYS {
            if let Some(value) = body.get(*key) {
                collect_image_candidates(value, &mut found);
            }
        }
        let references: Vec<String> = if found.is_empty() {
            request.reference_data_urls()
        } else {
            found.into_iter().collect()
        };

        if !body.contains_key("image") && !references.is_empty() {
            let limited = &references[..references.len().min(MAX_REFERENCE_IMAGES)];
            let image = match limited {
                [single] => json!(single),
                many => json!(many),
            };
            body.insert("image".into(), image);
        }
        body.remove("images");

        if let Some(size) = &self.size {
            body.entry("size").or_insert_with(|| json!(size));
        }
        body.entry("response_format")
            .or_insert_with(|| json!(self.response_format));
        body.entry("watermark")
            .or_insert_with(|| json!(self.watermark));
        Value::Object(body)
    }
}

#[async_trait]
impl ProviderAdapter for VolcengineProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _poll: &PollOptions,
    ) -> Result<ProviderOutput, ProviderError> {
        let mut http_request = HttpRequest::new(Method::Post, &self.url, self.timeout);
        http_request.headers = http::merge_headers(
            vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("authorization".to_string(), format!("Bearer {}", self.api_key)),
            ],
            &self.headers,
        );
        http_request.body = RequestBody::Json(self.build_body(request));

        let response = http::send(self.transport.as_ref(), &self.name, http_request).await?;

        if response.body.get("error").is_some_and(Value::is_object) {
            return Err(http::business_error(
                &self.name,
                &response.body,
                response.header("x-request-id"),
            ));
        }

        let request_id = response.request_id(&self.request_id_paths, &["x-request-id"]);
        let image_url = resolve_image_url(&response.body, &self.response_url_paths)
            .ok_or_else(|| http::image_missing(&self.name, &response.body, request_id.clone()))?;

        Ok(ProviderOutput::new(image_url, request_id))
    }
}
