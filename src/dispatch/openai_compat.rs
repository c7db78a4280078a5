//! Image generation through an OpenAI-compatible chat-completions endpoint.
//! The request is a user message with text and image parts; the image comes
//! back somewhere inside the assistant message as a URL, data URL or base64.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value, json};

use crate::config::ProviderConfig;
use crate::dispatch::http;
use crate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter, ProviderOutput};
use crate::error::{ErrorCode, ProviderError};
use crate::extract::{build_request_url, collect_image_candidates, first_string_by_paths, resolve_image_url};
use crate::transport::{HttpRequest, Method, RequestBody, Transport};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ENDPOINT: &str = "/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-image-1.5";
const DEFAULT_TIMEOUT_MS: u64 = 180_000;

const DEFAULT_RESPONSE_URL_PATHS: &[&str] = &[
    "choices.0.message.images",
    "choices.0.message.content",
    "choices.0.message",
    "data.0.url",
    "data.0.b64_json",
];

const REFERENCE_KEYS: &[&str] = &["image_url", "input_image", "image", "images"];

/// Image-request fields that make no sense in a chat body.
const STRIPPED_KEYS: &[&str] = &["prompt", "image", "images", "image_url", "input_image", "mask"];

pub struct OpenAiCompatProvider {
    name: String,
    transport: Arc<dyn Transport>,
    url: String,
    api_key: String,
    model: String,
    headers: IndexMap<String, String>,
    extra_body: Map<String, Value>,
    response_url_paths: Vec<String>,
    request_id_paths: Vec<String>,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ProviderError> {
        let transport = http::require_transport(name, transport)?;
        let api_key = http::string_or_env(config, &["apiKey", "api_key"], &["OPENAI_API_KEY"])
            .ok_or_else(|| {
                ProviderError::config_invalid(format!(
                    "provider {name} is missing apiKey (or OPENAI_API_KEY)"
                ))
            })?;
        let base_url = http::string_or_env(config, &["baseUrl", "base_url"], &["OPENAI_BASE_URL"])
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let endpoint = config
            .string(&["endpoint"])
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Ok(Self {
            name: name.to_string(),
            transport,
            url: build_request_url(Some(&base_url), &endpoint, "openai-compatible")?,
            api_key,
            model: config
                .string(&["model"])
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            headers: http::configured_headers(config),
            extra_body: http::extra_body(config),
            response_url_paths: http::response_url_paths(config, DEFAULT_RESPONSE_URL_PATHS),
            request_id_paths: http::request_id_paths(config),
            timeout: http::request_timeout(config, DEFAULT_TIMEOUT_MS),
        })
    }

    fn reference_images(&self, body: &Map<String, Value>, request: &GenerateRequest) -> Vec<String> {
        let mut found = IndexSet::new();
        for key in REFERENCE_KEYS {
            if let Some(value) = body.get(*key) {
                collect_image_candidates(value, &mut found);
            }
        }
        if found.is_empty() {
            request.reference_data_urls()
        } else {
            found.into_iter().collect()
        }
    }

    /// Chat body. A prompt in the extra body wins over the request prompt;
    /// configured `messages` are sent untouched. Streaming is always off.
    pub fn build_body(&self, request: &GenerateRequest) -> Result<Value, ProviderError> {
        let mut body = self.extra_body.clone();

        let prompt = body
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| request.prompt.trim())
            .to_string();
        if prompt.is_empty() {
            return Err(ProviderError::new(
                ErrorCode::ProviderRequestInvalid,
                format!("provider {} requires a non-empty prompt", self.name),
            ));
        }

        body.entry("model").or_insert_with(|| json!(self.model));
        body.insert("stream".into(), json!(false));

        if !body.contains_key("messages") {
            let mut content = vec![json!({ "type": "text", "text": prompt })];
            content.extend(
                self.reference_images(&body, request)
                    .into_iter()
                    .map(|url| json!({ "type": "image_url", "image_url": { "url": url } })),
            );
            body.insert(
                "messages".into(),
                json!([{ "role": "user", "content": content }]),
            );
        }

        for key in STRIPPED_KEYS {
            body.remove(*key);
        }
        Ok(Value::Object(body))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _poll: &PollOptions,
    ) -> Result<ProviderOutput, ProviderError> {
        let body = self.build_body(request)?;

        let mut http_request = HttpRequest::new(Method::Post, &self.url, self.timeout);
        http_request.headers = http::merge_headers(
            vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("authorization".to_string(), format!("Bearer {}", self.api_key)),
            ],
            &self.headers,
        );
        http_request.body = RequestBody::Json(body);

        let response = http::send(self.transport.as_ref(), &self.name, http_request).await?;

        // The gateway's request id header identifies the call; the body id
        // is only the completion id.
        let request_id = response
            .header("x-request-id")
            .or_else(|| first_string_by_paths(&response.body, &self.request_id_paths));
        let image_url = resolve_image_url(&response.body, &self.response_url_paths)
            .ok_or_else(|| http::image_missing(&self.name, &response.body, request_id.clone()))?;

        Ok(ProviderOutput::new(image_url, request_id))
    }
}
