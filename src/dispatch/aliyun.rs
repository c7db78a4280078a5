//! DashScope (Aliyun) multimodal generation: one synchronous JSON POST whose
//! legal parameters depend on the model family.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::config::ProviderConfig;
use crate::dispatch::http::{self, DecodedResponse};
use crate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter, ProviderOutput};
use crate::error::{ErrorCode, ProviderError};
use crate::extract::{build_request_url, collect_image_candidates, resolve_image_url, value_to_string};
use crate::transport::{HttpRequest, Method, RequestBody, Transport};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
pub const DEFAULT_ENDPOINT: &str = "/services/aigc/multimodal-generation/generation";
const DEFAULT_TIMEOUT_MS: u64 = 180_000;
const MAX_SEED: i64 = 2_147_483_647;

const DEFAULT_RESPONSE_URL_PATHS: &[&str] = &[
    "output.choices.0.message.content.0.image",
    "output.choices.0.message.content",
    "output.choices.0.message",
    "output.choices",
    "output",
];

/// Body keys that may already carry reference images.
const REFERENCE_KEYS: &[&str] = &["image", "images", "input_image", "image_url", "input"];

static WAN_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^wan[\w.-]*image$").unwrap());

/// What a model family accepts. Keep in sync with the vendor's model list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Inclusive bounds for `n`; `None` passes the configured value through.
    pub n_range: Option<(u32, u32)>,
    pub size: bool,
    pub prompt_extend: bool,
    /// Sends `enable_interleave: false`.
    pub disable_interleave: bool,
}

const PASSTHROUGH: ModelCapabilities = ModelCapabilities {
    n_range: None,
    size: false,
    prompt_extend: false,
    disable_interleave: false,
};

enum ModelMatch {
    Exact(&'static str),
    Prefix(&'static str),
    WanImage,
}

impl ModelMatch {
    fn matches(&self, model: &str) -> bool {
        let lower = model.to_ascii_lowercase();
        match self {
            Self::Exact(name) => lower == *name,
            Self::Prefix(prefix) => lower.starts_with(prefix),
            Self::WanImage => WAN_IMAGE_RE.is_match(model),
        }
    }
}

/// First match wins, so the bare edit model precedes its prefix family.
const MODEL_FAMILIES: &[(ModelMatch, ModelCapabilities)] = &[
    (
        ModelMatch::Exact("qwen-image-edit"),
        ModelCapabilities {
            n_range: Some((1, 1)),
            size: false,
            prompt_extend: false,
            disable_interleave: false,
        },
    ),
    (
        ModelMatch::Prefix("qwen-image-edit"),
        ModelCapabilities {
            n_range: Some((1, 6)),
            size: true,
            prompt_extend: true,
            disable_interleave: false,
        },
    ),
    (
        ModelMatch::WanImage,
        ModelCapabilities {
            n_range: Some((1, 4)),
            size: true,
            prompt_extend: true,
            disable_interleave: true,
        },
    ),
];

pub fn model_capabilities(model: &str) -> ModelCapabilities {
    MODEL_FAMILIES
        .iter()
        .find(|(matcher, _)| matcher.matches(model))
        .map(|(_, caps)| *caps)
        .unwrap_or(PASSTHROUGH)
}

/// True for model names that only this vendor serves.
pub fn is_vendor_model(model: &str) -> bool {
    WAN_IMAGE_RE.is_match(model) || model.to_ascii_lowercase().starts_with("qwen-image-edit")
}

pub struct AliyunProvider {
    name: String,
    transport: Arc<dyn Transport>,
    url: String,
    api_key: String,
    model: String,
    n: u32,
    size: Option<String>,
    negative_prompt: Option<String>,
    prompt_extend: Option<bool>,
    watermark: bool,
    seed: Option<i64>,
    headers: IndexMap<String, String>,
    extra_body: Map<String, Value>,
    response_url_paths: Vec<String>,
    request_id_paths: Vec<String>,
    timeout: Duration,
}

impl AliyunProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ProviderError> {
        let transport = http::require_transport(name, transport)?;
        let api_key = http::string_or_env(config, &["apiKey", "api_key"], &["DASHSCOPE_API_KEY"])
            .ok_or_else(|| {
                ProviderError::config_invalid(format!(
                    "provider {name} is missing apiKey (or DASHSCOPE_API_KEY)"
                ))
            })?;
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
            url: build_request_url(Some(&base_url), &endpoint, "aliyun")?,
            api_key,
            model,
            n: config
                .number(&["n"])
                .filter(|n| *n > 0.0)
                .map(|n| n.floor() as u32)
                .unwrap_or(1),
            size: config.string(&["size"]),
            negative_prompt: config.string(&["negativePrompt", "negative_prompt"]),
            prompt_extend: config.boolean(&["promptExtend", "prompt_extend"]),
            watermark: config.boolean(&["watermark"]).unwrap_or(false),
            seed: config
                .number(&["seed"])
                .filter(|s| s.fract() == 0.0 && (0.0..=MAX_SEED as f64).contains(s))
                .map(|s| s as i64),
            headers: http::configured_headers(config),
            extra_body: http::extra_body(config),
            response_url_paths: http::response_url_paths(config, DEFAULT_RESPONSE_URL_PATHS),
            request_id_paths: http::request_id_paths(config),
            timeout: http::request_timeout(config, DEFAULT_TIMEOUT_MS),
        })
    }

    fn parameters(&self) -> Map<String, Value> {
        let caps = model_capabilities(&self.model);
        let n = match caps.n_range {
            Some((min, max)) => self.n.clamp(min, max),
            None => self.n,
        };

        let mut parameters = Map::new();
        parameters.insert("n".into(), json!(n));
        parameters.insert("watermark".into(), json!(self.watermark));
        if caps.disable_interleave {
            parameters.insert("enable_interleave".into(), json!(false));
        }
        if let Some(negative) = &self.negative_prompt {
            parameters.insert("negative_prompt".into(), json!(negative));
        }
        if let Some(seed) = self.seed {
            parameters.insert("seed".into(), json!(seed));
        }
        if let Some(size) = self.size.as_ref().filter(|_| caps.size) {
            parameters.insert("size".into(), json!(size));
        }
        if caps.prompt_extend {
            parameters.insert(
                "prompt_extend".into(),
                json!(self.prompt_extend.unwrap_or(true)),
            );
        }
        parameters
    }

    fn reference_images(&self, request: &GenerateRequest) -> Vec<String> {
        let mut found = IndexSet::new();
        for key in REFERENCE_KEYS {
            if let Some(value) = self.extra_body.get(*key) {
                collect_image_candidates(value, &mut found);
            }
        }
        if found.is_empty() {
            request.reference_data_urls()
        } else {
            found.into_iter().collect()
        }
    }

    pub fn build_body(&self, request: &GenerateRequest) -> Result<Value, ProviderError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ProviderError::new(
                ErrorCode::ProviderRequestInvalid,
                format!("provider {} requires a non-empty prompt", self.name),
            ));
        }

        let mut content: Vec<Value> = self
            .reference_images(request)
            .into_iter()
            .map(|image| json!({ "image": image }))
            .collect();
        content.push(json!({ "text": prompt }));

        let mut parameters = self
            .extra_body
            .get("parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        parameters.extend(self.parameters());

        let mut body: Map<String, Value> = self
            .extra_body
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "model" | "input" | "parameters"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        body.insert("model".into(), json!(self.model));
        body.insert(
            "input".into(),
            json!({ "messages": [{ "role": "user", "content": content }] }),
        );
        body.insert("parameters".into(), Value::Object(parameters));
        Ok(Value::Object(body))
    }

    fn check_business_error(&self, response: &DecodedResponse) -> Result<(), ProviderError> {
        let Some(code) = response.body.get("code").and_then(value_to_string) else {
            return Ok(());
        };
        if code.trim().is_empty() {
            return Ok(());
        }
        let request_id = response
            .body
            .get("request_id")
            .and_then(value_to_string)
            .or_else(|| response.header("x-request-id"));
        Err(http::business_error(&self.name, &response.body, request_id))
    }
}

#[async_trait]
impl ProviderAdapter for AliyunProvider {
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
        self.check_business_error(&response)?;

        let request_id = response.request_id(&self.request_id_paths, &["x-request-id"]);
        let image_url = resolve_image_url(&response.body, &self.response_url_paths)
            .ok_or_else(|| http::image_missing(&self.name, &response.body, request_id.clone()))?;

        Ok(ProviderOutput::new(image_url, request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_edit_model_is_pinned_to_one_image() {
        let caps = model_capabilities("qwen-image-edit");
        assert_eq!(caps.n_range, Some((1, 1)));
        assert!(!caps.size);
        assert!(!caps.prompt_extend);
    }

    #[test]
    fn edit_family_allows_size_and_extend() {
        let caps = model_capabilities("qwen-image-edit-max");
        assert_eq!(caps.n_range, Some((1, 6)));
        assert!(caps.size && caps.prompt_extend);
    }

    #[test]
    fn wan_family_disables_interleave() {
        let caps = model_capabilities("wan2.6-image");
        assert_eq!(caps.n_range, Some((1, 4)));
        assert!(caps.disable_interleave);
    }

    #[test]
    fn unknown_models_pass_through() {
        assert_eq!(model_capabilities("some-future-model"), PASSTHROUGH);
        assert!(!is_vendor_model("gpt-image-1"));
        assert!(is_vendor_model("WAN2.5-Image"));
    }
}
