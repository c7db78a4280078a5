//! fal.run: one synchronous POST with configurable field names. Sent as a
//! multipart form by default, or as JSON when `requestFormat` is `json`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value, json};

use crate::config::ProviderConfig;
use crate::dispatch::http;
use crate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter, ProviderOutput};
use crate::error::{ErrorCode, ProviderError};
use crate::extract::{build_request_url, collect_image_candidates, is_absolute_url, resolve_image_url};
use crate::transport::{FormField, HttpRequest, Method, RequestBody, Transport};

pub const DEFAULT_BASE_URL: &str = "https://fal.run";
pub const DEFAULT_ENDPOINT: &str = "/xai/grok-imagine-image/edit";
const DEFAULT_TIMEOUT_MS: u64 = 180_000;
const DEFAULT_AUTH_SCHEME: &str = "Key";
const DEFAULT_IMAGE_FIELD: &str = "image_url";
const DEFAULT_PROMPT_FIELD: &str = "prompt";
const MAX_NUM_IMAGES: f64 = 8.0;
const DEFAULT_RESPONSE_URL_PATHS: &[&str] = &[
    "images.0.url",
    "data.images.0.url",
    "output.images.0.url",
    "image.url",
];
const REQUEST_ID_HEADERS: &[&str] = &["x-fal-request-id", "x-request-id"];
const REFERENCE_KEYS: &[&str] = &["image_url", "input_image", "image", "images"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFormat {
    Multipart,
    Json,
}

pub struct FalProvider {
    name: String,
    transport: Arc<dyn Transport>,
    url: String,
    api_key: String,
    auth_scheme: String,
    image_field: String,
    prompt_field: String,
    num_images: u32,
    aspect_ratio: Option<String>,
    output_format: Option<String>,
    format: RequestFormat,
    headers: IndexMap<String, String>,
    extra_body: Map<String, Value>,
    response_url_paths: Vec<String>,
    request_id_paths: Vec<String>,
    timeout: Duration,
}

/// Explicit endpoint, else the model as a path (or absolute URL), else the
/// default edit endpoint.
fn resolve_endpoint(config: &ProviderConfig) -> String {
    if let Some(endpoint) = config.string(&["endpoint"]) {
        return endpoint;
    }
    match config.string(&["model"]) {
        Some(model) if is_absolute_url(&model) || model.starts_with('/') => model,
        Some(model) => format!("/{model}"),
        None => DEFAULT_ENDPOINT.to_string(),
    }
}

impl FalProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ProviderError> {
        let transport = http::require_transport(name, transport)?;
        let api_key = http::string_or_env(config, &["apiKey", "api_key"], &["FAL_KEY"])
            .ok_or_else(|| {
                ProviderError::config_invalid(format!(
                    "provider {name} is missing apiKey (or FAL_KEY)"
                ))
            })?;
        let base_url = config
            .string(&["baseUrl", "base_url"])
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let format = match config
            .string(&["requestFormat", "request_format"])
            .map(|f| f.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("multipart") | Some("form") => RequestFormat::Multipart,
            Some("json") => RequestFormat::Json,
            Some(other) => {
                return Err(ProviderError::config_invalid(format!(
                    "provider {name} has unknown requestFormat {other:?}"
                )));
            }
        };

        Ok(Self {
            name: name.to_string(),
            transport,
            url: build_request_url(Some(&base_url), &resolve_endpoint(config), "fal")?,
            api_key,
            auth_scheme: config
                .string(&["authScheme", "auth_scheme"])
                .unwrap_or_else(|| DEFAULT_AUTH_SCHEME.to_string()),
            image_field: config
                .string(&["imageField", "image_field"])
                .unwrap_or_else(|| DEFAULT_IMAGE_FIELD.to_string()),
            prompt_field: config
                .string(&["promptField", "prompt_field"])
                .unwrap_or_else(|| DEFAULT_PROMPT_FIELD.to_string()),
            num_images: config
                .number(&["numImages", "num_images"])
                .map(|n| n.floor().clamp(1.0, MAX_NUM_IMAGES) as u32)
                .unwrap_or(1),
            aspect_ratio: config.string(&["aspectRatio", "aspect_ratio"]),
            output_format: config.string(&["outputFormat", "output_format"]),
            format,
            headers: http::configured_headers(config),
            extra_body: http::extra_body(config),
            response_url_paths: http::response_url_paths(config, DEFAULT_RESPONSE_URL_PATHS),
            request_id_paths: http::request_id_paths(config),
            timeout: http::request_timeout(config, DEFAULT_TIMEOUT_MS),
        })
    }

    pub fn build_body(&self, request: &GenerateRequest) -> Result<Map<String, Value>, ProviderError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ProviderError::new(
                ErrorCode::ProviderRequestInvalid,
                format!("provider {} requires a non-empty prompt", self.name),
            ));
        }

        let mut body = self.extra_body.clone();
        body.entry(self.prompt_field.clone())
            .or_insert_with(|| json!(prompt));

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
        if !body.contains_key(&self.image_field) && !references.is_empty() {
            let image = match references.as_slice() {
                [single] => json!(single),
                many => json!(many),
            };
            body.insert(self.image_field.clone(), image);
        }

        body.entry("num_images").or_insert_with(|| json!(self.num_images));
        if let Some(ratio) = &self.aspect_ratio {
            body.entry("aspect_ratio").or_insert_with(|| json!(ratio));
        }
        if let Some(format) = &self.output_format {
            body.entry("output_format").or_insert_with(|| json!(format));
        }
        Ok(body)
    }

    /// fal sometimes returns 200 with `error`/`detail` and no images.
    fn check_business_error(&self, body: &Value, request_id: Option<String>) -> Result<(), ProviderError> {
        let Some(record) = body.as_object() else {
            return Ok(());
        };
        let has_error = ["error", "detail"]
            .iter()
            .any(|key| record.get(*key).is_some_and(|v| !v.is_null()));
        if has_error && !record.contains_key("images") {
            return Err(http::business_error(&self.name, body, request_id));
        }
        Ok(())
    }
}

/// Flatten a JSON body into form fields. Arrays repeat the field name,
/// scalars are stringified, objects are sent as JSON text.
pub fn form_fields(body: &Map<String, Value>) -> Vec<FormField> {
    let mut fields = Vec::new();
    for (name, value) in body {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    fields.push(FormField::text(name, form_value(item)));
                }
            }
            other => fields.push(FormField::text(name, form_value(other))),
        }
    }
    fields
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ProviderAdapter for FalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _poll: &PollOptions,
    ) -> Result<ProviderOutput, ProviderError> {
        let body = self.build_body(request)?;

        let mut base_headers = vec![(
            "authorization".to_string(),
            format!("{} {}", self.auth_scheme, self.api_key),
        )];
        let body = match self.format {
            RequestFormat::Multipart => RequestBody::Form(form_fields(&body)),
            RequestFormat::Json => {
                base_headers.insert(
                    0,
                    ("content-type".to_string(), "application/json".to_string()),
                );
                RequestBody::Json(Value::Object(body))
            }
        };

        let mut http_request = HttpRequest::new(Method::Post, &self.url, self.timeout);
        http_request.headers = http::merge_headers(base_headers, &self.headers);
        http_request.body = body;

        let response = http::send(self.transport.as_ref(), &self.name, http_request).await?;
        let request_id = response.request_id(&self.request_id_paths, REQUEST_ID_HEADERS);
        self.check_business_error(&response.body, request_id.clone())?;

        let image_url = resolve_image_url(&response.body, &self.response_url_paths)
            .ok_or_else(|| http::image_missing(&self.name, &response.body, request_id.clone()))?;

        Ok(ProviderOutput::new(image_url, request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_falls_back_to_model_path() {
        let config = ProviderConfig::from(json!({ "model": "fal-ai/flux/dev" }));
        assert_eq!(resolve_endpoint(&config), "/fal-ai/flux/dev");

        let config = ProviderConfig::from(json!({ "endpoint": "/x", "model": "ignored" }));
        assert_eq!(resolve_endpoint(&config), "/x");

        assert_eq!(resolve_endpoint(&ProviderConfig::default()), DEFAULT_ENDPOINT);
    }

    #[test]
    fn arrays_repeat_form_fields() {
        let mut body = Map::new();
        body.insert("image_url".into(), json!(["a", "b"]));
        body.insert("num_images".into(), json!(2));
        let fields = form_fields(&body);
        assert_eq!(
            fields,
            vec![
                FormField::text("image_url", "a"),
                FormField::text("image_url", "b"),
                FormField::text("num_images", "2"),
            ]
        );
    }
}
