//! Submit-then-poll image APIs. One state machine drives every vendor:
//! submit, sleep, poll, and repeat until the task finishes, fails, reports
//! a status nobody recognizes, or the poll timeout runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value, json};

use crate::config::ProviderConfig;
use crate::dispatch::http::{self, DecodedResponse};
use crate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter, ProviderOutput};
use crate::error::{ErrorCode, ProviderError};
use crate::extract::{
    build_request_url, collect_image_candidates, encode_path_segment, first_string_by_paths,
    get_by_path, resolve_image_url, value_to_string,
};
use crate::transport::{HttpRequest, Method, RequestBody, Transport};

/// Result of polling an async task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Task is still queued or running.
    InProgress,
    /// Task finished and produced an image.
    Completed(String),
    /// Vendor reported failure, with its message.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTask {
    pub task_id: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    pub status: PollStatus,
    /// Replaces the last known request id when present.
    pub request_id: Option<String>,
}

/// How a vendor spells its task states. Matching ignores case.
#[derive(Debug, Clone, Copy)]
pub struct StatusVocabulary {
    pub done: &'static [&'static str],
    pub pending: &'static [&'static str],
    pub failed: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Done,
    Pending,
    Failed,
}

impl StatusVocabulary {
    pub fn classify(&self, status: &str) -> Option<StatusClass> {
        let status = status.trim();
        let hit = |words: &[&str]| words.iter().any(|w| w.eq_ignore_ascii_case(status));
        if hit(self.done) {
            Some(StatusClass::Done)
        } else if hit(self.pending) {
            Some(StatusClass::Pending)
        } else if hit(self.failed) {
            Some(StatusClass::Failed)
        } else {
            None
        }
    }
}

/// Vendor-specific request/response handling for submit/poll APIs.
pub trait AsyncPollApi: Send + Sync {
    fn build_submit_request(&self, request: &GenerateRequest) -> Result<HttpRequest, ProviderError>;

    fn parse_submit_response(&self, response: &DecodedResponse) -> Result<SubmittedTask, ProviderError>;

    fn build_poll_request(&self, task_id: &str) -> Result<HttpRequest, ProviderError>;

    /// Unrecognized or missing statuses are `PROVIDER_POLL_PARSE_ERROR`.
    fn parse_poll_response(
        &self,
        response: &DecodedResponse,
        request_id: Option<String>,
    ) -> Result<PollUpdate, ProviderError>;

    /// Interval used when the caller passes no override.
    fn poll_interval(&self) -> Duration;

    /// Wall-clock budget from submit, used when the caller passes no override.
    fn poll_timeout(&self) -> Duration;
}

fn missing_status(provider: &str, body: &Value, request_id: Option<String>) -> ProviderError {
    ProviderError::new(
        ErrorCode::ProviderPollParseError,
        format!("provider {provider} poll response has no status"),
    )
    .with_request_id(request_id)
    .with_details(body.clone())
}

fn unknown_status(provider: &str, status: &str, body: &Value, request_id: Option<String>) -> ProviderError {
    ProviderError::new(
        ErrorCode::ProviderPollParseError,
        format!("provider {provider} returned unrecognized status {status:?}"),
    )
    .with_request_id(request_id)
    .with_details(body.clone())
}

fn method_or(config: &ProviderConfig, default: Method, provider: &str) -> Result<Method, ProviderError> {
    match config.string(&["method"]) {
        None => Ok(default),
        Some(name) => Method::parse(&name).ok_or_else(|| {
            ProviderError::config_invalid(format!("provider {provider} has unsupported method {name}"))
        }),
    }
}

// ---------------------------------------------------------------------------
// Generic HTTP async API (caller-supplied URLs and field paths)
// ---------------------------------------------------------------------------

const HTTP_ASYNC_VOCABULARY: StatusVocabulary = StatusVocabulary {
    done: &["done", "succeeded", "success", "completed"],
    pending: &["pending", "running", "in_queue", "generating", "queued", "processing"],
    failed: &["failed", "failure", "error", "cancelled", "canceled", "timeout"],
};

const HTTP_ASYNC_FALLBACK_IMAGE_PATH: &str = "data.image_urls.0";
const HTTP_ASYNC_TIMEOUT_MS: u64 = 60_000;
const HTTP_ASYNC_POLL_INTERVAL_MS: u64 = 1_200;
const HTTP_ASYNC_POLL_TIMEOUT_MS: u64 = 180_000;

pub struct HttpAsyncApi {
    name: String,
    base_url: Option<String>,
    submit_url: String,
    submit_method: Method,
    submit_headers: IndexMap<String, String>,
    task_id_path: String,
    submit_request_id_path: String,
    poll_url_template: String,
    poll_method: Method,
    poll_headers: IndexMap<String, String>,
    status_path: String,
    poll_request_id_path: String,
    image_url_path: String,
    error_path: String,
    timeout: Duration,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl HttpAsyncApi {
    pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let submit = ProviderConfig::new(config.object(&["submit"]));
        let poll = ProviderConfig::new(config.object(&["poll"]));
        let base_url = config.string(&["baseUrl", "base_url"]);

        let (Some(submit_url), Some(poll_url_template)) = (
            submit.string(&["url"]),
            poll.string(&["urlTemplate", "url_template", "url"]),
        ) else {
            return Err(ProviderError::config_invalid(format!(
                "provider {name} requires submit.url and poll.urlTemplate"
            )));
        };
        let submit_url = build_request_url(base_url.as_deref(), &submit_url, name)?;
        build_request_url(base_url.as_deref(), &poll_url_template, name)?;

        let path = |c: &ProviderConfig, keys: &[&str], default: &str| {
            c.string(keys).unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            name: name.to_string(),
            submit_url,
            submit_method: method_or(&submit, Method::Post, name)?,
            submit_headers: submit.string_map(&["headers"]),
            task_id_path: path(&submit, &["taskIdPath", "task_id_path"], "task_id"),
            submit_request_id_path: path(&submit, &["requestIdPath", "request_id_path"], "request_id"),
            poll_url_template,
            poll_method: method_or(&poll, Method::Get, name)?,
            poll_headers: poll.string_map(&["headers"]),
            status_path: path(&poll, &["statusPath", "status_path"], "status"),
            poll_request_id_path: path(&poll, &["requestIdPath", "request_id_path"], "request_id"),
            image_url_path: path(&poll, &["imageUrlPath", "image_url_path"], "image_url"),
            error_path: path(&poll, &["errorPath", "error_path"], "message"),
            timeout: http::request_timeout(config, HTTP_ASYNC_TIMEOUT_MS),
            poll_interval: Duration::from_millis(
                config
                    .positive_ms(&["pollIntervalMs", "poll_interval_ms"])
                    .unwrap_or(HTTP_ASYNC_POLL_INTERVAL_MS),
            ),
            poll_timeout: Duration::from_millis(
                config
                    .positive_ms(&["pollTimeoutMs", "poll_timeout_ms"])
                    .unwrap_or(HTTP_ASYNC_POLL_TIMEOUT_MS),
            ),
            base_url,
        })
    }

    pub fn submit_body(request: &GenerateRequest) -> Value {
        let references = request.reference_base64s();
        let mut body = Map::new();
        body.insert("prompt".into(), json!(request.prompt));
        body.insert(
            "reference_image_base64".into(),
            json!(references.first().or(request.reference_image_base64.as_ref())),
        );
        body.insert("meta".into(), json!(request.meta));
        if references.len() > 1 {
            body.insert("reference_images_base64".into(), json!(references));
        }
        Value::Object(body)
    }
}

impl AsyncPollApi for HttpAsyncApi {
    fn build_submit_request(&self, request: &GenerateRequest) -> Result<HttpRequest, ProviderError> {
        let mut http_request = HttpRequest::new(self.submit_method, &self.submit_url, self.timeout);
        http_request.headers = http::merge_headers(
            vec![("content-type".to_string(), "application/json".to_string())],
            &self.submit_headers,
        );
        http_request.body = RequestBody::Json(Self::submit_body(request));
        Ok(http_request)
    }

    fn parse_submit_response(&self, response: &DecodedResponse) -> Result<SubmittedTask, ProviderError> {
        let request_id = first_string_by_paths(&response.body, &[&self.submit_request_id_path]);
        let task_id = first_string_by_paths(&response.body, &[&self.task_id_path]).ok_or_else(|| {
            ProviderError::new(
                ErrorCode::ProviderSubmitParseError,
                format!("provider {} submit response has no {}", self.name, self.task_id_path),
            )
            .with_request_id(request_id.clone())
            .with_details(response.body.clone())
        })?;
        Ok(SubmittedTask {
            task_id,
            request_id,
        })
    }

    fn build_poll_request(&self, task_id: &str) -> Result<HttpRequest, ProviderError> {
        let endpoint = self
            .poll_url_template
            .replace("{taskId}", &encode_path_segment(task_id));
        let url = build_request_url(self.base_url.as_deref(), &endpoint, &self.name)?;
        let mut http_request = HttpRequest::new(self.poll_method, url, self.timeout);
        http_request.headers = http::merge_headers(Vec::new(), &self.poll_headers);
        Ok(http_request)
    }

    fn parse_poll_response(
        &self,
        response: &DecodedResponse,
        request_id: Option<String>,
    ) -> Result<PollUpdate, ProviderError> {
        let body = &response.body;
        let request_id = first_string_by_paths(body, &[&self.poll_request_id_path]).or(request_id);
        let Some(status) = first_string_by_paths(body, &[&self.status_path]) else {
            return Err(missing_status(&self.name, body, request_id));
        };

        let status = match HTTP_ASYNC_VOCABULARY.classify(&status) {
            Some(StatusClass::Pending) => PollStatus::InProgress,
            Some(StatusClass::Done) => {
                let image_url = resolve_image_url(
                    body,
                    &[self.image_url_path.as_str(), HTTP_ASYNC_FALLBACK_IMAGE_PATH],
                )
                .ok_or_else(|| {
                    ProviderError::new(
                        ErrorCode::ProviderImageUrlMissing,
                        format!("provider {} reported success without an image URL", self.name),
                    )
                    .with_request_id(request_id.clone())
                    .with_details(body.clone())
                })?;
                PollStatus::Completed(image_url)
            }
            Some(StatusClass::Failed) => PollStatus::Failed(
                first_string_by_paths(body, &[&self.error_path])
                    .unwrap_or_else(|| format!("provider {} task {status}", self.name)),
            ),
            None => return Err(unknown_status(&self.name, &status, body, request_id)),
        };
        Ok(PollUpdate { status, request_id })
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

// ---------------------------------------------------------------------------
// ModelScope inference API (async-mode header, GET /tasks/{taskId})
// ---------------------------------------------------------------------------

pub const MODELSCOPE_BASE_URL: &str = "https://api-inference.modelscope.cn/v1";
const MODELSCOPE_ENDPOINT: &str = "/images/generations";
const MODELSCOPE_POLL_ENDPOINT: &str = "/tasks/{taskId}";
const MODELSCOPE_TASK_TYPE: &str = "image_generation";
const MODELSCOPE_TIMEOUT_MS: u64 = 120_000;
const MODELSCOPE_POLL_INTERVAL_MS: u64 = 1_000;
const MODELSCOPE_POLL_TIMEOUT_MS: u64 = 300_000;
const MODELSCOPE_RESPONSE_URL_PATHS: &[&str] = &[
    "output_images.0",
    "output_images",
    "data.0.url",
    "data.0.b64_json",
    "output.0.url",
    "output.0.b64_json",
];
const MODELSCOPE_ERROR_PATHS: &[&str] = &["errors.message", "error.message", "message"];
const MODELSCOPE_REFERENCE_KEYS: &[&str] = &["image_url", "input_image", "image", "images"];

const MODELSCOPE_VOCABULARY: StatusVocabulary = StatusVocabulary {
    done: &["SUCCEED", "SUCCESS", "COMPLETED", "DONE"],
    pending: &["PENDING", "PROCESSING", "RUNNING", "QUEUED", "CREATED", "IN_PROGRESS"],
    failed: &["FAILED", "FAIL", "CANCELED", "CANCELLED"],
};

pub struct ModelScopeApi {
    name: String,
    base_url: String,
    submit_url: String,
    poll_endpoint: String,
    api_key: String,
    model: String,
    task_type: String,
    headers: IndexMap<String, String>,
    poll_headers: IndexMap<String, String>,
    extra_body: Map<String, Value>,
    /// Optional pass-through knobs, in body order.
    knobs: Vec<(&'static str, Value)>,
    task_id_path: String,
    status_path: String,
    request_id_paths: Vec<String>,
    response_url_paths: Vec<String>,
    timeout: Duration,
    poll_interval: Duration,
    poll_timeout: Duration,
}

/// A LoRA entry is either one repo id or a map of repo id to weight.
fn lora_value(config: &ProviderConfig) -> Option<Value> {
    match config.raw(&["loras"])? {
        Value::String(s) if !s.trim().is_empty() => Some(json!(s.trim())),
        Value::Object(map) if map.values().all(|w| w.as_f64().is_some_and(f64::is_finite)) => {
            Some(Value::Object(map.clone()))
        }
        _ => None,
    }
}

impl ModelScopeApi {
    pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = http::require_string(config, &["apiKey", "api_key"], name)?;
        let model = http::require_string(config, &["model"], name)?;
        let base_url = config
            .string(&["baseUrl", "base_url"])
            .unwrap_or_else(|| MODELSCOPE_BASE_URL.to_string());
        let endpoint = config
            .string(&["endpoint"])
            .unwrap_or_else(|| MODELSCOPE_ENDPOINT.to_string());

        let mut knobs = Vec::new();
        if let Some(negative) = config.string(&["negativePrompt", "negative_prompt"]) {
            knobs.push(("negative_prompt", json!(negative)));
        }
        if let Some(size) = config.string(&["size"]) {
            knobs.push(("size", json!(size)));
        }
        for key in ["seed", "steps", "guidance"] {
            if let Some(value) = config.raw(&[key]).filter(|v| v.is_number()) {
                knobs.push((key, value.clone()));
            }
        }
        if let Some(loras) = lora_value(config) {
            knobs.push(("loras", loras));
        }

        Ok(Self {
            name: name.to_string(),
            submit_url: build_request_url(Some(&base_url), &endpoint, name)?,
            poll_endpoint: config
                .string(&["pollEndpoint", "poll_endpoint"])
                .unwrap_or_else(|| MODELSCOPE_POLL_ENDPOINT.to_string()),
            base_url,
            api_key,
            model,
            task_type: config
                .string(&["taskType", "task_type"])
                .unwrap_or_else(|| MODELSCOPE_TASK_TYPE.to_string()),
            headers: http::configured_headers(config),
            poll_headers: config.string_map(&["headers", "poll_headers", "pollHeaders"]),
            extra_body: http::extra_body(config),
            knobs,
            task_id_path: config
                .string(&["taskIdPath", "task_id_path"])
                .unwrap_or_else(|| "task_id".to_string()),
            status_path: config
                .string(&["statusPath", "status_path"])
                .unwrap_or_else(|| "task_status".to_string()),
            request_id_paths: http::request_id_paths(config),
            response_url_paths: http::response_url_paths(config, MODELSCOPE_RESPONSE_URL_PATHS),
            timeout: http::request_timeout(config, MODELSCOPE_TIMEOUT_MS),
            poll_interval: Duration::from_millis(
                config
                    .positive_ms(&["pollIntervalMs", "poll_interval_ms"])
                    .unwrap_or(MODELSCOPE_POLL_INTERVAL_MS),
            ),
            poll_timeout: Duration::from_millis(
                config
                    .positive_ms(&["pollTimeoutMs", "poll_timeout_ms"])
                    .unwrap_or(MODELSCOPE_POLL_TIMEOUT_MS),
            ),
        })
    }

    pub fn submit_body(&self, request: &GenerateRequest) -> Result<Value, ProviderError> {
        let mut body = self.extra_body.clone();
        body.entry("model").or_insert_with(|| json!(self.model));
        let prompt = body
            .get("prompt")
            .and_then(value_to_string)
            .unwrap_or_else(|| request.prompt.clone())
            .trim()
            .to_string();
        if prompt.is_empty() {
            return Err(ProviderError::new(
                ErrorCode::ProviderRequestInvalid,
                format!("provider {} requires a non-empty prompt", self.name),
            ));
        }
        body.insert("prompt".into(), json!(prompt));

        for (key, value) in &self.knobs {
            body.entry(*key).or_insert_with(|| value.clone());
        }

        if !body.contains_key("image_url") {
            let mut found = IndexSet::new();
            for key in MODELSCOPE_REFERENCE_KEYS {
                if let Some(value) = body.get(*key) {
                    collect_image_candidates(value, &mut found);
                }
            }
            let references: Vec<String> = if found.is_empty() {
                request.reference_data_urls()
            } else {
                found.into_iter().collect()
            };
            if !references.is_empty() {
                body.insert("image_url".into(), json!(references));
            }
        }
        Ok(Value::Object(body))
    }
}

impl AsyncPollApi for ModelScopeApi {
    fn build_submit_request(&self, request: &GenerateRequest) -> Result<HttpRequest, ProviderError> {
        let mut http_request = HttpRequest::new(Method::Post, &self.submit_url, self.timeout);
        http_request.headers = http::merge_headers(
            vec![
                ("authorization".to_string(), format!("Bearer {}", self.api_key)),
                ("content-type".to_string(), "application/json".to_string()),
                ("x-modelscope-async-mode".to_string(), "true".to_string()),
            ],
            &self.headers,
        );
        http_request.body = RequestBody::Json(self.submit_body(request)?);
        Ok(http_request)
    }

    fn parse_submit_response(&self, response: &DecodedResponse) -> Result<SubmittedTask, ProviderError> {
        let request_id = response.request_id(&self.request_id_paths, &["x-request-id"]);
        let task_id = get_by_path(&response.body, &self.task_id_path)
            .and_then(value_to_string)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::new(
                    ErrorCode::ProviderSubmitParseError,
                    format!("provider {} submit response has no {}", self.name, self.task_id_path),
                )
                .with_request_id(request_id.clone())
                .with_details(response.body.clone())
            })?;
        Ok(SubmittedTask {
            task_id,
            request_id,
        })
    }

    fn build_poll_request(&self, task_id: &str) -> Result<HttpRequest, ProviderError> {
        let endpoint = self
            .poll_endpoint
            .replace("{taskId}", &encode_path_segment(task_id));
        let url = build_request_url(Some(&self.base_url), &endpoint, &self.name)?;
        let mut http_request = HttpRequest::new(Method::Get, url, self.timeout);
        http_request.headers = http::merge_headers(
            vec![
                ("authorization".to_string(), format!("Bearer {}", self.api_key)),
                ("x-modelscope-task-type".to_string(), self.task_type.clone()),
            ],
            &self.poll_headers,
        );
        Ok(http_request)
    }

    fn parse_poll_response(
        &self,
        response: &DecodedResponse,
        request_id: Option<String>,
    ) -> Result<PollUpdate, ProviderError> {
        let body = &response.body;
        let request_id = response
            .request_id(&self.request_id_paths, &["x-request-id"])
            .or(request_id);
        let Some(status) = first_string_by_paths(body, &[&self.status_path]) else {
            return Err(missing_status(&self.name, body, request_id));
        };

        let status = match MODELSCOPE_VOCABULARY.classify(&status) {
            Some(StatusClass::Pending) => PollStatus::InProgress,
            Some(StatusClass::Done) => {
                let image_url = resolve_image_url(body, &self.response_url_paths)
                    .ok_or_else(|| http::image_missing(&self.name, body, request_id.clone()))?;
                PollStatus::Completed(image_url)
            }
            Some(StatusClass::Failed) => PollStatus::Failed(
                first_string_by_paths(body, MODELSCOPE_ERROR_PATHS).unwrap_or_else(|| {
                    format!("provider {} task {}", self.name, status.to_ascii_uppercase())
                }),
            ),
            None => return Err(unknown_status(&self.name, &status, body, request_id)),
        };
        Ok(PollUpdate { status, request_id })
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

/// Adapter that drives any `AsyncPollApi` through submit and poll.
pub struct AsyncPollProvider<A: AsyncPollApi> {
    name: String,
    transport: Arc<dyn Transport>,
    api: A,
}

impl<A: AsyncPollApi> AsyncPollProvider<A> {
    pub fn new(
        name: &str,
        transport: Option<Arc<dyn Transport>>,
        api: A,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.to_string(),
            transport: http::require_transport(name, transport)?,
            api,
        })
    }

    pub fn api(&self) -> &A {
        &self.api
    }
}

impl AsyncPollProvider<HttpAsyncApi> {
    pub fn http_async(
        name: &str,
        config: &ProviderConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ProviderError> {
        Self::new(name, transport, HttpAsyncApi::from_config(name, config)?)
    }
}

impl AsyncPollProvider<ModelScopeApi> {
    pub fn modelscope(
        name: &str,
        config: &ProviderConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ProviderError> {
        Self::new(name, transport, ModelScopeApi::from_config(name, config)?)
    }
}

#[async_trait]
impl<A: AsyncPollApi> ProviderAdapter for AsyncPollProvider<A> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        poll: &PollOptions,
    ) -> Result<ProviderOutput, ProviderError> {
        let provider = self.name.as_str();
        let interval = poll
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.api.poll_interval());
        let timeout = poll
            .poll_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.api.poll_timeout());

        let submit_request = self.api.build_submit_request(request)?;
        let submitted = http::send(self.transport.as_ref(), provider, submit_request).await?;
        let task = self.api.parse_submit_response(&submitted)?;
        let started = Instant::now();

        tracing::info!(
            provider,
            task_id = task.task_id.as_str(),
            request_id = task.request_id.as_deref().unwrap_or(""),
            "image task submitted"
        );

        let mut request_id = task.request_id.clone();
        let mut attempt: u32 = 0;
        loop {
            tokio::time::sleep(interval).await;
            attempt += 1;

            let poll_request = self.api.build_poll_request(&task.task_id)?;
            let response = http::send(self.transport.as_ref(), provider, poll_request)
                .await
                .map_err(|mut e| {
                    if e.request_id.is_none() {
                        e.request_id = request_id.clone();
                    }
                    e
                })?;
            let update = self.api.parse_poll_response(&response, request_id.clone())?;
            request_id = update.request_id;

            match update.status {
                PollStatus::Completed(image_url) => {
                    tracing::info!(
                        provider,
                        task_id = task.task_id.as_str(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "image task completed"
                    );
                    return Ok(ProviderOutput::new(image_url, request_id));
                }
                PollStatus::Failed(message) => {
                    return Err(ProviderError::new(ErrorCode::ProviderTaskFailed, message)
                        .with_request_id(request_id)
                        .with_details(response.body));
                }
                PollStatus::InProgress => {
                    tracing::debug!(
                        provider,
                        task_id = task.task_id.as_str(),
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "image task still in progress"
                    );
                }
            }

            if started.elapsed() >= timeout {
                return Err(ProviderError::new(
                    ErrorCode::ProviderTimeout,
                    format!(
                        "provider {provider} task {} did not finish within {}ms",
                        task.task_id,
                        timeout.as_millis()
                    ),
                )
                .transient(true)
                .with_request_id(task.request_id.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabularies_ignore_case() {
        assert_eq!(HTTP_ASYNC_VOCABULARY.classify("DONE"), Some(StatusClass::Done));
        assert_eq!(HTTP_ASYNC_VOCABULARY.classify("In_Queue"), Some(StatusClass::Pending));
        assert_eq!(MODELSCOPE_VOCABULARY.classify("succeed"), Some(StatusClass::Done));
        assert_eq!(MODELSCOPE_VOCABULARY.classify("cancelled"), Some(StatusClass::Failed));
        assert_eq!(MODELSCOPE_VOCABULARY.classify("exploded"), None);
    }

    #[test]
    fn lora_map_requires_numeric_weights() {
        let config = ProviderConfig::from(json!({ "loras": { "repo/a": 0.8 } }));
        assert_eq!(lora_value(&config), Some(json!({ "repo/a": 0.8 })));

        let config = ProviderConfig::from(json!({ "loras": { "repo/a": "heavy" } }));
        assert_eq!(lora_value(&config), None);

        let config = ProviderConfig::from(json!({ "loras": " repo/b " }));
        assert_eq!(lora_value(&config), Some(json!("repo/b")));
    }

    #[test]
    fn http_async_requires_both_urls() {
        let config = ProviderConfig::from(json!({ "submit": { "url": "https://x/submit" } }));
        let err = HttpAsyncApi::from_config("job", &config).err().map(|e| e.code);
        assert_eq!(err, Some(ErrorCode::ProviderConfigInvalid));
    }
}
