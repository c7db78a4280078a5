pub mod aliyun;
pub mod async_poll;
pub mod fal;
pub mod http;
pub mod mock;
pub mod openai_compat;
pub mod registry;
pub mod volcengine;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::extract::dedupe_non_empty;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfieMode {
    #[default]
    Direct,
    Mirror,
}

impl SelfieMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "mirror" => Some(Self::Mirror),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Mirror => "mirror",
        }
    }
}

impl fmt::Display for SelfieMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    /// Time-state key the request was generated under.
    pub state: String,
    pub role_name: String,
    pub event_source: String,
}

/// Input to every provider. Built once per pipeline call and shared
/// unchanged across provider attempts.
///
/// Reference images are carried both as a single value and as a list, in
/// three encodings, so each adapter can take whichever its vendor wants.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub character_id: String,
    pub prompt: String,
    pub mode: SelfieMode,
    pub reference_image_path: Option<PathBuf>,
    pub reference_image_paths: Vec<PathBuf>,
    pub reference_image_base64: Option<String>,
    pub reference_images_base64: Vec<String>,
    pub reference_image_data_url: Option<String>,
    pub reference_image_data_urls: Vec<String>,
    pub time_state: String,
    pub meta: RequestMeta,
}

impl GenerateRequest {
    pub fn new(character_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            character_id: character_id.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Attach reference images given as parallel base64 / data-URL lists.
    pub fn with_references(
        mut self,
        paths: Vec<PathBuf>,
        base64: Vec<String>,
        data_urls: Vec<String>,
    ) -> Self {
        self.reference_image_path = paths.first().cloned();
        self.reference_image_base64 = base64.first().cloned();
        self.reference_image_data_url = data_urls.first().cloned();
        self.reference_image_paths = paths;
        self.reference_images_base64 = base64;
        self.reference_image_data_urls = data_urls;
        self
    }

    /// All reference images as data URLs: the list when present, else the
    /// single value. Deduplicated, order preserved.
    pub fn reference_data_urls(&self) -> Vec<String> {
        if self.reference_image_data_urls.is_empty() {
            dedupe_non_empty(self.reference_image_data_url.iter())
        } else {
            dedupe_non_empty(&self.reference_image_data_urls)
        }
    }

    /// All reference images as raw base64, same precedence as
    /// `reference_data_urls`.
    pub fn reference_base64s(&self) -> Vec<String> {
        if self.reference_images_base64.is_empty() {
            dedupe_non_empty(self.reference_image_base64.iter())
        } else {
            dedupe_non_empty(&self.reference_images_base64)
        }
    }
}

/// Runtime poll overrides. `None` falls through to the provider's own
/// configuration, then to the adapter default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOptions {
    pub poll_interval_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
}

/// Normalized result of one provider call. A missing `image_url` is not a
/// success; the pipeline turns it into `PROVIDER_IMAGE_URL_MISSING`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOutput {
    pub image_url: Option<String>,
    pub request_id: Option<String>,
}

impl ProviderOutput {
    pub fn new(image_url: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            image_url: Some(image_url.into()),
            request_id,
        }
    }
}

/// One image-generation backend behind the uniform contract.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// False for placeholders of providers whose construction failed.
    fn available(&self) -> bool {
        true
    }

    fn unavailable_reason(&self) -> Option<&str> {
        None
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        poll: &PollOptions,
    ) -> Result<ProviderOutput, ProviderError>;
}
