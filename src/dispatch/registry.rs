use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;

use crate::config::ProviderConfig;
use crate::dispatch::aliyun::{self, AliyunProvider};
use crate::dispatch::async_poll::AsyncPollProvider;
use crate::dispatch::fal::FalProvider;
use crate::dispatch::mock::{MockOptions, MockProvider};
use crate::dispatch::openai_compat::OpenAiCompatProvider;
use crate::dispatch::volcengine::VolcengineProvider;
use crate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter, ProviderOutput};
use crate::error::{ErrorCode, ProviderError};
use crate::transport::Transport;

/// Base-URL hosts that identify the DashScope vendor.
static DASHSCOPE_HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dashscope(-intl|-us)?\.aliyuncs\.com").unwrap());

const DASHSCOPE_ENDPOINTS: &[&str] = &[
    "/services/aigc/multimodal-generation/generation",
    "/services/aigc/image-generation/generation",
];

/// Discriminant for provider adapters. Prevents invalid states: every
/// configured provider resolves to exactly one of these or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Mock,
    Volcengine,
    Aliyun,
    OpenAiCompatible,
    Fal,
    HttpAsync,
    ModelScope,
}

impl ProviderKind {
    /// Resolve a declared type or provider name. Unknown names are `None`.
    pub fn from_alias(alias: &str) -> Option<Self> {
        match alias.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "volcengine" | "volcengine-ark" | "ark" => Some(Self::Volcengine),
            "aliyun" | "dashscope" => Some(Self::Aliyun),
            "openai-compatible" => Some(Self::OpenAiCompatible),
            "fal" => Some(Self::Fal),
            "http-async" => Some(Self::HttpAsync),
            "modelscope" => Some(Self::ModelScope),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Volcengine => "volcengine",
            Self::Aliyun => "aliyun",
            Self::OpenAiCompatible => "openai-compatible",
            Self::Fal => "fal",
            Self::HttpAsync => "http-async",
            Self::ModelScope => "modelscope",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide which adapter a provider config belongs to.
///
/// Order: declared `type`, then the provider name as an alias, then the
/// shape of `apiKey`/`model`/`endpoint`/`baseUrl`, then `submit`/`poll`
/// sub-objects. Pure; never touches the network.
pub fn classify_provider(name: &str, config: &ProviderConfig) -> Result<ProviderKind, ProviderError> {
    if let Some(declared) = config.declared_type() {
        return ProviderKind::from_alias(&declared).ok_or_else(|| {
            ProviderError::new(
                ErrorCode::ProviderTypeUnsupported,
                format!("provider {name} has unsupported type {declared}"),
            )
        });
    }

    if let Some(kind) = ProviderKind::from_alias(name) {
        return Ok(kind);
    }

    let api_key = config.string(&["apiKey", "api_key"]);
    let model = config.string(&["model"]).map(|m| m.to_ascii_lowercase());
    let endpoint = config
        .string(&["endpoint"])
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let base_url = config
        .string(&["baseUrl", "base_url"])
        .map(|b| b.to_ascii_lowercase())
        .unwrap_or_default();

    if let (Some(_), Some(model)) = (api_key, model) {
        if aliyun::is_vendor_model(&model)
            || DASHSCOPE_ENDPOINTS.iter().any(|e| endpoint.contains(e))
            || DASHSCOPE_HOST_RE.is_match(&base_url)
        {
            return Ok(ProviderKind::Aliyun);
        }
        if base_url.contains("modelscope") || endpoint.contains("modelscope") {
            return Ok(ProviderKind::ModelScope);
        }
        if endpoint.contains("/images/edits") {
            return Ok(ProviderKind::OpenAiCompatible);
        }
        if endpoint.contains("/images/generations") {
            return Ok(ProviderKind::Volcengine);
        }
        if base_url.contains("fal.run") {
            return Ok(ProviderKind::Fal);
        }
    }

    if config.has("submit") || config.has("poll") {
        return Ok(ProviderKind::HttpAsync);
    }

    Err(ProviderError::config_invalid(format!(
        "provider {name} has no type and none could be inferred"
    )))
}

/// Build one adapter. Errors are construction failures for this provider only.
pub fn create_provider(
    name: &str,
    config: &ProviderConfig,
    transport: Option<Arc<dyn Transport>>,
) -> Result<(ProviderKind, Arc<dyn ProviderAdapter>), ProviderError> {
    let kind = classify_provider(name, config)?;
    let adapter: Arc<dyn ProviderAdapter> = match kind {
        ProviderKind::Mock => Arc::new(MockProvider::from_config(name, config)),
        ProviderKind::Volcengine => Arc::new(VolcengineProvider::from_config(name, config, transport)?),
        ProviderKind::Aliyun => Arc::new(AliyunProvider::from_config(name, config, transport)?),
        ProviderKind::OpenAiCompatible => {
            Arc::new(OpenAiCompatProvider::from_config(name, config, transport)?)
        }
        ProviderKind::Fal => Arc::new(FalProvider::from_config(name, config, transport)?),
        ProviderKind::HttpAsync => Arc::new(AsyncPollProvider::http_async(name, config, transport)?),
        ProviderKind::ModelScope => Arc::new(AsyncPollProvider::modelscope(name, config, transport)?),
    };
    Ok((kind, adapter))
}

/// Stands in for a provider whose construction failed. Lookups succeed;
/// every `generate` fails with the recorded reason.
pub struct UnavailableProvider {
    name: String,
    code: ErrorCode,
    reason: String,
}

impl UnavailableProvider {
    pub fn new(name: impl Into<String>, error: &ProviderError) -> Self {
        Self {
            name: name.into(),
            code: error.code,
            reason: error.message.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for UnavailableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        false
    }

    fn unavailable_reason(&self) -> Option<&str> {
        Some(&self.reason)
    }

    async fn generate(
        &self,
        _request: &GenerateRequest,
        _poll: &PollOptions,
    ) -> Result<ProviderOutput, ProviderError> {
        Err(ProviderError::new(self.code, self.reason.clone()))
    }
}

#[derive(Clone)]
pub struct RegistryEntry {
    /// `None` for adapters injected directly rather than built from config.
    pub kind: Option<ProviderKind>,
    pub adapter: Arc<dyn ProviderAdapter>,
}

/// Name → adapter map, in configuration order. Read-only once built.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: IndexMap<String, RegistryEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.insert_entry(None, adapter);
    }

    fn insert_entry(&mut self, kind: Option<ProviderKind>, adapter: Arc<dyn ProviderAdapter>) {
        self.entries
            .insert(adapter.name().to_string(), RegistryEntry { kind, adapter });
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.entries.get(name).map(|entry| &entry.adapter)
    }

    pub fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegistryEntry)> {
        self.entries.iter()
    }

    /// Names of providers that were built successfully, in order.
    pub fn available_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.adapter.available())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (name, entry) in &self.entries {
            list.entry(&(
                name,
                entry.kind.map(|k| k.as_str()),
                entry.adapter.available(),
            ));
        }
        list.finish()
    }
}

/// Build every configured provider. Never fails: a provider that cannot be
/// built is kept as an unavailable placeholder, and an empty config yields a
/// single mock provider.
pub fn create_provider_registry(
    providers: &IndexMap<String, ProviderConfig>,
    transport: Option<Arc<dyn Transport>>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if providers.is_empty() {
        registry.insert_entry(
            Some(ProviderKind::Mock),
            Arc::new(MockProvider::new("mock", MockOptions::default())),
        );
        return registry;
    }

    for (name, config) in providers {
        match create_provider(name, config, transport.clone()) {
            Ok((kind, adapter)) => registry.insert_entry(Some(kind), adapter),
            Err(e) => {
                tracing::warn!(
                    provider = name.as_str(),
                    code = e.code.as_str(),
                    "provider unavailable: {}",
                    e.message
                );
                let kind = classify_provider(name, config).ok();
                registry.insert_entry(kind, Arc::new(UnavailableProvider::new(name, &e)));
            }
        }
    }

    registry
}
