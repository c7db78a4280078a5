use std::env;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::PollOptions;
use crate::error::ClawmateError;

pub const DEFAULT_CONFIG_PATH: &str = "config/clawmate.config.json";
pub const DEFAULT_SELECTED_CHARACTER: &str = "brooke";
pub const DEFAULT_CHARACTER_ROOT: &str = "skills/clawmate-companion/assets/characters";
pub const DEFAULT_DEGRADE_MESSAGE: &str =
    "I couldn't take a picture right now, let's keep chatting for a bit.";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_BACKOFF_MS: u64 = 500;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1200;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 180_000;
pub const DEFAULT_PROACTIVE_PROBABILITY: f64 = 0.1;

/// Loosely-typed configuration for one provider.
///
/// Vendors disagree on naming, so every accessor takes a list of keys and
/// returns the first one present (`["apiKey", "api_key"]`). Accessors never
/// fail; a wrongly-typed value reads as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderConfig(Map<String, Value>);

impl ProviderConfig {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Accepts only JSON objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| !v.is_null())
    }

    /// First non-null value among `keys`.
    pub fn raw(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|key| self.0.get(*key))
            .find(|value| !value.is_null())
    }

    /// Trimmed, non-empty string. Numbers are accepted and stringified.
    pub fn string(&self, keys: &[&str]) -> Option<String> {
        let text = match self.raw(keys)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn number(&self, keys: &[&str]) -> Option<f64> {
        self.raw(keys)?.as_f64().filter(|n| n.is_finite())
    }

    /// Positive millisecond value, rounded up to a whole millisecond.
    pub fn positive_ms(&self, keys: &[&str]) -> Option<u64> {
        self.number(keys)
            .filter(|n| *n > 0.0)
            .map(|n| n.ceil() as u64)
    }

    pub fn boolean(&self, keys: &[&str]) -> Option<bool> {
        self.raw(keys)?.as_bool()
    }

    /// Non-empty string entries of every object found under `keys`,
    /// merged in key order so later keys override earlier ones.
    pub fn string_map(&self, keys: &[&str]) -> IndexMap<String, String> {
        let mut merged = IndexMap::new();
        for key in keys {
            if let Some(Value::Object(entries)) = self.0.get(*key) {
                for (name, value) in entries {
                    if let Some(text) = value.as_str().filter(|s| !s.is_empty()) {
                        merged.insert(name.clone(), text.to_string());
                    }
                }
            }
        }
        merged
    }

    /// Every object found under `keys`, merged in key order.
    pub fn object(&self, keys: &[&str]) -> Map<String, Value> {
        let mut merged = Map::new();
        for key in keys {
            if let Some(Value::Object(entries)) = self.0.get(*key) {
                for (name, value) in entries {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }
        merged
    }

    /// Non-empty strings of the first array found under `keys`.
    pub fn string_list(&self, keys: &[&str]) -> Vec<String> {
        match self.raw(keys) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Declared provider type, lowercased.
    pub fn declared_type(&self) -> Option<String> {
        self.string(&["type"]).map(|t| t.to_lowercase())
    }
}

impl From<Value> for ProviderConfig {
    fn from(value: Value) -> Self {
        Self::from_value(value).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub enabled: bool,
    pub order: Vec<String>,
}

/// Retries apply per provider, not across the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProactiveSelfieConfig {
    pub enabled: bool,
    /// Per-message trigger probability in [0, 1].
    pub probability: f64,
}

impl Default for ProactiveSelfieConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: DEFAULT_PROACTIVE_PROBABILITY,
        }
    }
}

/// Normalized root configuration. Always well-formed: `normalize_config`
/// substitutes defaults for anything missing or malformed.
#[derive(Debug, Clone)]
pub struct ClawmateConfig {
    pub selected_character: String,
    pub character_root: PathBuf,
    pub user_character_root: PathBuf,
    pub default_provider: Option<String>,
    pub fallback: FallbackPolicy,
    pub retry: RetryPolicy,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub degrade_message: String,
    pub providers: IndexMap<String, ProviderConfig>,
    pub proactive_selfie: ProactiveSelfieConfig,
}

impl Default for ClawmateConfig {
    fn default() -> Self {
        normalize_config(&Value::Null)
    }
}

impl ClawmateConfig {
    /// Poll settings for one provider: its own positive values, else the
    /// global defaults.
    pub fn poll_options_for(&self, provider: &str) -> PollOptions {
        let provider_config = self.providers.get(provider);
        PollOptions {
            poll_interval_ms: Some(
                provider_config
                    .and_then(|c| c.positive_ms(&["pollIntervalMs", "poll_interval_ms"]))
                    .unwrap_or(self.poll_interval_ms),
            ),
            poll_timeout_ms: Some(
                provider_config
                    .and_then(|c| c.positive_ms(&["pollTimeoutMs", "poll_timeout_ms"]))
                    .unwrap_or(self.poll_timeout_ms),
            ),
        }
    }
}

/// `$OPENCLAW_HOME/clawmeta`, else `~/.openclaw/clawmeta`.
pub fn default_user_character_root() -> PathBuf {
    if let Some(home) = env::var("OPENCLAW_HOME")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return PathBuf::from(home).join("clawmeta");
    }
    let home = directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".openclaw").join("clawmeta")
}

fn non_empty_str<'a>(source: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    source.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn finite(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn normalize_fallback(value: Option<&Value>) -> FallbackPolicy {
    let Some(Value::Object(source)) = value else {
        return FallbackPolicy::default();
    };
    let enabled = match source.get("enabled") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    };
    let order = match source.get("order") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    FallbackPolicy { enabled, order }
}

fn normalize_retry(value: Option<&Value>) -> RetryPolicy {
    let Some(Value::Object(source)) = value else {
        return RetryPolicy::default();
    };
    let max_attempts = finite(source.get("maxAttempts"))
        .filter(|n| *n > 0.0 && n.fract() == 0.0)
        .map(|n| n.min(u32::MAX as f64) as u32)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);
    let backoff_ms = finite(source.get("backoffMs"))
        .filter(|n| *n > 0.0)
        .map(|n| n.ceil() as u64)
        .unwrap_or(DEFAULT_BACKOFF_MS);
    RetryPolicy {
        max_attempts,
        backoff_ms,
    }
}

fn normalize_providers(value: Option<&Value>) -> IndexMap<String, ProviderConfig> {
    let Some(Value::Object(source)) = value else {
        return IndexMap::new();
    };
    source
        .iter()
        .filter_map(|(name, raw)| {
            ProviderConfig::from_value(raw.clone()).map(|config| (name.clone(), config))
        })
        .collect()
}

fn normalize_proactive_selfie(value: Option<&Value>) -> ProactiveSelfieConfig {
    let Some(Value::Object(source)) = value else {
        return ProactiveSelfieConfig::default();
    };
    ProactiveSelfieConfig {
        enabled: source.get("enabled").and_then(Value::as_bool).unwrap_or(false),
        probability: finite(source.get("probability"))
            .filter(|p| (0.0..=1.0).contains(p))
            .unwrap_or(DEFAULT_PROACTIVE_PROBABILITY),
    }
}

/// Coerce persisted configuration into `ClawmateConfig`. Never fails.
pub fn normalize_config(raw: &Value) -> ClawmateConfig {
    let empty = Map::new();
    let source = raw.as_object().unwrap_or(&empty);
    let providers = normalize_providers(source.get("providers"));

    let default_provider = non_empty_str(source, "defaultProvider")
        .map(str::to_string)
        .or_else(|| providers.keys().next().cloned())
        .unwrap_or_else(|| "mock".to_string());

    ClawmateConfig {
        selected_character: non_empty_str(source, "selectedCharacter")
            .unwrap_or(DEFAULT_SELECTED_CHARACTER)
            .to_string(),
        character_root: PathBuf::from(
            non_empty_str(source, "characterRoot").unwrap_or(DEFAULT_CHARACTER_ROOT),
        ),
        user_character_root: non_empty_str(source, "userCharacterRoot")
            .map(PathBuf::from)
            .unwrap_or_else(default_user_character_root),
        default_provider: Some(default_provider),
        fallback: normalize_fallback(source.get("fallback")),
        retry: normalize_retry(source.get("retry")),
        poll_interval_ms: finite(source.get("pollIntervalMs"))
            .filter(|n| *n > 0.0)
            .map(|n| n.ceil() as u64)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        poll_timeout_ms: finite(source.get("pollTimeoutMs"))
            .filter(|n| *n > 0.0)
            .map(|n| n.ceil() as u64)
            .unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
        degrade_message: non_empty_str(source, "degradeMessage")
            .unwrap_or(DEFAULT_DEGRADE_MESSAGE)
            .to_string(),
        providers,
        proactive_selfie: normalize_proactive_selfie(source.get("proactiveSelfie")),
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: ClawmateConfig,
}

/// Resolve the config path: explicit → `CLAWMATE_CONFIG` → default under `cwd`.
pub fn resolve_config_path(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env::var("CLAWMATE_CONFIG")
        .ok()
        .filter(|v| !v.trim().is_empty())
    {
        return PathBuf::from(path);
    }
    cwd.join(DEFAULT_CONFIG_PATH)
}

/// Parse config text. `.toml` files are TOML, everything else is JSON.
pub fn parse_config_text(path: &Path, text: &str) -> Result<Value, ClawmateError> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str::<Value>(text).map_err(|e| ClawmateError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    } else {
        serde_json::from_str::<Value>(text).map_err(|e| ClawmateError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

pub async fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<LoadedConfig, ClawmateError> {
    let path = resolve_config_path(explicit, cwd);
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ClawmateError::ConfigNotFound {
            path: path.clone(),
            source,
        })?;
    let raw = parse_config_text(&path, &text)?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(LoadedConfig {
        config: normalize_config(&raw),
        path,
    })
}
