use std::fmt;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Stable identifiers for provider failures. The pipeline's retry and
/// fallback decisions depend on `ProviderError::transient`, not on the code;
/// codes exist for diagnostics and for callers that want to branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ProviderConfigInvalid,
    ProviderTypeUnsupported,
    ProviderFetchMissing,
    ProviderRequestInvalid,
    ProviderHttpFailed,
    ProviderTimeout,
    ProviderSubmitParseError,
    ProviderPollParseError,
    ProviderTaskFailed,
    ProviderImageUrlMissing,
    ProviderParseError,
    ProviderNotFound,
    ProviderUnknown,
    MockSubmitFailed,
    MockPollFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderConfigInvalid => "PROVIDER_CONFIG_INVALID",
            Self::ProviderTypeUnsupported => "PROVIDER_TYPE_UNSUPPORTED",
            Self::ProviderFetchMissing => "PROVIDER_FETCH_MISSING",
            Self::ProviderRequestInvalid => "PROVIDER_REQUEST_INVALID",
            Self::ProviderHttpFailed => "PROVIDER_HTTP_FAILED",
            Self::ProviderTimeout => "PROVIDER_TIMEOUT",
            Self::ProviderSubmitParseError => "PROVIDER_SUBMIT_PARSE_ERROR",
            Self::ProviderPollParseError => "PROVIDER_POLL_PARSE_ERROR",
            Self::ProviderTaskFailed => "PROVIDER_TASK_FAILED",
            Self::ProviderImageUrlMissing => "PROVIDER_IMAGE_URL_MISSING",
            Self::ProviderParseError => "PROVIDER_PARSE_ERROR",
            Self::ProviderNotFound => "PROVIDER_NOT_FOUND",
            Self::ProviderUnknown => "PROVIDER_UNKNOWN",
            Self::MockSubmitFailed => "MOCK_SUBMIT_FAILED",
            Self::MockPollFailed => "MOCK_POLL_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single provider operation, carried as plain data.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub code: ErrorCode,
    pub message: String,
    pub transient: bool,
    pub request_id: Option<String>,
    /// Full vendor payload for logs. Never surfaced to end users.
    pub details: Option<Value>,
}

impl ProviderError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            transient: false,
            request_id: None,
            details: None,
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderConfigInvalid, message)
    }

    pub fn fetch_missing(provider: &str) -> Self {
        Self::new(
            ErrorCode::ProviderFetchMissing,
            format!("provider {provider} has no HTTP transport"),
        )
    }

    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.transient
    }
}

/// Errors raised before any provider is attempted: routing, configuration
/// and character asset failures.
#[derive(Debug, Error)]
pub enum ClawmateError {
    #[error("no provider available")]
    NoProviderAvailable,

    #[error("explicitly requested provider is unavailable: {0}")]
    ExplicitProviderUnavailable(String),

    #[error("no default provider configured")]
    DefaultProviderMissing,

    #[error("default provider is unavailable: {0}")]
    DefaultProviderUnavailable(String),

    #[error("cannot read config file {path}: {source}")]
    ConfigNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("character id is required")]
    CharacterIdRequired,

    #[error("character not found: {character_id}")]
    CharacterNotFound {
        character_id: String,
        searched: Vec<PathBuf>,
    },

    #[error("character asset missing: {label} ({})", path.display())]
    CharacterAssetMissing { label: String, path: PathBuf },

    #[error("failed to parse character meta.json for {character_id}: {message}")]
    CharacterMetaParse {
        character_id: String,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClawmateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoProviderAvailable => "NO_PROVIDER_AVAILABLE",
            Self::ExplicitProviderUnavailable(_) => "EXPLICIT_PROVIDER_UNAVAILABLE",
            Self::DefaultProviderMissing => "DEFAULT_PROVIDER_MISSING",
            Self::DefaultProviderUnavailable(_) => "DEFAULT_PROVIDER_UNAVAILABLE",
            Self::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            Self::ConfigParse { .. } => "CONFIG_PARSE_ERROR",
            Self::CharacterIdRequired => "CHARACTER_ID_REQUIRED",
            Self::CharacterNotFound { .. } => "CHARACTER_NOT_FOUND",
            Self::CharacterAssetMissing { .. } => "CHARACTER_ASSET_MISSING",
            Self::CharacterMetaParse { .. } => "CHARACTER_META_PARSE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}
