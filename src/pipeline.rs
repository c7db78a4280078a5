//! The selfie generation pipeline: character → time state → provider order
//! → sequential attempts with per-provider retry, fallback and degrade.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime};

use crate::characters::{self, CharacterLookup};
use crate::config::{ClawmateConfig, load_config};
use crate::dispatch::registry::{ProviderRegistry, create_provider_registry};
use crate::dispatch::{GenerateRequest, RequestMeta, SelfieMode};
use crate::error::{ClawmateError, ErrorCode, ProviderError};
use crate::response::{GenerateSelfieResult, SelfieFailure, SelfieSuccess};
use crate::router::build_provider_order;
use crate::time_state::resolve_time_state;
use crate::transport::{ReqwestTransport, Transport};

pub const DEFAULT_EVENT_SOURCE: &str = "skill";

/// Everything one `generate_selfie` call may take from the caller. Unset
/// fields fall back to the loaded config, the process environment, or
/// production defaults.
#[derive(Clone, Default)]
pub struct GenerateSelfieOptions {
    /// Use this config instead of loading one.
    pub config: Option<ClawmateConfig>,
    pub config_path: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub character_id: Option<String>,
    pub provider: Option<String>,
    pub prompt: Option<String>,
    pub mode: Option<SelfieMode>,
    pub event_source: Option<String>,
    /// Prebuilt adapters. When unset a registry is built from the config.
    pub registry: Option<ProviderRegistry>,
    pub transport: Option<Arc<dyn Transport>>,
    /// Local time of day used for the time state.
    pub now: Option<NaiveTime>,
}

/// Run one generation.
///
/// Provider failures never surface as `Err`: once the provider order is
/// known, the result is either a success or a degraded failure. `Err` is
/// reserved for problems found before any provider is tried (config,
/// character assets, routing).
pub async fn generate_selfie(options: GenerateSelfieOptions) -> Result<GenerateSelfieResult, ClawmateError> {
    let cwd = match options.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir()?,
    };
    let config = match options.config {
        Some(config) => config,
        None => load_config(options.config_path.as_deref(), &cwd).await?.config,
    };

    let character_id = options
        .character_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| config.selected_character.clone());
    let character = characters::load_character_assets(CharacterLookup {
        character_id: &character_id,
        character_root: &config.character_root,
        user_character_root: Some(&config.user_character_root),
        cwd: &cwd,
        allow_missing_reference: true,
    })
    .await?;

    let reference_paths = character.reference_paths.clone();
    let (reference_base64, reference_data_urls) = if reference_paths.is_empty() {
        tracing::warn!(
            character = character_id.as_str(),
            "character has no reference images, generating from prompt only"
        );
        (Vec::new(), Vec::new())
    } else {
        let base64 = characters::read_reference_images_base64(&reference_paths).await?;
        let data_urls = reference_paths
            .iter()
            .zip(&base64)
            .map(|(path, encoded)| characters::reference_data_url(path, encoded))
            .collect();
        (base64, data_urls)
    };

    let now = options.now.unwrap_or_else(|| Local::now().time());
    let time_state = resolve_time_state(character.time_states(), now);
    tracing::debug!(
        time_state = time_state.key.as_str(),
        hints = ?time_state.scene_hints(),
        "time state resolved"
    );

    let mode = options.mode.unwrap_or_default();
    let prompt = options.prompt.unwrap_or_default();

    let registry = match options.registry {
        Some(registry) => registry,
        None => {
            let transport = options
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
            create_provider_registry(&config.providers, Some(transport))
        }
    };
    let provider_order = build_provider_order(
        options.provider.as_deref(),
        &config,
        &registry.available_names(),
    )?;

    let mut request = GenerateRequest::new(&character_id, &prompt).with_references(
        reference_paths,
        reference_base64,
        reference_data_urls,
    );
    request.mode = mode;
    request.time_state = time_state.key.clone();
    request.meta = RequestMeta {
        state: time_state.key.clone(),
        role_name: character.display_name().to_string(),
        event_source: options
            .event_source
            .unwrap_or_else(|| DEFAULT_EVENT_SOURCE.to_string()),
    };

    let outcome = run_providers(&config, &registry, &provider_order, &request).await;
    Ok(match outcome {
        Ok((provider, image_url, request_id)) => GenerateSelfieResult::Success(SelfieSuccess {
            provider,
            request_id,
            image_url,
            prompt,
            mode,
            character_id,
            time_state: time_state.key,
        }),
        Err(last_error) => GenerateSelfieResult::Failure(SelfieFailure {
            provider: provider_order.last().cloned(),
            request_id: last_error.as_ref().and_then(|e| e.request_id.clone()),
            message: config.degrade_message.clone(),
            error: last_error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown".to_string()),
        }),
    })
}

type Generated = (String, String, Option<String>);

/// Try providers strictly in order. Returns the winning provider, image and
/// request id, or the last error once the chain is exhausted.
async fn run_providers(
    config: &ClawmateConfig,
    registry: &ProviderRegistry,
    provider_order: &[String],
    request: &GenerateRequest,
) -> Result<Generated, Option<ProviderError>> {
    let max_attempts = config.retry.max_attempts.max(1);
    let mut last_error: Option<ProviderError> = None;

    for (index, provider_name) in provider_order.iter().enumerate() {
        let Some(provider) = registry.get(provider_name) else {
            last_error = Some(ProviderError::new(
                ErrorCode::ProviderNotFound,
                format!("provider not found: {provider_name}"),
            ));
            continue;
        };
        let poll = config.poll_options_for(provider_name);

        let mut attempt_error = None;
        for attempt in 1..=max_attempts {
            tracing::info!(
                provider = provider.name(),
                attempt,
                max_attempts,
                mode = request.mode.as_str(),
                time_state = request.time_state.as_str(),
                prompt = request.prompt.as_str(),
                "calling provider"
            );
            let start = Instant::now();

            let result = provider.generate(request, &poll).await.and_then(|output| {
                match output.image_url.filter(|url| !url.is_empty()) {
                    Some(url) => Ok((url, output.request_id)),
                    None => Err(ProviderError::new(
                        ErrorCode::ProviderImageUrlMissing,
                        format!("provider {} returned success without an image URL", provider.name()),
                    )
                    .with_request_id(output.request_id)),
                }
            });

            match result {
                Ok((image_url, request_id)) => {
                    tracing::info!(
                        provider = provider_name.as_str(),
                        request_id = request_id.as_deref(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "image generated"
                    );
                    return Ok((provider_name.clone(), image_url, request_id));
                }
                Err(e) => {
                    let can_retry = e.is_retryable() && attempt < max_attempts;
                    tracing::warn!(
                        provider = provider.name(),
                        attempt,
                        can_retry,
                        code = e.code.as_str(),
                        request_id = e.request_id.as_deref(),
                        details = ?e.details,
                        "provider attempt failed: {}",
                        e.message
                    );
                    attempt_error = Some(e);
                    if !can_retry {
                        break;
                    }
                    let backoff = config.retry.backoff_ms.saturating_mul(u64::from(attempt));
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }

        let error = attempt_error.unwrap_or_else(|| {
            ProviderError::new(ErrorCode::ProviderUnknown, "unknown provider error")
        });
        tracing::error!(
            provider = provider_name.as_str(),
            code = error.code.as_str(),
            transient = error.transient,
            request_id = error.request_id.as_deref(),
            details = ?error.details,
            "provider exhausted: {}",
            error.message
        );
        last_error = Some(error);

        let is_last = index + 1 == provider_order.len();
        if is_last || !config.fallback.enabled {
            break;
        }
    }

    Err(last_error)
}
