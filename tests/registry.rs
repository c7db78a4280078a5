//! Provider type resolution and per-provider failure isolation.

mod common;

use indexmap::IndexMap;
use serde_json::{Value, json};

use clawmate::config::ProviderConfig;
use clawmate::dispatch::registry::{ProviderKind, classify_provider, create_provider_registry};
use clawmate::dispatch::{GenerateRequest, PollOptions};
use clawmate::error::ErrorCode;

use common::{FakeTransport, transport};

fn providers(value: Value) -> IndexMap<String, ProviderConfig> {
    value
        .as_object()
        .unwrap()
        .iter()
        .map(|(name, raw)| (name.clone(), ProviderConfig::from(raw.clone())))
        .collect()
}

fn kind(name: &str, raw: Value) -> Result<ProviderKind, ErrorCode> {
    classify_provider(name, &ProviderConfig::from(raw)).map_err(|e| e.code)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[test]
fn declared_type_wins_and_is_case_insensitive() {
    assert_eq!(kind("anything", json!({"type": "FAL"})), Ok(ProviderKind::Fal));
    assert_eq!(
        kind("fal", json!({"type": "volcengine-ark"})),
        Ok(ProviderKind::Volcengine)
    );
    assert_eq!(
        kind("x", json!({"type": "midjourney"})),
        Err(ErrorCode::ProviderTypeUnsupported)
    );
}

#[test]
fn provider_name_is_an_alias() {
    assert_eq!(kind("mock", json!({})), Ok(ProviderKind::Mock));
    assert_eq!(kind("ark", json!({})), Ok(ProviderKind::Volcengine));
    assert_eq!(kind("Aliyun", json!({})), Ok(ProviderKind::Aliyun));
    assert_eq!(kind("http-async", json!({})), Ok(ProviderKind::HttpAsync));
    assert_eq!(kind("modelscope", json!({})), Ok(ProviderKind::ModelScope));
}

#[test]
fn structure_infers_vendor() {
    let key = |extra: Value| {
        let mut base = json!({"apiKey": "k", "model": "m"});
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        base
    };
    assert_eq!(
        kind("p", key(json!({"model": "wan2.6-image"}))),
        Ok(ProviderKind::Aliyun)
    );
    assert_eq!(
        kind("p", key(json!({"model": "qwen-image-edit-plus"}))),
        Ok(ProviderKind::Aliyun)
    );
    assert_eq!(
        kind("p", key(json!({"baseUrl": "https://dashscope-intl.aliyuncs.com/api/v1"}))),
        Ok(ProviderKind::Aliyun)
    );
    assert_eq!(
        kind("p", key(json!({"baseUrl": "https://api-inference.modelscope.cn/v1"}))),
        Ok(ProviderKind::ModelScope)
    );
    assert_eq!(
        kind(
            "ms",
            key(json!({
                "model": "Qwen/Qwen-Image",
                "endpoint": "https://api-inference.modelscope.cn/v1/images/generations"
            }))
        ),
        Ok(ProviderKind::ModelScope)
    );
    assert_eq!(
        kind("p", key(json!({"endpoint": "/v1/images/edits"}))),
        Ok(ProviderKind::OpenAiCompatible)
    );
    assert_eq!(
        kind("p", key(json!({"endpoint": "/api/v3/images/generations"}))),
        Ok(ProviderKind::Volcengine)
    );
    assert_eq!(
        kind("p", key(json!({"baseUrl": "https://fal.run"}))),
        Ok(ProviderKind::Fal)
    );
}

#[test]
fn submit_or_poll_objects_mean_http_async() {
    assert_eq!(
        kind("job", json!({"submit": {"url": "https://x/s"}})),
        Ok(ProviderKind::HttpAsync)
    );
    assert_eq!(
        kind("job", json!({"apiKey": "k", "model": "m", "poll": {}})),
        Ok(ProviderKind::HttpAsync)
    );
}

#[test]
fn uninferable_config_is_invalid() {
    assert_eq!(
        kind("mystery", json!({"apiKey": "k"})),
        Err(ErrorCode::ProviderConfigInvalid)
    );
}

// ---------------------------------------------------------------------------
// Registry construction
// ---------------------------------------------------------------------------

#[test]
fn empty_config_yields_single_mock() {
    let registry = create_provider_registry(&IndexMap::new(), None);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.available_names(), vec!["mock".to_string()]);
    assert_eq!(registry.entry("mock").unwrap().kind, Some(ProviderKind::Mock));
}

#[tokio::test]
async fn bad_provider_is_isolated_and_others_still_build() {
    let fake = FakeTransport::new();
    let registry = create_provider_registry(
        &providers(json!({
            "volcengine": {"apiKey": "k"},
            "mock": {"pendingPolls": 0},
            "mystery": {"foo": "bar"},
        })),
        transport(&fake),
    );

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.available_names(), vec!["mock".to_string()]);

    let broken = registry.get("volcengine").unwrap();
    assert!(!broken.available());
    let reason = broken.unavailable_reason().unwrap();
    assert!(reason.contains("model"), "reason: {reason}");
    assert_eq!(
        registry.entry("volcengine").unwrap().kind,
        Some(ProviderKind::Volcengine)
    );

    let err = broken
        .generate(&GenerateRequest::new("c", "p"), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderConfigInvalid);
    assert!(!err.transient);

    let mystery = registry.entry("mystery").unwrap();
    assert_eq!(mystery.kind, None);
    assert!(!mystery.adapter.available());
    assert_eq!(fake.call_count(), 0);
}

#[test]
fn missing_transport_marks_http_providers_unavailable() {
    let registry = create_provider_registry(
        &providers(json!({
            "volcengine": {"apiKey": "k", "model": "m"},
            "mock": {},
        })),
        None,
    );
    assert_eq!(registry.available_names(), vec!["mock".to_string()]);
    assert!(
        registry
            .get("volcengine")
            .unwrap()
            .unavailable_reason()
            .is_some_and(|r| !r.is_empty())
    );
}

#[test]
fn registry_preserves_config_order() {
    let fake = FakeTransport::new();
    let registry = create_provider_registry(
        &providers(json!({
            "zeta": {"type": "mock"},
            "alpha": {"type": "mock"},
            "mid": {"type": "fal", "apiKey": "k"},
        })),
        transport(&fake),
    );
    let names: Vec<_> = registry.iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    assert_eq!(registry.available_names(), names);
}
