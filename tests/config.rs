mod common;

use std::path::{Path, PathBuf};

use serde_json::json;

use clawmate::config::{
    DEFAULT_BACKOFF_MS, DEFAULT_CHARACTER_ROOT, DEFAULT_DEGRADE_MESSAGE, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_PROACTIVE_PROBABILITY, load_config,
    normalize_config, resolve_config_path,
};
use clawmate::dispatch::PollOptions;

use common::unique_temp_dir;

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

#[test]
fn empty_input_gets_every_default() {
    for raw in [json!(null), json!({}), json!("garbage"), json!([1, 2])] {
        let config = normalize_config(&raw);
        assert_eq!(config.selected_character, "brooke");
        assert_eq!(config.character_root, PathBuf::from(DEFAULT_CHARACTER_ROOT));
        assert_eq!(config.default_provider.as_deref(), Some("mock"));
        assert!(!config.fallback.enabled);
        assert!(config.fallback.order.is_empty());
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.retry.backoff_ms, DEFAULT_BACKOFF_MS);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.poll_timeout_ms, DEFAULT_POLL_TIMEOUT_MS);
        assert_eq!(config.degrade_message, DEFAULT_DEGRADE_MESSAGE);
        assert!(config.providers.is_empty());
        assert!(!config.proactive_selfie.enabled);
        assert_eq!(config.proactive_selfie.probability, DEFAULT_PROACTIVE_PROBABILITY);
    }
}

#[test]
fn default_provider_falls_back_to_first_configured() {
    let config = normalize_config(&json!({
        "providers": {"ark": {"type": "volcengine"}, "mock": {}}
    }));
    assert_eq!(config.default_provider.as_deref(), Some("ark"));

    let config = normalize_config(&json!({
        "defaultProvider": "",
        "providers": {"fal": {}}
    }));
    assert_eq!(config.default_provider.as_deref(), Some("fal"));
}

#[test]
fn malformed_retry_values_use_defaults() {
    for retry in [
        json!({"maxAttempts": 0, "backoffMs": -5}),
        json!({"maxAttempts": 1.5, "backoffMs": "100"}),
        json!({"maxAttempts": "3"}),
        json!("fast"),
    ] {
        let config = normalize_config(&json!({ "retry": retry }));
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS, "{retry}");
        assert_eq!(config.retry.backoff_ms, DEFAULT_BACKOFF_MS, "{retry}");
    }

    let config = normalize_config(&json!({"retry": {"maxAttempts": 4, "backoffMs": 12.2}}));
    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.retry.backoff_ms, 13);
}

#[test]
fn fallback_enabled_is_truthy_and_order_keeps_strings() {
    let config = normalize_config(&json!({
        "fallback": {"enabled": 1, "order": ["a", 3, "", null, "b"]}
    }));
    assert!(config.fallback.enabled);
    assert_eq!(config.fallback.order, vec!["a".to_string(), "b".to_string()]);

    assert!(normalize_config(&json!({"fallback": {"enabled": "yes"}})).fallback.enabled);
    assert!(!normalize_config(&json!({"fallback": {"enabled": 0}})).fallback.enabled);
    assert!(!normalize_config(&json!({"fallback": {"enabled": ""}})).fallback.enabled);
}

#[test]
fn non_object_providers_are_dropped() {
    let config = normalize_config(&json!({
        "providers": {"good": {"type": "mock"}, "bad": "mock", "worse": [1]}
    }));
    let names: Vec<_> = config.providers.keys().cloned().collect();
    assert_eq!(names, vec!["good".to_string()]);
}

#[test]
fn proactive_probability_must_be_a_fraction() {
    let config = normalize_config(&json!({"proactiveSelfie": {"enabled": true, "probability": 0.5}}));
    assert!(config.proactive_selfie.enabled);
    assert_eq!(config.proactive_selfie.probability, 0.5);

    let config = normalize_config(&json!({"proactiveSelfie": {"probability": 2}}));
    assert_eq!(config.proactive_selfie.probability, DEFAULT_PROACTIVE_PROBABILITY);
}

#[test]
fn poll_options_prefer_provider_values() {
    let config = normalize_config(&json!({
        "pollIntervalMs": 800,
        "pollTimeoutMs": 9000,
        "providers": {
            "slow": {"type": "http-async", "pollIntervalMs": 5000, "pollTimeoutMs": -1},
            "plain": {"type": "mock"},
        }
    }));
    assert_eq!(
        config.poll_options_for("slow"),
        PollOptions {
            poll_interval_ms: Some(5000),
            poll_timeout_ms: Some(9000),
        }
    );
    assert_eq!(
        config.poll_options_for("plain"),
        PollOptions {
            poll_interval_ms: Some(800),
            poll_timeout_ms: Some(9000),
        }
    );
    assert_eq!(config.poll_options_for("missing"), config.poll_options_for("plain"));
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[test]
fn explicit_path_wins() {
    let cwd = Path::new("/work");
    assert_eq!(
        resolve_config_path(Some(Path::new("/etc/clawmate.json")), cwd),
        PathBuf::from("/etc/clawmate.json")
    );
    if std::env::var("CLAWMATE_CONFIG").is_err() {
        assert_eq!(
            resolve_config_path(None, cwd),
            cwd.join("config/clawmate.config.json")
        );
    }
}

#[tokio::test]
async fn loads_json_file() {
    let dir = unique_temp_dir("config_json");
    let path = dir.join("clawmate.json");
    std::fs::write(
        &path,
        json!({"selectedCharacter": "mika", "providers": {"mock": {}}}).to_string(),
    )
    .unwrap();

    let loaded = load_config(Some(&path), &dir).await.unwrap();
    assert_eq!(loaded.path, path);
    assert_eq!(loaded.config.selected_character, "mika");
    assert_eq!(loaded.config.default_provider.as_deref(), Some("mock"));
}

#[tokio::test]
async fn loads_toml_file() {
    let dir = unique_temp_dir("config_toml");
    let path = dir.join("clawmate.toml");
    std::fs::write(
        &path,
        "defaultProvider = \"ark\"\n\n[fallback]\nenabled = true\norder = [\"ark\", \"mock\"]\n\n[providers.ark]\ntype = \"volcengine\"\nmodel = \"seedream\"\n",
    )
    .unwrap();

    let config = load_config(Some(&path), &dir).await.unwrap().config;
    assert_eq!(config.default_provider.as_deref(), Some("ark"));
    assert!(config.fallback.enabled);
    assert_eq!(config.fallback.order, vec!["ark".to_string(), "mock".to_string()]);
    assert_eq!(
        config.providers["ark"].string(&["model"]).as_deref(),
        Some("seedream")
    );
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let dir = unique_temp_dir("config_missing");
    let err = load_config(Some(&dir.join("nope.json")), &dir)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIG_NOT_FOUND");
}

#[tokio::test]
async fn invalid_json_is_parse_error() {
    let dir = unique_temp_dir("config_invalid");
    let path = dir.join("clawmate.json");
    std::fs::write(&path, "{ \"providers\": ").unwrap();
    let err = load_config(Some(&path), &dir).await.unwrap_err();
    assert_eq!(err.code(), "CONFIG_PARSE_ERROR");
    assert!(err.to_string().contains("clawmate.json"));
}
