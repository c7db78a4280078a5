//! Synchronous adapters against a scripted transport: request shape, default
//! response paths, and failure classification.

mod common;

use std::path::PathBuf;

use serde_json::{Value, json};

use clawmate::config::ProviderConfig;
use clawmate::dispatch::aliyun::AliyunProvider;
use clawmate::dispatch::fal::FalProvider;
use clawmate::dispatch::mock::{MockOptions, MockProvider};
use clawmate::dispatch::openai_compat::OpenAiCompatProvider;
use clawmate::dispatch::volcengine::VolcengineProvider;
use clawmate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter};
use clawmate::error::ErrorCode;
use clawmate::transport::{FormField, HttpResponse, Method, RequestBody, TransportError};

use common::{FakeTransport, PNG_BYTES, transport};

const REF_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAAB";

fn request() -> GenerateRequest {
    GenerateRequest::new("brooke", "a mirror selfie").with_references(
        vec![PathBuf::from("ref.png")],
        vec![REF_B64.to_string()],
        vec![format!("data:image/png;base64,{REF_B64}")],
    )
}

fn cfg(value: Value) -> ProviderConfig {
    ProviderConfig::from(value)
}

async fn run(provider: &dyn ProviderAdapter) -> Result<(String, Option<String>), ErrorCode> {
    provider
        .generate(&request(), &PollOptions::default())
        .await
        .map(|out| (out.image_url.unwrap_or_default(), out.request_id))
        .map_err(|e| e.code)
}

// ---------------------------------------------------------------------------
// mock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mock_returns_mock_scheme_url() {
    let provider = MockProvider::new(
        "mock",
        MockOptions {
            pending_polls: 0,
            ..MockOptions::default()
        },
    );
    let (url, request_id) = run(&provider).await.unwrap();
    assert!(url.starts_with("mock://mock-"), "url: {url}");
    assert!(request_id.unwrap().starts_with("mock-req-"));
}

#[tokio::test]
async fn mock_forced_failures_count_down() {
    let provider = MockProvider::from_config(
        "flaky",
        &cfg(json!({"pendingPolls": 0, "failSubmitTimes": 1, "failPollTimes": 1})),
    );
    let first = provider
        .generate(&request(), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(first.code, ErrorCode::MockSubmitFailed);
    assert!(first.transient);

    let second = provider
        .generate(&request(), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(second.code, ErrorCode::MockPollFailed);

    assert!(run(&provider).await.is_ok());
}

#[tokio::test]
async fn mock_can_echo_reference_image() {
    let provider = MockProvider::from_config(
        "echo",
        &cfg(json!({"pendingPolls": 0, "echoReferenceDataUrl": true})),
    );
    let (url, _) = run(&provider).await.unwrap();
    assert_eq!(url, format!("data:image/png;base64,{REF_B64}"));
}

// ---------------------------------------------------------------------------
// volcengine
// ---------------------------------------------------------------------------

fn volcengine(fake: &std::sync::Arc<FakeTransport>) -> VolcengineProvider {
    VolcengineProvider::from_config(
        "volcengine",
        &cfg(json!({"apiKey": "ark-key", "model": "seedream-4", "size": "2K"})),
        transport(fake),
    )
    .unwrap()
}

#[tokio::test]
async fn volcengine_request_shape_and_default_path() {
    let fake = FakeTransport::new();
    fake.push(
        HttpResponse::json(200, &json!({"data": [{"url": "https://ark.test/1.png"}]}))
            .with_header("x-request-id", "ark-req-1"),
    );
    let (url, request_id) = run(&volcengine(&fake)).await.unwrap();
    assert_eq!(url, "https://ark.test/1.png");
    assert_eq!(request_id.as_deref(), Some("ark-req-1"));

    let sent = &fake.requests()[0];
    assert_eq!(sent.method, Method::Post);
    assert_eq!(
        sent.url,
        "https://ark.cn-beijing.volces.com/api/v3/images/generations"
    );
    assert_eq!(sent.header("authorization"), Some("Bearer ark-key"));

    let body = fake.json_body(0);
    assert_eq!(body["model"], "seedream-4");
    assert_eq!(body["prompt"], "a mirror selfie");
    assert_eq!(body["image"], format!("data:image/png;base64,{REF_B64}"));
    assert_eq!(body["size"], "2K");
    assert_eq!(body["response_format"], "url");
    assert_eq!(body["watermark"], false);
}

#[tokio::test]
async fn volcengine_accepts_binary_image_response() {
    let fake = FakeTransport::new();
    let mut bytes = PNG_BYTES.to_vec();
    bytes.resize(60, 0);
    fake.push(HttpResponse::new(200, bytes).with_header("Content-Type", "image/png"));
    let (url, _) = run(&volcengine(&fake)).await.unwrap();
    assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"), "url: {url}");
}

#[tokio::test]
async fn volcengine_business_error_in_ok_body_is_not_retryable() {
    let fake = FakeTransport::new();
    fake.push_json(
        200,
        json!({"error": {"code": "InvalidParameter", "message": "prompt rejected"}}),
    );
    let err = volcengine(&fake)
        .generate(&request(), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderHttpFailed);
    assert!(!err.transient);
    assert!(err.message.contains("prompt rejected"), "{}", err.message);
}

#[tokio::test]
async fn http_status_decides_transience() {
    let fake = FakeTransport::new();
    fake.push_json(503, json!({"message": "busy"}));
    fake.push_json(429, json!({"message": "slow down"}));
    fake.push_json(400, json!({"message": "bad"}));
    let provider = volcengine(&fake);

    for expected in [true, true, false] {
        let err = provider
            .generate(&request(), &PollOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderHttpFailed);
        assert_eq!(err.transient, expected, "{}", err.message);
    }
}

#[tokio::test]
async fn transport_timeout_is_transient() {
    let fake = FakeTransport::new();
    fake.push_error(TransportError::Timeout { timeout_ms: 10 });
    let err = volcengine(&fake)
        .generate(&request(), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderTimeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn oversized_response_is_not_retryable() {
    let fake = FakeTransport::new();
    fake.push_error(TransportError::TooLarge {
        size: 64 * 1024 * 1024,
        max: 32 * 1024 * 1024,
    });
    let err = volcengine(&fake)
        .generate(&request(), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderHttpFailed);
    assert!(!err.is_retryable());
    assert!(err.message.contains("too large"));
}

#[tokio::test]
async fn image_at_unexpected_path_is_found_by_scan() {
    let fake = FakeTransport::new();
    fake.push_json(
        200,
        json!({"result": {"artifacts": [{"uri": "https://odd.test/x.png"}]}}),
    );
    let (url, _) = run(&volcengine(&fake)).await.unwrap();
    assert_eq!(url, "https://odd.test/x.png");
}

#[tokio::test]
async fn ok_body_without_image_is_parse_error() {
    let fake = FakeTransport::new();
    fake.push_json(200, json!({"data": [], "id": "req-9"}));
    let err = volcengine(&fake)
        .generate(&request(), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderParseError);
    assert!(!err.transient);
    assert_eq!(err.request_id.as_deref(), Some("req-9"));
}

// ---------------------------------------------------------------------------
// aliyun
// ---------------------------------------------------------------------------

#[tokio::test]
async fn aliyun_gates_parameters_by_model_family() {
    let fake = FakeTransport::new();
    fake.push_json(
        200,
        json!({
            "request_id": "ds-1",
            "output": {"choices": [{"message": {"content": [{"image": "https://ds.test/1.png"}]}}]}
        }),
    );
    let provider = AliyunProvider::from_config(
        "aliyun",
        &cfg(json!({
            "apiKey": "ds-key",
            "model": "wan2.6-image",
            "n": 9,
            "size": "1280*1280",
            "seed": 3_000_000_000u64,
        })),
        transport(&fake),
    )
    .unwrap();

    let (url, request_id) = run(&provider).await.unwrap();
    assert_eq!(url, "https://ds.test/1.png");
    assert_eq!(request_id.as_deref(), Some("ds-1"));

    let body = fake.json_body(0);
    assert_eq!(body["model"], "wan2.6-image");
    let content = body["input"]["messages"][0]["content"].as_array().unwrap();
    assert_eq!(content.len(), 2);
    assert_eq!(content[0]["image"], format!("data:image/png;base64,{REF_B64}"));
    assert_eq!(content[1]["text"], "a mirror selfie");

    let parameters = &body["parameters"];
    assert_eq!(parameters["n"], 4);
    assert_eq!(parameters["size"], "1280*1280");
    assert_eq!(parameters["enable_interleave"], false);
    assert_eq!(parameters["prompt_extend"], true);
    assert_eq!(parameters["watermark"], false);
    assert!(parameters.get("seed").is_none());
}

#[tokio::test]
async fn aliyun_business_code_is_http_failed() {
    let fake = FakeTransport::new();
    fake.push_json(
        200,
        json!({"code": "DataInspectionFailed", "message": "inappropriate", "request_id": "ds-2"}),
    );
    let provider = AliyunProvider::from_config(
        "aliyun",
        &cfg(json!({"apiKey": "k", "model": "qwen-image-edit"})),
        transport(&fake),
    )
    .unwrap();
    let err = provider
        .generate(&request(), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderHttpFailed);
    assert!(!err.transient);
    assert_eq!(err.request_id.as_deref(), Some("ds-2"));
}

#[tokio::test]
async fn aliyun_rejects_empty_prompt_before_sending() {
    let fake = FakeTransport::new();
    let provider = AliyunProvider::from_config(
        "aliyun",
        &cfg(json!({"apiKey": "k", "model": "qwen-image-edit"})),
        transport(&fake),
    )
    .unwrap();
    let err = provider
        .generate(&GenerateRequest::new("brooke", "   "), &PollOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderRequestInvalid);
    assert_eq!(fake.call_count(), 0);
}

// ---------------------------------------------------------------------------
// fal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fal_sends_multipart_by_default() {
    let fake = FakeTransport::new();
    fake.push(
        HttpResponse::json(200, &json!({"images": [{"url": "https://fal.test/1.png"}]}))
            .with_header("x-fal-request-id", "fal-1"),
    );
    let provider = FalProvider::from_config(
        "fal",
        &cfg(json!({"apiKey": "fal-key", "numImages": 20})),
        transport(&fake),
    )
    .unwrap();

    let (url, request_id) = run(&provider).await.unwrap();
    assert_eq!(url, "https://fal.test/1.png");
    assert_eq!(request_id.as_deref(), Some("fal-1"));

    let sent = &fake.requests()[0];
    assert_eq!(sent.url, "https://fal.run/xai/grok-imagine-image/edit");
    assert_eq!(sent.header("authorization"), Some("Key fal-key"));
    let RequestBody::Form(fields) = &sent.body else {
        panic!("expected multipart body, got {:?}", sent.body);
    };
    assert!(fields.contains(&FormField::text("prompt", "a mirror selfie")));
    assert!(fields.contains(&FormField::text(
        "image_url",
        format!("data:image/png;base64,{REF_B64}")
    )));
    assert!(fields.contains(&FormField::text("num_images", "8")));
}

#[tokio::test]
async fn fal_json_format_and_custom_fields() {
    let fake = FakeTransport::new();
    fake.push_json(200, json!({"data": {"images": [{"url": "https://fal.test/2.png"}]}}));
    let provider = FalProvider::from_config(
        "fal",
        &cfg(json!({
            "apiKey": "k",
            "requestFormat": "json",
            "authScheme": "Bearer",
            "imageField": "image_urls",
            "promptField": "text",
            "model": "fal-ai/flux/dev",
        })),
        transport(&fake),
    )
    .unwrap();

    let (url, _) = run(&provider).await.unwrap();
    assert_eq!(url, "https://fal.test/2.png");

    let sent = &fake.requests()[0];
    assert_eq!(sent.url, "https://fal.run/fal-ai/flux/dev");
    assert_eq!(sent.header("authorization"), Some("Bearer k"));
    let body = fake.json_body(0);
    assert_eq!(body["text"], "a mirror selfie");
    assert!(body["image_urls"].as_str().unwrap().starts_with("data:image/png"));
}

#[test]
fn fal_unknown_request_format_fails_construction() {
    let fake = FakeTransport::new();
    let err = FalProvider::from_config(
        "fal",
        &cfg(json!({"apiKey": "k", "requestFormat": "xml"})),
        transport(&fake),
    )
    .err()
    .unwrap();
    assert_eq!(err.code, ErrorCode::ProviderConfigInvalid);
}

// ---------------------------------------------------------------------------
// openai-compatible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_compatible_mines_image_from_chat_content() {
    let mut b64 = String::from("/9j/");
    while b64.len() < 128 {
        b64.push('A');
    }
    let fake = FakeTransport::new();
    fake.push(
        HttpResponse::json(
            200,
            &json!({
                "id": "chatcmpl-1",
                "choices": [{"message": {"role": "assistant", "content": format!("Here it is:\n{b64}\n")}}]
            }),
        )
        .with_header("x-request-id", "gw-1"),
    );
    let provider = OpenAiCompatProvider::from_config(
        "gateway",
        &cfg(json!({"apiKey": "sk", "baseUrl": "https://gw.test/v1", "model": "img-1"})),
        transport(&fake),
    )
    .unwrap();

    let (url, request_id) = run(&provider).await.unwrap();
    assert_eq!(url, format!("data:image/jpeg;base64,{b64}"));
    assert_eq!(request_id.as_deref(), Some("gw-1"));

    let sent = &fake.requests()[0];
    assert_eq!(sent.url, "https://gw.test/v1/chat/completions");
    let body = fake.json_body(0);
    assert_eq!(body["model"], "img-1");
    assert_eq!(body["stream"], false);
    let content = body["messages"][0]["content"].as_array().unwrap();
    assert_eq!(content[0], json!({"type": "text", "text": "a mirror selfie"}));
    assert_eq!(content[1]["type"], "image_url");
    assert_eq!(
        content[1]["image_url"]["url"],
        format!("data:image/png;base64,{REF_B64}")
    );
}

#[tokio::test]
async fn openai_compatible_reads_images_array() {
    let fake = FakeTransport::new();
    fake.push_json(
        200,
        json!({"choices": [{"message": {"images": [{"image_url": {"url": "https://gw.test/i.png"}}]}}]}),
    );
    let provider = OpenAiCompatProvider::from_config(
        "gateway",
        &cfg(json!({"apiKey": "sk", "baseUrl": "https://gw.test/v1"})),
        transport(&fake),
    )
    .unwrap();
    let (url, _) = run(&provider).await.unwrap();
    assert_eq!(url, "https://gw.test/i.png");
    assert_eq!(fake.json_body(0)["model"], "gpt-image-1.5");
}

// ---------------------------------------------------------------------------
// Images outside the default response paths
// ---------------------------------------------------------------------------

fn odd_body(url: &str) -> Value {
    json!({"payload": {"meta": [{"where": url}]}})
}

#[tokio::test]
async fn aliyun_finds_image_by_scan() {
    let fake = FakeTransport::new();
    fake.push_json(200, odd_body("https://odd.test/ds.png"));
    let provider = AliyunProvider::from_config(
        "aliyun",
        &cfg(json!({"apiKey": "k", "model": "qwen-image-edit"})),
        transport(&fake),
    )
    .unwrap();
    let (url, _) = run(&provider).await.unwrap();
    assert_eq!(url, "https://odd.test/ds.png");
}

#[tokio::test]
async fn fal_finds_image_by_scan() {
    let fake = FakeTransport::new();
    fake.push_json(200, odd_body("https://odd.test/fal.png"));
    let provider =
        FalProvider::from_config("fal", &cfg(json!({"apiKey": "k"})), transport(&fake)).unwrap();
    let (url, _) = run(&provider).await.unwrap();
    assert_eq!(url, "https://odd.test/fal.png");
}

#[tokio::test]
async fn openai_compatible_finds_image_by_scan() {
    let fake = FakeTransport::new();
    fake.push_json(200, odd_body("https://odd.test/gw.png"));
    let provider = OpenAiCompatProvider::from_config(
        "gateway",
        &cfg(json!({"apiKey": "sk", "baseUrl": "https://gw.test/v1"})),
        transport(&fake),
    )
    .unwrap();
    let (url, _) = run(&provider).await.unwrap();
    assert_eq!(url, "https://odd.test/gw.png");
}
