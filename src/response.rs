use serde::Serialize;

use crate::dispatch::SelfieMode;

/// Result of one `generate_selfie` call. Serializes as
/// `{"ok":true,...}` or `{"ok":false,"degraded":true,...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateSelfieResult {
    Success(SelfieSuccess),
    Failure(SelfieFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfieSuccess {
    pub provider: String,
    pub request_id: Option<String>,
    pub image_url: String,
    pub prompt: String,
    pub mode: SelfieMode,
    pub character_id: String,
    pub time_state: String,
}

/// Caller-facing failure. Carries the configured degrade message and the
/// last error's message and request id; error details are only logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfieFailure {
    pub provider: Option<String>,
    pub request_id: Option<String>,
    pub message: String,
    pub error: String,
}

#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    degraded: Option<bool>,
    #[serde(flatten)]
    body: &'a T,
}

impl Serialize for GenerateSelfieResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(body) => Tagged {
                ok: true,
                degraded: None,
                body,
            }
            .serialize(serializer),
            Self::Failure(body) => Tagged {
                ok: false,
                degraded: Some(true),
                body,
            }
            .serialize(serializer),
        }
    }
}

impl GenerateSelfieResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Success(s) => Some(&s.provider),
            Self::Failure(f) => f.provider.as_deref(),
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match self {
            Self::Success(s) => Some(&s.image_url),
            Self::Failure(_) => None,
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"degraded":true,"error":"serialization failed: {e}"}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_serializes_camel_case_with_ok_flag() {
        let result = GenerateSelfieResult::Success(SelfieSuccess {
            provider: "mock".into(),
            request_id: None,
            image_url: "mock://x/image.png".into(),
            prompt: "hi".into(),
            mode: SelfieMode::Mirror,
            character_id: "brooke".into(),
            time_state: "morning".into(),
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "ok": true,
                "provider": "mock",
                "requestId": null,
                "imageUrl": "mock://x/image.png",
                "prompt": "hi",
                "mode": "mirror",
                "characterId": "brooke",
                "timeState": "morning",
            })
        );
    }

    #[test]
    fn failure_is_marked_degraded() {
        let result = GenerateSelfieResult::Failure(SelfieFailure {
            provider: Some("a".into()),
            request_id: Some("r1".into()),
            message: "sorry".into(),
            error: "boom".into(),
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["degraded"], json!(true));
        assert_eq!(value["requestId"], json!("r1"));
        assert!(!result.is_ok());
        assert_eq!(result.image_url(), None);
    }
}
