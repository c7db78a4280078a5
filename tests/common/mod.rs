#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use clawmate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Scripted stand-in for the network. Replays queued responses in order,
/// then `repeat` (if set) forever, and records every request it receives.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    repeat: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: HttpResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(HttpResponse::json(status, &body));
    }

    pub fn push_error(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Response returned once the script is exhausted.
    pub fn repeat_json(&self, status: u16, body: Value) {
        *self.repeat.lock().unwrap() = Some(HttpResponse::json(status, &body));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// JSON body of the n-th recorded request.
    pub fn json_body(&self, index: usize) -> Value {
        match &self.requests()[index].body {
            clawmate::transport::RequestBody::Json(value) => value.clone(),
            other => panic!("request {index} has no JSON body: {other:?}"),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match self.repeat.lock().unwrap().clone() {
            Some(response) => Ok(response),
            None => Err(TransportError::Connect("no scripted response".to_string())),
        }
    }
}

pub fn transport(fake: &Arc<FakeTransport>) -> Option<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = fake.clone();
    Some(transport)
}

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh, empty directory unique to this test run.
pub fn unique_temp_dir(label: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("clawmate_{label}_{id}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Smallest valid PNG header, enough for mime sniffing.
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

/// Write `<root>/<id>/` with meta.json, character-prompt.md and the given
/// files under images/.
pub fn write_character(root: &Path, id: &str, meta: &Value, images: &[(&str, &[u8])]) -> PathBuf {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("meta.json"), meta.to_string()).unwrap();
    std::fs::write(dir.join("character-prompt.md"), format!("  {id} prompt  \n")).unwrap();
    if !images.is_empty() {
        let image_dir = dir.join("images");
        std::fs::create_dir_all(&image_dir).unwrap();
        for (name, bytes) in images {
            std::fs::write(image_dir.join(name), bytes).unwrap();
        }
    }
    dir
}
