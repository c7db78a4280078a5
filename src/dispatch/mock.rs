//! In-process provider for tests and offline runs. Simulates pending polls
//! and a fixed number of forced submit/poll failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::dispatch::{GenerateRequest, PollOptions, ProviderAdapter, ProviderOutput};
use crate::error::{ErrorCode, ProviderError};

const PENDING_POLL_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct MockOptions {
    pub pending_polls: u32,
    pub fail_submit_times: u32,
    pub fail_poll_times: u32,
    /// Whether forced failures are marked transient. Defaults to true.
    pub transient: bool,
    /// Return the first reference image instead of a `mock://` URL.
    pub echo_reference_data_url: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            pending_polls: 1,
            fail_submit_times: 0,
            fail_poll_times: 0,
            transient: true,
            echo_reference_data_url: false,
        }
    }
}

impl MockOptions {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let defaults = Self::default();
        let count = |keys: &[&str], default: u32| {
            config
                .number(keys)
                .filter(|n| n.fract() == 0.0)
                .map(|n| n.max(0.0) as u32)
                .unwrap_or(default)
        };
        Self {
            pending_polls: count(&["pendingPolls", "pending_polls"], defaults.pending_polls),
            fail_submit_times: count(&["failSubmitTimes", "fail_submit_times"], 0),
            fail_poll_times: count(&["failPollTimes", "fail_poll_times"], 0),
            transient: config.boolean(&["transient"]) != Some(false),
            echo_reference_data_url: config
                .boolean(&["echoReferenceDataUrl", "echo_reference_data_url"])
                .unwrap_or(false),
        }
    }
}

pub struct MockProvider {
    name: String,
    options: MockOptions,
    submit_fail_left: AtomicU32,
    poll_fail_left: AtomicU32,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, options: MockOptions) -> Self {
        Self {
            name: name.into(),
            submit_fail_left: AtomicU32::new(options.fail_submit_times),
            poll_fail_left: AtomicU32::new(options.fail_poll_times),
            options,
        }
    }

    pub fn from_config(name: &str, config: &ProviderConfig) -> Self {
        Self::new(name, MockOptions::from_config(config))
    }

    fn forced_failure(&self, counter: &AtomicU32, code: ErrorCode, stage: &str) -> Option<ProviderError> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .ok()
            .map(|_| {
                ProviderError::new(code, format!("{} simulated {stage} failure", self.name))
                    .transient(self.options.transient)
            })
    }
}

fn short_id(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string()[..len].to_string()
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _poll: &PollOptions,
    ) -> Result<ProviderOutput, ProviderError> {
        if let Some(err) =
            self.forced_failure(&self.submit_fail_left, ErrorCode::MockSubmitFailed, "submit")
        {
            return Err(err);
        }
        if let Some(err) =
            self.forced_failure(&self.poll_fail_left, ErrorCode::MockPollFailed, "poll")
        {
            return Err(err);
        }

        for _ in 0..self.options.pending_polls {
            tokio::time::sleep(PENDING_POLL_DELAY).await;
        }

        let image_url = if self.options.echo_reference_data_url {
            request.reference_data_urls().into_iter().next()
        } else {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            Some(format!("mock://{}-{ts}-{}/image.png", self.name, short_id(6)))
        };

        Ok(ProviderOutput {
            image_url,
            request_id: Some(format!("{}-req-{}", self.name, short_id(8))),
        })
    }
}
