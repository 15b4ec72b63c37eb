use super::payload::{Payload, Target, TargetError};
use super::retry::{Jitter, RandomJitter, RetryPolicy, Sleeper, TokioSleeper};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// POSTs (or PUTs) the diff as JSON, retrying transient failures.
pub struct WebhookTarget {
    client: Client,
    url: String,
    method: Method,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

impl WebhookTarget {
    /// `method` is case-insensitive and defaults to POST when empty. Anything
    /// other than POST or PUT is rejected.
    pub fn new(url: &str, method: &str, policy: RetryPolicy) -> Result<Self, TargetError> {
        if url.is_empty() {
            return Err(TargetError::InvalidConfig(
                "webhook URL is required".to_string(),
            ));
        }

        let method = match method.trim().to_uppercase().as_str() {
            "" | "POST" => Method::POST,
            "PUT" => Method::PUT,
            _ => {
                return Err(TargetError::InvalidConfig(format!(
                    "invalid method: {}. Method must be POST or PUT",
                    method
                )))
            }
        };

        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.to_string(),
            method,
            policy,
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wire body: `{"diffs": ..., "metadata": {"tfstate": ..., "git": ...}}`.
    pub fn body(payload: &Payload) -> Result<Vec<u8>, TargetError> {
        let mut metadata = json!({ "tfstate": payload.source });
        if let Some(git) = &payload.git {
            metadata["git"] = json!(git);
        }

        serde_json::to_vec(&json!({
            "diffs": payload.diffs,
            "metadata": metadata,
        }))
        .map_err(|e| TargetError::Serialize {
            target: "webhook",
            message: e.to_string(),
        })
    }

    async fn send_once(&self, body: &[u8]) -> Result<u16, TargetError> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl Target for WebhookTarget {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn write(&self, payload: &Payload) -> Result<(), TargetError> {
        let body = Self::body(payload)?;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.send_once(&body).await {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(attempt, status, "webhook delivered");
                    return Ok(());
                }
                Ok(status) => {
                    let error = TargetError::Status {
                        target: "webhook",
                        status,
                    };
                    if !self.policy.should_retry(status) {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
                // transport errors are always worth another try
                Err(error) => last_error = Some(error),
            }

            if attempt < max_attempts {
                let delay = self.policy.delay(attempt, self.jitter.sample());
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "retrying webhook request"
                );
                self.sleeper.sleep(delay).await;
            }
        }

        Err(TargetError::RetriesExhausted {
            target: "webhook",
            attempts: max_attempts,
            last: Box::new(last_error.unwrap_or_else(|| {
                TargetError::HttpError("no attempt was made".to_string())
            })),
        })
    }
}
