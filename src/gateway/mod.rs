//! Model-call gateway for OpenAI-compatible chat completion endpoints.

pub mod chat_api;
pub mod error;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use chat_api::{ChatCompletionsAdapter, ChatProvider};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use chat_api::OpenRouterHeaders;
pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

/// A single logical model call. Implementations own their retry policy.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Total attempts per logical call. Zero still makes one attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl GatewayConfig {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
        }
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    adapter: ChatCompletionsAdapter,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn with_config(
        adapter: ChatCompletionsAdapter,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            adapter,
            usage_sink,
            config,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let max_attempts = self.config.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            match self.adapter.chat(&req).await {
                Ok(resp) => {
                    self.record_usage(&req, attempt, started, Ok(&resp)).await;
                    return Ok(resp);
                }
                Err(err) => {
                    self.record_usage(&req, attempt, started, Err(&err)).await;

                    if !err.is_retryable() || attempt >= max_attempts {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    tracing::warn!(
                        model = %req.model,
                        caller = req.attribution.caller,
                        item = ?req.attribution.item_id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "model call failed; retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        attempt: u32,
        started: Instant,
        outcome: Result<&ChatResponse, &ProviderError>,
    ) {
        let record = ProviderCallRecord::new(
            self.adapter.endpoint_url(),
            req.model.clone(),
            req.attribution.caller,
        )
        .item(req.attribution.item_id)
        .attempt(attempt)
        .latency(started.elapsed());

        let record = match outcome {
            Ok(resp) => record.tokens(resp.prompt_tokens(), resp.completion_tokens()),
            Err(err) => {
                let record = record.error(err.code());
                match err.request_id() {
                    Some(id) => record.request_id(id),
                    None => record,
                }
            }
        };

        self.usage_sink.record(record).await;
    }
}

/// Linear backoff: `base * attempt` where `attempt` is 1-based.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt
}
