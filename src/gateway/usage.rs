//! Usage tracking via the UsageSink trait.
//!
//! The gateway reports every attempt through a UsageSink, so the harness can
//! decide where call accounting goes:
//! - the CLI uses TracingUsageSink (one debug event per attempt)
//! - tests use NoopUsageSink or a collecting sink

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of one attempt against a chat endpoint.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// Endpoint URL the attempt went to.
    pub endpoint: String,
    /// Model used.
    pub model: String,
    /// Prompt tokens, when the endpoint reported them.
    pub prompt_tokens: Option<u32>,
    /// Completion tokens, when the endpoint reported them.
    pub completion_tokens: Option<u32>,
    /// Input item this call belongs to.
    pub item_id: Option<usize>,
    /// 1-based attempt number within the retry loop.
    pub attempt: u32,
    pub latency: Duration,
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<&'static str>,
    /// Which code path made this call.
    pub caller: &'static str,
    /// Provider request ID (for debugging).
    pub request_id: Option<String>,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, caller: &'static str) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            prompt_tokens: None,
            completion_tokens: None,
            item_id: None,
            attempt: 1,
            latency: Duration::ZERO,
            status: CallStatus::Success,
            error_code: None,
            caller,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, prompt: Option<u32>, completion: Option<u32>) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self
    }

    pub fn item(mut self, item_id: Option<usize>) -> Self {
        self.item_id = item_id;
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn error(mut self, code: &'static str) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code);
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Trait for recording provider call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Usage sink that emits each record as a `tracing` debug event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        tracing::debug!(
            endpoint = %record.endpoint,
            model = %record.model,
            caller = record.caller,
            item = ?record.item_id,
            attempt = record.attempt,
            status = record.status.as_str(),
            error_code = ?record.error_code,
            request_id = ?record.request_id,
            prompt_tokens = ?record.prompt_tokens,
            completion_tokens = ?record.completion_tokens,
            latency_ms = record.latency.as_millis() as u64,
            at = %record.timestamp.to_rfc3339(),
            "provider call"
        );
    }
}
