//! OpenAI-compatible chat completions adapter.
//!
//! One adapter is bound to one endpoint URL and credential. The worker and the
//! two judges may point at different hosts, so each gets its own adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for a single-attempt chat completion provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Maximum allowed response body length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

/// How much of an unexpected body is kept in the error message.
const BODY_PREVIEW_CHARS: usize = 500;

/// Optional attribution headers sent to OpenRouter endpoints.
#[derive(Debug, Clone, Default)]
pub struct OpenRouterHeaders {
    pub http_referer: Option<String>,
    pub x_title: Option<String>,
}

/// Adapter for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    client: reqwest::Client,
    endpoint_url: String,
    timeout: Duration,
}

impl ChatCompletionsAdapter {
    /// `endpoint_url` is the full completions URL, not a base URL. The
    /// OpenRouter headers are attached only when the URL points at
    /// openrouter.ai.
    pub fn with_config(
        endpoint_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        openrouter: &OpenRouterHeaders,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let endpoint_url = endpoint_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if endpoint_url.contains("openrouter.ai") {
            if let Some(ref r) = openrouter.http_referer {
                if let Ok(v) = HeaderValue::from_str(r) {
                    headers.insert("HTTP-Referer", v);
                }
            }
            if let Some(ref t) = openrouter.x_title {
                if let Ok(v) = HeaderValue::from_str(t) {
                    headers.insert("X-Title", v);
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint_url,
            timeout,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout, None)
        } else {
            ProviderError::Http(err)
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    delta: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for ChatCompletionsAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        // Validate input size
        let total_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();

        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stream: false,
        };

        let mut response = self
            .client
            .post(&self.endpoint_url)
            .json(&api_req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.transport_error(e))? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    &req.model,
                    format!("Response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        // Build error context
        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            // Try to parse error
            let (message, ctx) = match serde_json::from_str::<ChatApiResponse>(&body) {
                Ok(ChatApiResponse {
                    error: Some(error), ..
                }) => {
                    let ctx = match error.code {
                        Some(serde_json::Value::String(code)) => ctx.with_code(code),
                        Some(other) => ctx.with_code(other.to_string()),
                        None => ctx,
                    };
                    (error.message.unwrap_or_default(), ctx)
                }
                _ => (format!("HTTP {}", status.as_u16()), ctx),
            };

            return Err(if status.as_u16() == 429 {
                ProviderError::RateLimited {
                    message,
                    context: Some(ctx),
                }
            } else {
                ProviderError::provider_with_context(&req.model, message, ctx)
            });
        }

        let parsed: ChatApiResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::MalformedJson {
                endpoint: req.model.clone(),
                message: format!("{e}. Raw: {}", preview(&body)),
            })?;

        // Check for API-level error
        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Err(ProviderError::provider_with_context(&req.model, message, ctx));
        }

        // Extract the first choice's message (or delta, for providers that
        // answer non-streaming requests in streaming shape).
        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        let (message, finish_reason) = match choice {
            Some(Choice {
                message,
                delta,
                finish_reason,
            }) => (message.or(delta), finish_reason),
            None => (None, None),
        };

        let Some(message) = message else {
            return Err(ProviderError::UnexpectedStructure {
                endpoint: req.model.clone(),
                body: preview(&body),
            });
        };

        let usage = parsed.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });

        Ok(ChatResponse {
            content: message.content,
            usage,
            finish_reason: FinishReason::from_wire(finish_reason.as_deref()),
        })
    }
}
