//! Core types for the model-call gateway.

use serde::{Deserialize, Serialize};

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Which pipeline role and which input item a call belongs to. Carried into
/// usage records and retry logs.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// 1-based item ordinal, when the call serves a dataset item.
    pub item_id: Option<usize>,
    /// Static call-site tag such as `"pipeline::worker"` or `"judge::accuracy"`.
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_item(mut self, item_id: usize) -> Self {
        self.item_id = Some(item_id);
        self
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role. Serialized lowercase, as the wire format expects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }
}

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier, passed through to the endpoint verbatim.
    pub model: String,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Attribution for usage records.
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            top_p: None,
            max_tokens: None,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Why the model stopped. Only truncation is acted on (the worker stage
/// logs it); anything unrecognized is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
    Missing,
}

impl FinishReason {
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            None => Self::Missing,
            Some("stop") | Some("eos") => Self::Stop,
            Some("length") | Some("max_tokens") => Self::Length,
            Some("content_filter") => Self::ContentFilter,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// Token usage as reported by the endpoint. Either count may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Response from chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content. `None` when the endpoint returned a message whose
    /// content was null.
    pub content: Option<String>,
    /// Usage block, if the endpoint sent one.
    pub usage: Option<TokenUsage>,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    pub fn prompt_tokens(&self) -> Option<u32> {
        self.usage.and_then(|u| u.prompt_tokens)
    }

    pub fn completion_tokens(&self) -> Option<u32> {
        self.usage.and_then(|u| u.completion_tokens)
    }

    /// Content if present and not blank.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_builder_sets_sampling() {
        let req = ChatRequest::new(
            "test/model",
            vec![Message::system("sys"), Message::user("hi")],
            Attribution::new("test").with_item(3),
        )
        .temperature(0.01)
        .top_p(0.1)
        .max_tokens(3000);

        assert_eq!(req.model, "test/model");
        assert_eq!(req.top_p, Some(0.1));
        assert_eq!(req.max_tokens, Some(3000));
        assert_eq!(req.attribution.item_id, Some(3));
        assert_eq!(req.messages[0].role, Role::System);
    }

    #[test]
    fn chat_request_defaults_are_greedy() {
        let req = ChatRequest::new("m", vec![], Attribution::new("test"));
        assert_eq!(req.temperature, 0.0);
        assert!(req.top_p.is_none());
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn response_text_skips_empty_content() {
        let mut resp = ChatResponse {
            content: Some(String::new()),
            usage: None,
            finish_reason: FinishReason::Stop,
        };
        assert!(resp.text().is_none());
        resp.content = Some("42".into());
        assert_eq!(resp.text(), Some("42"));
        assert!(resp.completion_tokens().is_none());
    }

    #[test]
    fn finish_reason_from_wire() {
        assert_eq!(FinishReason::from_wire(Some("length")), FinishReason::Length);
        assert_eq!(FinishReason::from_wire(Some("max_tokens")), FinishReason::Length);
        assert_eq!(FinishReason::from_wire(None), FinishReason::Missing);
        assert_eq!(
            FinishReason::from_wire(Some("tool_calls")),
            FinishReason::Other("tool_calls".into())
        );
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let v = serde_json::to_value(Message::system("s")).unwrap();
        assert_eq!(v, serde_json::json!({ "role": "system", "content": "s" }));
    }
}
