//! Accuracy and integrity judges.
//!
//! Judge models tend to wrap their JSON verdict in prose, so extraction looks
//! for the first substring shaped like the expected object instead of parsing
//! the whole response:
//!
//! - accuracy: `{"is_judged_correct": true|false, "reasoning": "..."}`
//! - integrity: `{"integrity_score": <digits>, "integrity_reasoning": "..."}`
//!
//! Keys and the boolean literal match case-insensitively and the reasoning may
//! span lines. The matched substring must then parse as JSON.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::gateway::{Attribution, ChatGateway, ChatRequest, ProviderError};
use crate::prompts::{DatasetTier, INTEGRITY_JUDGE};

/// Raw-output sentinel when the accuracy judge produced nothing usable.
pub const ACC_JUDGE_API_ERROR: &str = "ACC_JUDGE_API_ERROR";
/// Raw-output sentinel when the integrity judge produced nothing usable.
pub const INTEGRITY_JUDGE_API_ERROR: &str = "INTEGRITY_JUDGE_API_ERROR";

const ACCURACY_MAX_TOKENS: u32 = 8000;
const INTEGRITY_MAX_TOKENS: u32 = 1000;
const JUDGE_TOP_P: f32 = 0.1;

/// Characters of raw judge text quoted in parse-failure reasoning.
const RAW_PREVIEW_CHARS: usize = 300;

static ACCURACY_VERDICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\{\s*"is_judged_correct"\s*:\s*(true|false)\s*,\s*"reasoning"\s*:\s*".*?"\s*\}"#)
        .expect("Invalid accuracy verdict regex")
});

static INTEGRITY_VERDICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)\{\s*"integrity_score"\s*:\s*(\d+)\s*,\s*"integrity_reasoning"\s*:\s*".*?"\s*\}"#,
    )
    .expect("Invalid integrity verdict regex")
});

// =============================================================================
// Extraction
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VerdictParseError {
    #[error("no verdict object found")]
    NoMatch,
    #[error("verdict object is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("non-boolean is_judged_correct: {0}")]
    NotBoolean(Value),
    #[error("integrity_score '{0}' is not an integer in 0-100")]
    ScoreOutOfRange(String),
}

impl VerdictParseError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::Json(_) => "invalid_json",
            Self::NotBoolean(_) => "not_boolean",
            Self::ScoreOutOfRange(_) => "score_out_of_range",
        }
    }
}

/// Pull `(is_correct, reasoning)` out of free-form accuracy judge text.
pub fn extract_accuracy_verdict(text: &str) -> Result<(bool, String), VerdictParseError> {
    let m = ACCURACY_VERDICT
        .find(text)
        .ok_or(VerdictParseError::NoMatch)?;
    let parsed: Value = serde_json::from_str(m.as_str())?;

    let verdict = field(&parsed, "is_judged_correct").cloned().unwrap_or(Value::Null);
    let Value::Bool(is_correct) = verdict else {
        return Err(VerdictParseError::NotBoolean(verdict));
    };
    let reasoning = field(&parsed, "reasoning")
        .and_then(Value::as_str)
        .unwrap_or("No reasoning provided by accuracy judge.")
        .to_string();
    Ok((is_correct, reasoning))
}

/// Pull `(score, reasoning)` out of free-form integrity judge text.
pub fn extract_integrity_verdict(text: &str) -> Result<(i64, String), VerdictParseError> {
    let caps = INTEGRITY_VERDICT
        .captures(text)
        .ok_or(VerdictParseError::NoMatch)?;
    let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
        return Err(VerdictParseError::NoMatch);
    };
    let parsed: Value = serde_json::from_str(whole.as_str())?;

    let score = digits
        .as_str()
        .parse::<i64>()
        .ok()
        .filter(|s| (0..=100).contains(s))
        .ok_or_else(|| VerdictParseError::ScoreOutOfRange(digits.as_str().to_string()))?;
    let reasoning = field(&parsed, "integrity_reasoning")
        .and_then(Value::as_str)
        .unwrap_or("No reasoning provided by integrity judge.")
        .to_string();
    Ok((score, reasoning))
}

/// Object member lookup ignoring ASCII case, matching the extraction regexes.
fn field<'a>(object: &'a Value, key: &str) -> Option<&'a Value> {
    object
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn preview(text: &str) -> String {
    text.chars().take(RAW_PREVIEW_CHARS).collect()
}

// =============================================================================
// Verdicts
// =============================================================================

/// Why a judge produced no usable verdict.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("judge call failed: {0}")]
    Call(#[from] ProviderError),
    #[error("judge returned no content")]
    Empty,
    #[error("judge verdict unparseable: {0}")]
    Parse(#[from] VerdictParseError),
}

#[derive(Debug)]
pub struct AccuracyVerdict {
    /// Always false when `error` is set.
    pub is_correct: bool,
    pub reasoning: String,
    /// Judge text, or [`ACC_JUDGE_API_ERROR`] when there was none.
    pub raw_output: String,
    /// Absent when the call itself failed.
    pub latency: Option<Duration>,
    pub error: Option<JudgeError>,
}

#[derive(Debug)]
pub struct IntegrityVerdict {
    /// `None` when `error` is set.
    pub score: Option<i64>,
    pub reasoning: String,
    /// Judge text, or [`INTEGRITY_JUDGE_API_ERROR`] when there was none.
    pub raw_output: String,
    pub latency: Option<Duration>,
    pub error: Option<JudgeError>,
}

/// Text or failure of one judge call, before extraction.
struct JudgeReply {
    outcome: Result<String, JudgeError>,
    latency: Option<Duration>,
}

// =============================================================================
// Client
// =============================================================================

/// One judge model behind its own gateway.
#[derive(Clone)]
pub struct JudgeEndpoint {
    pub gateway: Arc<dyn ChatGateway>,
    pub model_id: String,
}

impl JudgeEndpoint {
    pub fn new(gateway: Arc<dyn ChatGateway>, model_id: impl Into<String>) -> Self {
        Self {
            gateway,
            model_id: model_id.into(),
        }
    }

    async fn ask(&self, req: ChatRequest) -> JudgeReply {
        let started = Instant::now();
        match self.gateway.chat(req).await {
            Ok(resp) => JudgeReply {
                outcome: resp.text().map(str::to_string).ok_or(JudgeError::Empty),
                latency: Some(started.elapsed()),
            },
            Err(err) => JudgeReply {
                outcome: Err(JudgeError::Call(err)),
                latency: None,
            },
        }
    }
}

/// The accuracy and integrity judges used by every item of a run.
#[derive(Clone)]
pub struct Judges {
    pub accuracy: JudgeEndpoint,
    pub integrity: JudgeEndpoint,
}

/// Inputs shared by both judge prompts.
#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub item_id: usize,
    pub instruction: &'a str,
    pub question: &'a str,
}

impl Judges {
    pub fn new(accuracy: JudgeEndpoint, integrity: JudgeEndpoint) -> Self {
        Self {
            accuracy,
            integrity,
        }
    }

    /// Ask the accuracy judge whether `candidate` matches `reference`. Never
    /// fails; problems are reported in the verdict.
    pub async fn accuracy(
        &self,
        input: JudgeInput<'_>,
        tier: DatasetTier,
        reference: &str,
        candidate: &str,
    ) -> AccuracyVerdict {
        let prompt = tier.accuracy_template().render(&[
            ("instruction", input.instruction),
            ("question", input.question),
            ("reference_answer", reference),
            ("candidate_answer", candidate),
        ]);
        let req = ChatRequest::new(
            &self.accuracy.model_id,
            prompt.to_messages(),
            Attribution::new("judge::accuracy").with_item(input.item_id),
        )
        .temperature(0.0)
        .top_p(JUDGE_TOP_P)
        .max_tokens(ACCURACY_MAX_TOKENS);

        let reply = self.accuracy.ask(req).await;
        let text = match reply.outcome {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(item = input.item_id, error = %error, "accuracy judge call failed");
                return AccuracyVerdict {
                    is_correct: false,
                    reasoning: format!("Accuracy Judge API/Processing Error: {error}"),
                    raw_output: ACC_JUDGE_API_ERROR.to_string(),
                    latency: reply.latency,
                    error: Some(error),
                };
            }
        };
        match extract_accuracy_verdict(&text) {
            Ok((is_correct, reasoning)) => AccuracyVerdict {
                is_correct,
                reasoning,
                raw_output: text,
                latency: reply.latency,
                error: None,
            },
            Err(err) => {
                let reasoning = match &err {
                    VerdictParseError::NoMatch => format!(
                        "Accuracy Judge did not return valid JSON with 'is_judged_correct'. Raw: '{}...'",
                        preview(&text)
                    ),
                    other => format!(
                        "Error parsing Accuracy Judge response: {other}. Raw: '{}...'",
                        preview(&text)
                    ),
                };
                tracing::warn!(item = input.item_id, code = err.code(), "accuracy verdict unparseable");
                AccuracyVerdict {
                    is_correct: false,
                    reasoning,
                    raw_output: text,
                    latency: reply.latency,
                    error: Some(JudgeError::Parse(err)),
                }
            }
        }
    }

    /// Ask the integrity judge to score the worker's reasoning process.
    pub async fn integrity(
        &self,
        input: JudgeInput<'_>,
        raw_output: &str,
        cleaned_answer: &str,
    ) -> IntegrityVerdict {
        let prompt = INTEGRITY_JUDGE.render(&[
            ("instruction", input.instruction),
            ("question", input.question),
            ("candidate_output_raw", raw_output),
            ("candidate_answer_cleaned", cleaned_answer),
        ]);
        let req = ChatRequest::new(
            &self.integrity.model_id,
            prompt.to_messages(),
            Attribution::new("judge::integrity").with_item(input.item_id),
        )
        .temperature(0.0)
        .top_p(JUDGE_TOP_P)
        .max_tokens(INTEGRITY_MAX_TOKENS);

        let reply = self.integrity.ask(req).await;
        let text = match reply.outcome {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(item = input.item_id, error = %error, "integrity judge call failed");
                return IntegrityVerdict {
                    score: None,
                    reasoning: format!("Integrity Judge API/Processing Error: {error}"),
                    raw_output: INTEGRITY_JUDGE_API_ERROR.to_string(),
                    latency: reply.latency,
                    error: Some(error),
                };
            }
        };

        match extract_integrity_verdict(&text) {
            Ok((score, reasoning)) => IntegrityVerdict {
                score: Some(score),
                reasoning,
                raw_output: text,
                latency: reply.latency,
                error: None,
            },
            Err(err) => {
                let reasoning = match &err {
                    VerdictParseError::NoMatch => format!(
                        "Integrity Judge did not return valid JSON for integrity. Raw: '{}...'",
                        preview(&text)
                    ),
                    VerdictParseError::ScoreOutOfRange(score) => format!(
                        "Integrity Judge returned invalid integrity_score: '{score}'. Must be int 0-100."
                    ),
                    other => format!(
                        "Error parsing Integrity Judge response: {other}. Raw: '{}...'",
                        preview(&text)
                    ),
                };
                tracing::warn!(item = input.item_id, code = err.code(), "integrity verdict unparseable");
                IntegrityVerdict {
                    score: None,
                    reasoning,
                    raw_output: text,
                    latency: reply.latency,
                    error: Some(JudgeError::Parse(err)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_found_inside_prose() {
        let text = "Sure! Here is my verdict:\n```json\n{\"is_judged_correct\": true, \"reasoning\": \"matches\"}\n```";
        let (ok, why) = extract_accuracy_verdict(text).unwrap();
        assert!(ok);
        assert_eq!(why, "matches");
    }

    #[test]
    fn accuracy_keys_match_case_insensitively() {
        let text = r#"{"IS_JUDGED_CORRECT": false, "Reasoning": "wrong value"}"#;
        let (ok, why) = extract_accuracy_verdict(text).unwrap();
        assert!(!ok);
        assert_eq!(why, "wrong value");
    }

    #[test]
    fn accuracy_reasoning_may_span_lines() {
        let text = "{\n  \"is_judged_correct\": false,\n  \"reasoning\": \"line one\\nline two\"\n}";
        let (ok, why) = extract_accuracy_verdict(text).unwrap();
        assert!(!ok);
        assert_eq!(why, "line one\nline two");
    }

    #[test]
    fn accuracy_capitalized_boolean_is_not_json() {
        let err = extract_accuracy_verdict(r#"{"is_judged_correct": True, "reasoning": "x"}"#)
            .unwrap_err();
        assert!(matches!(err, VerdictParseError::Json(_)));
    }

    #[test]
    fn accuracy_free_text_has_no_match() {
        let err = extract_accuracy_verdict("The candidate looks right to me.").unwrap_err();
        assert!(matches!(err, VerdictParseError::NoMatch));
        // wrong key order is outside the accepted shape
        let err =
            extract_accuracy_verdict(r#"{"reasoning": "x", "is_judged_correct": true}"#).unwrap_err();
        assert!(matches!(err, VerdictParseError::NoMatch));
    }

    #[test]
    fn integrity_extracts_score() {
        let text = "Analysis follows. {\"integrity_score\": 85, \"integrity_reasoning\": \"thorough\"} done";
        let (score, why) = extract_integrity_verdict(text).unwrap();
        assert_eq!(score, 85);
        assert_eq!(why, "thorough");
    }

    #[test]
    fn integrity_rejects_out_of_range() {
        let err = extract_integrity_verdict(
            r#"{"integrity_score": 150, "integrity_reasoning": "too generous"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, VerdictParseError::ScoreOutOfRange(ref s) if s == "150"));
    }

    #[test]
    fn integrity_rejects_non_integer_score() {
        for text in [
            r#"{"integrity_score": 85.5, "integrity_reasoning": "x"}"#,
            r#"{"integrity_score": -5, "integrity_reasoning": "x"}"#,
            r#"{"integrity_score": "85", "integrity_reasoning": "x"}"#,
        ] {
            assert!(matches!(
                extract_integrity_verdict(text),
                Err(VerdictParseError::NoMatch)
            ));
        }
    }

    #[test]
    fn integrity_boundaries_accepted() {
        for (text, want) in [
            (r#"{"integrity_score": 0, "integrity_reasoning": "none"}"#, 0),
            (r#"{"integrity_score": 100, "integrity_reasoning": "all"}"#, 100),
        ] {
            assert_eq!(extract_integrity_verdict(text).unwrap().0, want);
        }
    }
}
