//! Input items, the per-item status machine and the output record.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::prompts::PromptVersion;
use crate::scoring::SubScores;

/// Placeholder for fields that were never filled.
pub const NOT_AVAILABLE: &str = "N/A";
pub const NOT_JUDGED: &str = "Not judged";
pub const WORKER_API_ERROR: &str = "WORKER_API_ERROR";
pub const WORKER_ERROR_CLEANED: &str = "N/A_WORKER_ERROR";

// =============================================================================
// Status
// =============================================================================

/// Where an item is in the pipeline. Every finished item ends in exactly one
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Initiated,
    SkippedDataIncomplete,
    PendingWorker,
    ErrorWorkerApi,
    PendingAccuracyJudge,
    ErrorAccuracyJudge,
    PendingIntegrityJudge,
    ErrorIntegrityJudge,
    PendingEsiCalc,
    Completed,
    ErrorInputJsonDecode,
    ErrorUnexpectedPipeline,
    ErrorFutureException,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::SkippedDataIncomplete => "SKIPPED_DATA_INCOMPLETE",
            Self::PendingWorker => "PENDING_WORKER",
            Self::ErrorWorkerApi => "ERROR_WORKER_API",
            Self::PendingAccuracyJudge => "PENDING_ACCURACY_JUDGE",
            Self::ErrorAccuracyJudge => "ERROR_ACCURACY_JUDGE",
            Self::PendingIntegrityJudge => "PENDING_INTEGRITY_JUDGE",
            Self::ErrorIntegrityJudge => "ERROR_INTEGRITY_JUDGE",
            Self::PendingEsiCalc => "PENDING_ESI_CALC",
            Self::Completed => "COMPLETED",
            Self::ErrorInputJsonDecode => "ERROR_INPUT_JSON_DECODE",
            Self::ErrorUnexpectedPipeline => "ERROR_UNEXPECTED_PIPELINE",
            Self::ErrorFutureException => "ERROR_FUTURE_EXCEPTION",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ErrorWorkerApi
                | Self::ErrorAccuracyJudge
                | Self::ErrorIntegrityJudge
                | Self::ErrorInputJsonDecode
                | Self::ErrorUnexpectedPipeline
                | Self::ErrorFutureException
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_error() || matches!(self, Self::SkippedDataIncomplete | Self::Completed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Input
// =============================================================================

/// One evaluation unit, immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// 1-based line ordinal.
    pub id: usize,
    pub instruction: String,
    pub question: String,
    /// Stringified and trimmed; empty when the line had no answer.
    pub reference_answer: String,
    pub scenario_code: Value,
}

/// Outcome of parsing one input line that was valid JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Ready(Item),
    /// `instruction` or `question` missing or null.
    Incomplete,
}

/// Parse one input line. Invalid JSON, or JSON that is not an object, is an
/// error; a well-formed object lacking instruction or question is
/// `Incomplete`.
pub fn parse_line(id: usize, line: &str) -> Result<ParsedLine, serde_json::Error> {
    let mut fields: Map<String, Value> = serde_json::from_str(line)?;

    let present = |v: Option<Value>| v.filter(|v| !v.is_null());
    let (Some(instruction), Some(question)) = (
        present(fields.remove("instruction")),
        present(fields.remove("question")),
    ) else {
        return Ok(ParsedLine::Incomplete);
    };

    let reference_answer = match present(fields.remove("answer")) {
        Some(v) => value_text(v).trim().to_string(),
        None => String::new(),
    };

    Ok(ParsedLine::Ready(Item {
        id,
        instruction: value_text(instruction),
        question: value_text(question),
        reference_answer,
        scenario_code: fields
            .remove("scenario_code")
            .unwrap_or_else(|| Value::String(NOT_AVAILABLE.to_string())),
    }))
}

fn value_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// =============================================================================
// Output record
// =============================================================================

/// Terminal record for one item within one combination. Field names are the
/// output line schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: usize,
    pub dataset_short_name: String,
    pub status: ItemStatus,
    pub processing_error_details: Option<String>,
    pub scenario_code: Value,
    pub instruction: Option<String>,
    pub question: Option<String>,
    pub reference_answer: Option<String>,
    pub worker_model_id: String,
    pub worker_prompt_version: PromptVersion,

    pub worker_answer_raw: String,
    pub worker_answer_cleaned: String,
    pub worker_api_error_details: Option<String>,
    pub worker_prompt_tokens: Option<u32>,
    pub worker_completion_tokens: Option<u32>,
    pub worker_output_correctly_formatted: bool,
    pub worker_response_time_seconds: Option<f64>,

    pub accuracy_judge_model_id: Option<String>,
    pub judge_verdict_is_correct: bool,
    pub accuracy_judge_reasoning: String,
    pub accuracy_judge_raw_output: String,
    pub accuracy_judge_response_time_seconds: Option<f64>,

    pub integrity_judge_model_id: Option<String>,
    pub integrity_judge_score: Option<i64>,
    pub integrity_judge_reasoning: String,
    pub integrity_judge_raw_output: String,
    pub integrity_judge_response_time_seconds: Option<f64>,

    #[serde(flatten)]
    pub scores: SubScores,
    pub esi_score: f64,
}

impl ItemResult {
    /// Fresh record in the `INITIATED` shape: scores zero, text fields at
    /// their placeholders.
    pub fn new(
        id: usize,
        dataset_short_name: impl Into<String>,
        worker_model_id: impl Into<String>,
        version: PromptVersion,
    ) -> Self {
        Self {
            id,
            dataset_short_name: dataset_short_name.into(),
            status: ItemStatus::Initiated,
            processing_error_details: None,
            scenario_code: Value::String(NOT_AVAILABLE.to_string()),
            instruction: None,
            question: None,
            reference_answer: None,
            worker_model_id: worker_model_id.into(),
            worker_prompt_version: version,
            worker_answer_raw: NOT_AVAILABLE.to_string(),
            worker_answer_cleaned: NOT_AVAILABLE.to_string(),
            worker_api_error_details: None,
            worker_prompt_tokens: None,
            worker_completion_tokens: None,
            worker_output_correctly_formatted: false,
            worker_response_time_seconds: None,
            accuracy_judge_model_id: None,
            judge_verdict_is_correct: false,
            accuracy_judge_reasoning: NOT_JUDGED.to_string(),
            accuracy_judge_raw_output: NOT_AVAILABLE.to_string(),
            accuracy_judge_response_time_seconds: None,
            integrity_judge_model_id: None,
            integrity_judge_score: None,
            integrity_judge_reasoning: NOT_JUDGED.to_string(),
            integrity_judge_raw_output: NOT_AVAILABLE.to_string(),
            integrity_judge_response_time_seconds: None,
            scores: SubScores::default(),
            esi_score: 0.0,
        }
    }

    /// Copy the parsed input fields onto the record.
    pub fn attach_item(&mut self, item: &Item) {
        self.scenario_code = item.scenario_code.clone();
        self.instruction = Some(item.instruction.clone());
        self.question = Some(item.question.clone());
        self.reference_answer = Some(item.reference_answer.clone());
    }

    /// Move to `next` unless an error status was already recorded.
    pub fn advance(&mut self, next: ItemStatus) {
        if !self.status.is_error() {
            self.status = next;
        }
    }

    /// Terminal failure that discards all scores.
    pub fn fail(&mut self, status: ItemStatus, details: impl Into<String>) {
        self.status = status;
        self.processing_error_details = Some(details.into());
        self.scores = SubScores::default();
        self.esi_score = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_screaming_snake() {
        for status in [
            ItemStatus::ErrorWorkerApi,
            ItemStatus::PendingEsiCalc,
            ItemStatus::ErrorInputJsonDecode,
            ItemStatus::SkippedDataIncomplete,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn pending_states_are_not_terminal() {
        assert!(!ItemStatus::PendingWorker.is_terminal());
        assert!(!ItemStatus::Initiated.is_terminal());
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::SkippedDataIncomplete.is_terminal());
        assert!(!ItemStatus::SkippedDataIncomplete.is_error());
    }

    #[test]
    fn parse_full_line() {
        let line = r#"{"instruction":"I","question":"Q","answer":" 42 ","scenario_code":"S-7"}"#;
        let ParsedLine::Ready(item) = parse_line(3, line).unwrap() else {
            panic!("expected ready item");
        };
        assert_eq!(item.id, 3);
        assert_eq!(item.reference_answer, "42");
        assert_eq!(item.scenario_code, Value::String("S-7".into()));
    }

    #[test]
    fn parse_stringifies_numeric_answer_and_defaults_scenario() {
        let ParsedLine::Ready(item) =
            parse_line(1, r#"{"instruction":"I","question":"Q","answer":42}"#).unwrap()
        else {
            panic!("expected ready item");
        };
        assert_eq!(item.reference_answer, "42");
        assert_eq!(item.scenario_code, Value::String("N/A".into()));

        let ParsedLine::Ready(item) = parse_line(1, r#"{"instruction":"I","question":"Q"}"#).unwrap()
        else {
            panic!("expected ready item");
        };
        assert_eq!(item.reference_answer, "");
    }

    #[test]
    fn parse_missing_or_null_fields_is_incomplete() {
        assert_eq!(
            parse_line(1, r#"{"instruction":"I"}"#).unwrap(),
            ParsedLine::Incomplete
        );
        assert_eq!(
            parse_line(1, r#"{"instruction":"I","question":null}"#).unwrap(),
            ParsedLine::Incomplete
        );
    }

    #[test]
    fn parse_rejects_invalid_json_and_non_objects() {
        assert!(parse_line(1, "{not json").is_err());
        assert!(parse_line(1, "[1,2]").is_err());
        assert!(parse_line(1, "").is_err());
    }

    #[test]
    fn new_result_has_placeholders() {
        let r = ItemResult::new(1, "ds", "org/model", PromptVersion::Direct);
        assert_eq!(r.status, ItemStatus::Initiated);
        assert_eq!(r.worker_answer_raw, "N/A");
        assert_eq!(r.accuracy_judge_reasoning, "Not judged");
        assert_eq!(r.esi_score, 0.0);

        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["s_accuracy"], 0.0);
        assert_eq!(v["worker_prompt_version"], "DIRECT");
        assert!(v["worker_prompt_tokens"].is_null());
    }

    #[test]
    fn advance_never_overwrites_error() {
        let mut r = ItemResult::new(1, "ds", "m", PromptVersion::Cot);
        r.advance(ItemStatus::ErrorAccuracyJudge);
        r.advance(ItemStatus::PendingEsiCalc);
        assert_eq!(r.status, ItemStatus::ErrorAccuracyJudge);
    }

    #[test]
    fn fail_zeroes_scores() {
        let mut r = ItemResult::new(1, "ds", "m", PromptVersion::Cot);
        r.scores.safety = 100.0;
        r.esi_score = 50.0;
        r.fail(ItemStatus::ErrorUnexpectedPipeline, "boom");
        assert_eq!(r.scores, SubScores::default());
        assert_eq!(r.esi_score, 0.0);
        assert_eq!(r.processing_error_details.as_deref(), Some("boom"));
    }
}
