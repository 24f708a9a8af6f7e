//! Item pipeline: one input line through worker → clean → judges → scores.
//!
//! ```text
//! INITIATED ─┬─ SKIPPED_DATA_INCOMPLETE
//!            ├─ ERROR_INPUT_JSON_DECODE
//!            └─ PENDING_WORKER ─┬─ ERROR_WORKER_API
//!                               └─ PENDING_ACCURACY_JUDGE ─┬─ ERROR_ACCURACY_JUDGE ──┐
//!                                                          └─ PENDING_INTEGRITY_JUDGE ┤
//!                                      ┌──────────────────────────────────────────────┘
//!                                      └─ integrity judge ─┬─ ERROR_INTEGRITY_JUDGE
//!                                                          └─ PENDING_ESI_CALC ─ COMPLETED
//! ```
//!
//! An accuracy judge failure keeps the item going so the integrity verdict
//! and scores are still recorded; only a worker failure stops early. Any
//! fault escaping the stages, including a panic, ends in
//! `ERROR_UNEXPECTED_PIPELINE` with every score at zero.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use crate::cleaner;
use crate::gateway::{Attribution, ChatGateway, ChatRequest, FinishReason};
use crate::item::{
    parse_line, ItemResult, ItemStatus, ParsedLine, WORKER_API_ERROR, WORKER_ERROR_CLEANED,
};
use crate::judge::{JudgeInput, Judges};
use crate::prompts::{DatasetTier, PromptVersion};
use crate::scoring::{self, AlignmentInput, ScoringConfig, SubScores};
use crate::skip_log::SkipLog;

const WORKER_TEMPERATURE: f32 = 0.01;
const WORKER_TOP_P: f32 = 0.1;

/// Internal fault inside one item's pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Panicked(_) => "panic",
        }
    }
}

/// Everything one combination's items share. Read-only while items run,
/// apart from the skip log, which serializes its own writes.
#[derive(Clone)]
pub struct PipelineContext {
    pub dataset_short_name: String,
    pub tier: DatasetTier,
    pub worker: Arc<dyn ChatGateway>,
    pub worker_model_id: String,
    pub version: PromptVersion,
    pub judges: Judges,
    pub scoring: Arc<ScoringConfig>,
    pub skip_log: SkipLog,
}

/// Run one input line to a terminal status. Never fails and never panics
/// outward.
pub async fn process_item(ctx: &PipelineContext, id: usize, line: &str) -> ItemResult {
    let mut result = ItemResult::new(
        id,
        &ctx.dataset_short_name,
        &ctx.worker_model_id,
        ctx.version,
    );

    let outcome = AssertUnwindSafe(run_stages(ctx, id, line, &mut result))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(payload))));

    if let Err(err) = outcome {
        let details = format!(
            "Unexpected error in pipeline for item {id} from {} (Model: {}, Prompt: {}): {err}. Line: {}",
            ctx.dataset_short_name,
            ctx.worker_model_id,
            ctx.version,
            line.trim()
        );
        tracing::error!(
            item = id,
            dataset = %ctx.dataset_short_name,
            model = %ctx.worker_model_id,
            prompt_version = %ctx.version,
            code = err.code(),
            error = %err,
            "item pipeline fault"
        );
        record_skip(ctx, id, &details);
        result.fail(ItemStatus::ErrorUnexpectedPipeline, details);
    }

    debug_assert!(result.status.is_terminal(), "item {id} left in {:?}", result.status);
    result
}

async fn run_stages(
    ctx: &PipelineContext,
    id: usize,
    line: &str,
    result: &mut ItemResult,
) -> Result<(), PipelineError> {
    let item = match parse_line(id, line) {
        Ok(ParsedLine::Ready(item)) => item,
        Ok(ParsedLine::Incomplete) => {
            let details = format!(
                "Skipped item {id} from {} (missing instruction or question): {}",
                ctx.dataset_short_name,
                line.trim()
            );
            record_skip(ctx, id, &details);
            result.status = ItemStatus::SkippedDataIncomplete;
            result.processing_error_details = Some(details);
            return Ok(());
        }
        Err(err) => {
            let details = format!(
                "Input JSON decode error for item {id} from {}: {err}. Line: {}",
                ctx.dataset_short_name,
                line.trim()
            );
            tracing::warn!(item = id, dataset = %ctx.dataset_short_name, error = %err, "input line is not a JSON object");
            record_skip(ctx, id, &details);
            result.fail(ItemStatus::ErrorInputJsonDecode, details);
            return Ok(());
        }
    };

    result.attach_item(&item);
    result.status = ItemStatus::PendingWorker;

    // Worker
    let prompt = ctx.version.worker_template().render(&[
        ("instruction", &item.instruction),
        ("question", &item.question),
    ]);
    let req = ChatRequest::new(
        &ctx.worker_model_id,
        prompt.to_messages(),
        Attribution::new("pipeline::worker").with_item(id),
    )
    .temperature(WORKER_TEMPERATURE)
    .top_p(WORKER_TOP_P)
    .max_tokens(ctx.version.worker_max_tokens());

    let started = Instant::now();
    let raw = match ctx.worker.chat(req).await {
        Ok(resp) => {
            result.worker_response_time_seconds = Some(started.elapsed().as_secs_f64());
            if resp.finish_reason == FinishReason::Length {
                tracing::warn!(
                    item = id,
                    model = %ctx.worker_model_id,
                    "worker output hit the token ceiling"
                );
            }
            match resp.content {
                Some(content) => {
                    result.worker_prompt_tokens = resp.usage.and_then(|u| u.prompt_tokens);
                    result.worker_completion_tokens = resp.usage.and_then(|u| u.completion_tokens);
                    content
                }
                None => {
                    worker_failed(ctx, result, "No content from worker".to_string());
                    return Ok(());
                }
            }
        }
        Err(err) => {
            worker_failed(ctx, result, err.to_string());
            return Ok(());
        }
    };
    result.worker_answer_raw = raw.clone();

    let cleaned = cleaner::clean(&raw, ctx.version);
    result.worker_answer_cleaned = cleaned.text.clone();
    result.worker_output_correctly_formatted = cleaned.correctly_formatted;

    let judge_input = JudgeInput {
        item_id: id,
        instruction: &item.instruction,
        question: &item.question,
    };

    // Accuracy judge
    result.status = ItemStatus::PendingAccuracyJudge;
    let accuracy = ctx
        .judges
        .accuracy(judge_input, ctx.tier, &item.reference_answer, &cleaned.text)
        .await;
    let accuracy_failed = accuracy.error.is_some();
    let is_correct = accuracy.is_correct && !accuracy_failed;

    result.accuracy_judge_model_id = Some(ctx.judges.accuracy.model_id.clone());
    result.judge_verdict_is_correct = accuracy.is_correct;
    result.accuracy_judge_reasoning = accuracy.reasoning;
    result.accuracy_judge_raw_output = accuracy.raw_output;
    result.accuracy_judge_response_time_seconds = accuracy.latency.map(|d| d.as_secs_f64());
    result.status = if accuracy_failed {
        ItemStatus::ErrorAccuracyJudge
    } else {
        ItemStatus::PendingIntegrityJudge
    };

    // Integrity judge runs even after an accuracy failure.
    let integrity = ctx.judges.integrity(judge_input, &raw, &cleaned.text).await;

    result.integrity_judge_model_id = Some(ctx.judges.integrity.model_id.clone());
    result.integrity_judge_score = integrity.score;
    result.integrity_judge_reasoning = integrity.reasoning;
    result.integrity_judge_raw_output = integrity.raw_output;
    result.integrity_judge_response_time_seconds = integrity.latency.map(|d| d.as_secs_f64());
    if integrity.error.is_some() || integrity.score.is_none() {
        result.advance(ItemStatus::ErrorIntegrityJudge);
    } else {
        result.advance(ItemStatus::PendingEsiCalc);
    }

    // Scores
    let config = ctx.scoring.as_ref();
    let scores = SubScores {
        accuracy: scoring::accuracy(is_correct),
        true_integrity: scoring::true_integrity(integrity.score),
        efficiency: scoring::efficiency(result.worker_completion_tokens.map(i64::from), config),
        safety: scoring::safety(&cleaned.text, config),
        alignment_simple: scoring::alignment_simple(
            AlignmentInput {
                is_correct,
                correctly_formatted: cleaned.correctly_formatted,
                version: ctx.version,
                cleaned_len: cleaned.text.chars().count(),
                reference_len: item.reference_answer.chars().count(),
            },
            config,
        ),
    };
    result.scores = scores;
    result.esi_score = scoring::esi(&scores, &config.weights);
    result.advance(ItemStatus::Completed);

    tracing::debug!(
        item = id,
        status = %result.status,
        esi = result.esi_score,
        "item finished"
    );
    Ok(())
}

/// A lost skip log line never changes the item's status.
fn record_skip(ctx: &PipelineContext, id: usize, details: &str) {
    if let Err(err) = ctx.skip_log.append(details) {
        tracing::warn!(
            item = id,
            dataset = %ctx.dataset_short_name,
            error = %err,
            "skip log unavailable"
        );
    }
}

fn worker_failed(ctx: &PipelineContext, result: &mut ItemResult, details: String) {
    tracing::warn!(
        item = result.id,
        dataset = %ctx.dataset_short_name,
        model = %ctx.worker_model_id,
        error = %details,
        "worker call failed"
    );
    result.worker_answer_raw = WORKER_API_ERROR.to_string();
    result.worker_answer_cleaned = WORKER_ERROR_CLEANED.to_string();
    result.worker_api_error_details = Some(details);
    result.status = ItemStatus::ErrorWorkerApi;
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
