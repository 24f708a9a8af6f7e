//! Combination runner.
//!
//! A combination is one (dataset, worker model, prompt version) triple.
//! Combinations run strictly one after another; inside a combination every
//! item is spawned as its own task and a semaphore bounds how many are in
//! flight. Results land in index-addressed slots, so the persisted file keeps
//! input order whatever order items finish in.
//!
//! Each combination leaves three artifacts behind:
//! - results JSONL, one [`ItemResult`] per input line
//! - the skip log, only when something was logged
//! - a pretty-printed [`CombinationSummary`]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::{DatasetConfig, EvalConfig, Gateways, OutputTemplates};
use crate::gateway::ChatGateway;
use crate::item::{ItemResult, ItemStatus};
use crate::judge::{JudgeEndpoint, Judges};
use crate::pipeline::{process_item, PipelineContext};
use crate::prompts::{DatasetTier, PromptVersion};
use crate::scoring::ScoringConfig;
use crate::skip_log::SkipLog;

/// Marker written for every score average when nothing completed.
pub const NO_ITEMS_SCORED: &str = "N/A (0 items scored)";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{kind} '{value}' is not in the configuration")]
    UnknownFilter { kind: &'static str, value: String },
    #[error("no combinations selected")]
    NothingToRun,
}

// =============================================================================
// Artifact paths
// =============================================================================

/// File-name-safe form of a model id: `/` becomes `__`, `:` becomes `_`.
pub fn sanitize_model_id(model_id: &str) -> String {
    model_id.replace('/', "__").replace(':', "_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinationPaths {
    pub final_output: PathBuf,
    pub skipped_log: PathBuf,
    pub summary: PathBuf,
}

impl CombinationPaths {
    pub fn render(templates: &OutputTemplates, combination: &Combination) -> Self {
        let model = sanitize_model_id(&combination.worker_model_id);
        let fill = |template: &str| {
            PathBuf::from(
                template
                    .replace("{dataset_short_name}", &combination.dataset_short_name)
                    .replace("{model_id}", &model)
                    .replace("{prompt_version}", combination.version.as_str()),
            )
        };
        Self {
            final_output: fill(&templates.final_output_template),
            skipped_log: fill(&templates.skipped_log_template),
            summary: fill(&templates.summary_template),
        }
    }

    /// Create parent directories and remove artifacts of a previous run.
    fn prepare(&self) {
        for path in [&self.final_output, &self.skipped_log, &self.summary] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    tracing::warn!(path = %parent.display(), error = %err, "could not create output directory");
                }
            }
            match std::fs::remove_file(path) {
                Ok(()) => tracing::info!(path = %path.display(), "removed previous artifact"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "could not remove previous artifact")
                }
            }
        }
    }
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub dataset_short_name: String,
    pub worker_model_id: String,
    pub version: PromptVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationDetails {
    pub dataset_short_name: String,
    pub worker_model_id: String,
    pub prompt_version: PromptVersion,
    pub accuracy_judge_model_id: String,
    pub integrity_judge_model_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_input_items: usize,
    pub items_pipeline_completed_for_scoring: usize,
    pub worker_api_errors: usize,
    pub accuracy_judge_api_errors: usize,
    pub integrity_judge_api_errors: usize,
    pub input_json_decode_errors_in_pipeline: usize,
    pub skipped_data_incomplete_in_pipeline: usize,
    pub other_unhandled_pipeline_errors: usize,
}

/// A metric average, or a note explaining why there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Note(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationSummary {
    pub combination_details: CombinationDetails,
    pub processing_summary: ProcessingSummary,
    pub status_counts: BTreeMap<ItemStatus, usize>,
    pub metrics_summary: BTreeMap<String, MetricValue>,
    pub final_output_file: PathBuf,
    /// `None` when nothing was logged.
    pub skipped_items_log: Option<PathBuf>,
}

impl CombinationSummary {
    /// Aggregate finished results. Only `COMPLETED` items feed the averages.
    pub fn from_results(
        details: CombinationDetails,
        results: &[ItemResult],
        total_input_items: usize,
        paths: &CombinationPaths,
        skip_log_written: bool,
    ) -> Self {
        let mut processing = ProcessingSummary {
            total_input_items,
            ..ProcessingSummary::default()
        };
        let mut status_counts = BTreeMap::new();
        for result in results {
            *status_counts.entry(result.status).or_insert(0) += 1;
            let counter = match result.status {
                ItemStatus::Completed => &mut processing.items_pipeline_completed_for_scoring,
                ItemStatus::ErrorWorkerApi => &mut processing.worker_api_errors,
                ItemStatus::ErrorAccuracyJudge => &mut processing.accuracy_judge_api_errors,
                ItemStatus::ErrorIntegrityJudge => &mut processing.integrity_judge_api_errors,
                ItemStatus::ErrorInputJsonDecode => {
                    &mut processing.input_json_decode_errors_in_pipeline
                }
                ItemStatus::SkippedDataIncomplete => {
                    &mut processing.skipped_data_incomplete_in_pipeline
                }
                ItemStatus::ErrorUnexpectedPipeline | ItemStatus::ErrorFutureException => {
                    &mut processing.other_unhandled_pipeline_errors
                }
                _ => continue,
            };
            *counter += 1;
        }

        let completed: Vec<&ItemResult> = results
            .iter()
            .filter(|r| r.status == ItemStatus::Completed)
            .collect();

        let mut metrics = BTreeMap::new();
        let score_columns: [(&str, fn(&ItemResult) -> f64); 6] = [
            ("accuracy", |r| r.scores.accuracy),
            ("true_integrity", |r| r.scores.true_integrity),
            ("efficiency", |r| r.scores.efficiency),
            ("safety", |r| r.scores.safety),
            ("alignment_simple", |r| r.scores.alignment_simple),
            ("esi", |r| r.esi_score),
        ];
        for (name, column) in score_columns {
            let value = match mean(completed.iter().map(|r| column(r))) {
                Some(avg) => MetricValue::Number(round2(avg)),
                None => MetricValue::Note(NO_ITEMS_SCORED.to_string()),
            };
            metrics.insert(format!("average_{name}"), value);
        }

        let latency_columns: [(&str, fn(&ItemResult) -> Option<f64>); 3] = [
            ("worker", |r| r.worker_response_time_seconds),
            ("accuracy_judge", |r| r.accuracy_judge_response_time_seconds),
            ("integrity_judge", |r| r.integrity_judge_response_time_seconds),
        ];
        for (name, column) in latency_columns {
            if let Some(avg) = mean(completed.iter().filter_map(|r| column(r))) {
                metrics.insert(
                    format!("average_{name}_response_times_seconds"),
                    MetricValue::Number(round2(avg)),
                );
            }
        }

        Self {
            combination_details: details,
            processing_summary: processing,
            status_counts,
            metrics_summary: metrics,
            final_output_file: paths.final_output.clone(),
            skipped_items_log: skip_log_written.then(|| paths.skipped_log.clone()),
        }
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Human-readable end-of-combination report.
    pub fn print_report(&self) {
        let d = &self.combination_details;
        let p = &self.processing_summary;
        println!();
        println!(
            "=== ESI report: dataset={} model={} prompt={} ===",
            d.dataset_short_name, d.worker_model_id, d.prompt_version
        );
        println!("Results: {}", self.final_output_file.display());
        println!("Input items: {}", p.total_input_items);
        println!("Completed (scored): {}", p.items_pipeline_completed_for_scoring);
        println!("Worker API errors: {}", p.worker_api_errors);
        println!("Accuracy judge errors: {}", p.accuracy_judge_api_errors);
        println!("Integrity judge errors: {}", p.integrity_judge_api_errors);
        println!("Input JSON decode errors: {}", p.input_json_decode_errors_in_pipeline);
        println!("Skipped (incomplete input): {}", p.skipped_data_incomplete_in_pipeline);
        println!("Other pipeline errors: {}", p.other_unhandled_pipeline_errors);
        for (name, value) in &self.metrics_summary {
            match value {
                MetricValue::Number(v) => println!("  {name}: {v:.2}"),
                MetricValue::Note(note) => println!("  {name}: {note}"),
            }
        }
        if let Some(log) = &self.skipped_items_log {
            println!("Skipped/errored item details: {}", log.display());
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn write_results(path: &Path, results: &[ItemResult]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for result in results {
        serde_json::to_writer(&mut out, result).map_err(io::Error::other)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

// =============================================================================
// Evaluator
// =============================================================================

/// Shared, read-only machinery for running combinations.
#[derive(Clone)]
pub struct Evaluator {
    worker: Arc<dyn ChatGateway>,
    judges: Judges,
    scoring: Arc<ScoringConfig>,
    max_concurrent_items: usize,
}

impl Evaluator {
    pub fn new(
        worker: Arc<dyn ChatGateway>,
        judges: Judges,
        scoring: ScoringConfig,
        max_concurrent_items: usize,
    ) -> Self {
        Self {
            worker,
            judges,
            scoring: Arc::new(scoring),
            max_concurrent_items: max_concurrent_items.max(1),
        }
    }

    pub fn from_config(config: &EvalConfig, gateways: &Gateways) -> Self {
        let judges = Judges::new(
            JudgeEndpoint::new(
                gateways.accuracy_judge.clone(),
                &config.accuracy_judge.model_id,
            ),
            JudgeEndpoint::new(
                gateways.integrity_judge.clone(),
                &config.integrity_judge.model_id,
            ),
        );
        Self::new(
            gateways.worker.clone(),
            judges,
            config.scoring.clone(),
            config.max_concurrent_items,
        )
    }

    /// Run every line of a dataset through one combination and write its
    /// artifacts. Never fails; write problems are logged.
    pub async fn run_combination(
        &self,
        combination: &Combination,
        lines: Arc<[String]>,
        paths: &CombinationPaths,
    ) -> CombinationSummary {
        let started = Instant::now();
        paths.prepare();

        let (skip_log, skip_worker) = SkipLog::open(&paths.skipped_log);
        let ctx = Arc::new(PipelineContext {
            dataset_short_name: combination.dataset_short_name.clone(),
            tier: DatasetTier::from_dataset_name(&combination.dataset_short_name),
            worker: self.worker.clone(),
            worker_model_id: combination.worker_model_id.clone(),
            version: combination.version,
            judges: self.judges.clone(),
            scoring: self.scoring.clone(),
            skip_log: skip_log.clone(),
        });

        tracing::info!(
            dataset = %combination.dataset_short_name,
            model = %combination.worker_model_id,
            prompt_version = %combination.version,
            items = lines.len(),
            max_concurrent = self.max_concurrent_items,
            "starting combination"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_items));
        let mut pending = FuturesUnordered::new();
        for idx in 0..lines.len() {
            let sem = semaphore.clone();
            let ctx = ctx.clone();
            let lines = lines.clone();
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                Ok::<_, tokio::sync::AcquireError>(process_item(&ctx, idx + 1, &lines[idx]).await)
            });
            pending.push(async move { (idx, handle.await) });
        }

        let total = lines.len();
        let mut slots: Vec<Option<ItemResult>> = (0..total).map(|_| None).collect();
        let mut finished = 0usize;
        while let Some((idx, joined)) = pending.next().await {
            let result = match joined {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => task_failure(combination, &skip_log, idx, &err.to_string()),
                Err(err) => task_failure(combination, &skip_log, idx, &format!("task failed: {err}")),
            };
            finished += 1;
            tracing::debug!(
                item = result.id,
                status = %result.status,
                finished,
                total,
                "item done"
            );
            slots[idx] = Some(result);
        }
        let results: Vec<ItemResult> = slots.into_iter().flatten().collect();

        drop(ctx);
        drop(skip_log);
        let skip_log_written = match tokio::task::spawn_blocking(move || skip_worker.join()).await {
            Ok(Ok(lines_written)) => lines_written > 0,
            Ok(Err(err)) => {
                tracing::error!(path = %paths.skipped_log.display(), error = %err, "skip log writer failed");
                paths.skipped_log.exists()
            }
            Err(err) => {
                tracing::error!(error = %err, "skip log writer task failed");
                paths.skipped_log.exists()
            }
        };

        if let Err(err) = write_results(&paths.final_output, &results) {
            tracing::error!(path = %paths.final_output.display(), error = %err, "could not write results");
        }

        let details = CombinationDetails {
            dataset_short_name: combination.dataset_short_name.clone(),
            worker_model_id: combination.worker_model_id.clone(),
            prompt_version: combination.version,
            accuracy_judge_model_id: self.judges.accuracy.model_id.clone(),
            integrity_judge_model_id: self.judges.integrity.model_id.clone(),
        };
        let summary =
            CombinationSummary::from_results(details, &results, total, paths, skip_log_written);
        if let Err(err) = summary.write_json(&paths.summary) {
            tracing::error!(path = %paths.summary.display(), error = %err, "could not write summary");
        }

        tracing::info!(
            dataset = %combination.dataset_short_name,
            model = %combination.worker_model_id,
            prompt_version = %combination.version,
            completed = summary.processing_summary.items_pipeline_completed_for_scoring,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "combination finished"
        );
        summary
    }
}

/// Result for an item whose task died outside the pipeline boundary.
fn task_failure(
    combination: &Combination,
    skip_log: &SkipLog,
    idx: usize,
    error: &str,
) -> ItemResult {
    tracing::error!(
        item = idx + 1,
        dataset = %combination.dataset_short_name,
        model = %combination.worker_model_id,
        prompt_version = %combination.version,
        error,
        "item task failed"
    );
    let line = format!(
        "TASK FAILURE (item index {idx}): {error} for DS: {}, M: {}, P: {}",
        combination.dataset_short_name, combination.worker_model_id, combination.version
    );
    if let Err(err) = skip_log.append(line) {
        tracing::warn!(item = idx + 1, error = %err, "skip log unavailable");
    }
    let mut result = ItemResult::new(
        idx + 1,
        &combination.dataset_short_name,
        &combination.worker_model_id,
        combination.version,
    );
    result.fail(ItemStatus::ErrorFutureException, error);
    result
}

// =============================================================================
// Outer loop
// =============================================================================

/// Optional narrowing of the configured matrix. Empty lists select everything.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub datasets: Vec<String>,
    pub models: Vec<String>,
    pub prompt_versions: Vec<PromptVersion>,
}

/// The combination matrix selected for one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub datasets: Vec<DatasetConfig>,
    pub models: Vec<String>,
    pub versions: Vec<PromptVersion>,
}

impl RunPlan {
    pub fn new(config: &EvalConfig, filter: &RunFilter) -> Result<Self, RunError> {
        for name in &filter.datasets {
            if !config.datasets.iter().any(|d| &d.short_name == name) {
                return Err(RunError::UnknownFilter {
                    kind: "dataset",
                    value: name.clone(),
                });
            }
        }
        for model in &filter.models {
            if !config.worker_model_ids.contains(model) {
                return Err(RunError::UnknownFilter {
                    kind: "model",
                    value: model.clone(),
                });
            }
        }
        for version in &filter.prompt_versions {
            if !config.prompt_versions.contains(version) {
                return Err(RunError::UnknownFilter {
                    kind: "prompt version",
                    value: version.to_string(),
                });
            }
        }

        let plan = Self {
            datasets: config
                .datasets
                .iter()
                .filter(|d| filter.datasets.is_empty() || filter.datasets.contains(&d.short_name))
                .cloned()
                .collect(),
            models: config
                .worker_model_ids
                .iter()
                .filter(|m| filter.models.is_empty() || filter.models.contains(m))
                .cloned()
                .collect(),
            versions: config
                .prompt_versions
                .iter()
                .copied()
                .filter(|v| filter.prompt_versions.is_empty() || filter.prompt_versions.contains(v))
                .collect(),
        };
        if plan.combination_count() == 0 {
            return Err(RunError::NothingToRun);
        }
        Ok(plan)
    }

    pub fn combination_count(&self) -> usize {
        self.datasets.len() * self.models.len() * self.versions.len()
    }

    /// Every combination of one dataset, models outermost.
    pub fn combinations<'a>(
        &'a self,
        dataset: &'a DatasetConfig,
    ) -> impl Iterator<Item = Combination> + 'a {
        self.models.iter().flat_map(move |model| {
            self.versions.iter().map(move |&version| Combination {
                dataset_short_name: dataset.short_name.clone(),
                worker_model_id: model.clone(),
                version,
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summaries: Vec<CombinationSummary>,
    /// Datasets whose input could not be used.
    pub skipped_datasets: Vec<String>,
    pub elapsed: Duration,
}

/// Read a dataset into lines. An empty file yields no lines.
pub async fn read_dataset(path: &Path) -> io::Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(raw.lines().map(str::to_string).collect())
}

/// Run every planned combination, datasets in order, one combination at a
/// time.
pub async fn run_all(
    evaluator: &Evaluator,
    templates: &OutputTemplates,
    plan: &RunPlan,
) -> RunReport {
    let started = Instant::now();
    let mut summaries = Vec::with_capacity(plan.combination_count());
    let mut skipped_datasets = Vec::new();
    let total = plan.combination_count();
    let mut index = 0usize;

    for dataset in &plan.datasets {
        let lines = match read_dataset(&dataset.path).await {
            Ok(lines) if lines.is_empty() => {
                tracing::warn!(dataset = %dataset.short_name, path = %dataset.path.display(), "input file is empty; skipping dataset");
                skipped_datasets.push(dataset.short_name.clone());
                continue;
            }
            Ok(lines) => lines,
            Err(err) => {
                tracing::error!(dataset = %dataset.short_name, path = %dataset.path.display(), error = %err, "could not read input file; skipping dataset");
                skipped_datasets.push(dataset.short_name.clone());
                continue;
            }
        };
        let lines: Arc<[String]> = lines.into();
        tracing::info!(
            dataset = %dataset.short_name,
            tier = ?DatasetTier::from_dataset_name(&dataset.short_name),
            items = lines.len(),
            "loaded dataset"
        );

        for combination in plan.combinations(dataset) {
            index += 1;
            tracing::info!("combination {index}/{total}");
            let paths = CombinationPaths::render(templates, &combination);
            let summary = evaluator
                .run_combination(&combination, lines.clone(), &paths)
                .await;
            summaries.push(summary);
        }
    }

    let elapsed = started.elapsed();
    tracing::info!(
        combinations = summaries.len(),
        elapsed_secs = elapsed.as_secs_f64(),
        "all combinations finished"
    );
    RunReport {
        summaries,
        skipped_datasets,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::SubScores;

    fn combo() -> Combination {
        Combination {
            dataset_short_name: "geo_l1".to_string(),
            worker_model_id: "openai/gpt-4o:free".to_string(),
            version: PromptVersion::Cot,
        }
    }

    fn paths() -> CombinationPaths {
        CombinationPaths::render(&OutputTemplates::default(), &combo())
    }

    fn details() -> CombinationDetails {
        CombinationDetails {
            dataset_short_name: "geo_l1".to_string(),
            worker_model_id: "m".to_string(),
            prompt_version: PromptVersion::Cot,
            accuracy_judge_model_id: "a".to_string(),
            integrity_judge_model_id: "i".to_string(),
        }
    }

    fn completed(id: usize, accuracy: f64, esi: f64, worker_secs: Option<f64>) -> ItemResult {
        let mut r = ItemResult::new(id, "geo_l1", "m", PromptVersion::Cot);
        r.status = ItemStatus::Completed;
        r.scores.accuracy = accuracy;
        r.scores.safety = 100.0;
        r.esi_score = esi;
        r.worker_response_time_seconds = worker_secs;
        r
    }

    #[test]
    fn model_id_is_made_file_safe() {
        assert_eq!(sanitize_model_id("openai/gpt-4o:free"), "openai__gpt-4o_free");
        assert_eq!(sanitize_model_id("plain"), "plain");
    }

    #[test]
    fn paths_fill_every_placeholder() {
        let p = paths();
        assert_eq!(
            p.final_output,
            PathBuf::from("results/geo_l1/esi_openai__gpt-4o_free_COT.jsonl")
        );
        assert_eq!(
            p.summary,
            PathBuf::from("results/geo_l1/summary_openai__gpt-4o_free_COT.json")
        );
    }

    #[test]
    fn summary_averages_only_completed_items() {
        let mut failed = ItemResult::new(3, "geo_l1", "m", PromptVersion::Cot);
        failed.status = ItemStatus::ErrorWorkerApi;
        let mut skipped = ItemResult::new(4, "geo_l1", "m", PromptVersion::Cot);
        skipped.status = ItemStatus::SkippedDataIncomplete;
        let results = vec![
            completed(1, 100.0, 80.0, Some(1.0)),
            completed(2, 0.0, 45.0, Some(2.0)),
            failed,
            skipped,
        ];

        let s = CombinationSummary::from_results(details(), &results, 4, &paths(), true);
        assert_eq!(s.processing_summary.items_pipeline_completed_for_scoring, 2);
        assert_eq!(s.processing_summary.worker_api_errors, 1);
        assert_eq!(s.processing_summary.skipped_data_incomplete_in_pipeline, 1);
        assert_eq!(s.status_counts[&ItemStatus::Completed], 2);
        assert_eq!(
            s.metrics_summary["average_accuracy"],
            MetricValue::Number(50.0)
        );
        assert_eq!(s.metrics_summary["average_esi"], MetricValue::Number(62.5));
        assert_eq!(
            s.metrics_summary["average_worker_response_times_seconds"],
            MetricValue::Number(1.5)
        );
        assert!(!s
            .metrics_summary
            .contains_key("average_accuracy_judge_response_times_seconds"));
        assert_eq!(s.skipped_items_log, Some(paths().skipped_log));
    }

    #[test]
    fn task_failure_is_zeroed_logged_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("skipped.log");
        let (skip_log, writer) = SkipLog::open(&log_path);

        let failed = task_failure(&combo(), &skip_log, 2, "task failed: cancelled");
        drop(skip_log);
        assert_eq!(writer.join().unwrap(), 1);

        assert_eq!(failed.id, 3);
        assert_eq!(failed.status, ItemStatus::ErrorFutureException);
        assert_eq!(failed.scores, SubScores::default());
        assert_eq!(failed.esi_score, 0.0);
        assert_eq!(
            failed.processing_error_details.as_deref(),
            Some("task failed: cancelled")
        );

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(
            log.trim_end(),
            "TASK FAILURE (item index 2): task failed: cancelled for DS: geo_l1, M: openai/gpt-4o:free, P: COT"
        );

        let s = CombinationSummary::from_results(details(), &[failed], 3, &paths(), true);
        assert_eq!(s.processing_summary.other_unhandled_pipeline_errors, 1);
        assert_eq!(s.processing_summary.items_pipeline_completed_for_scoring, 0);
    }

    #[test]
    fn summary_with_nothing_completed_uses_marker() {
        let mut failed = ItemResult::new(1, "geo_l1", "m", PromptVersion::Cot);
        failed.fail(ItemStatus::ErrorFutureException, "boom");
        let s = CombinationSummary::from_results(details(), &[failed], 1, &paths(), false);
        assert_eq!(s.processing_summary.other_unhandled_pipeline_errors, 1);
        for key in ["average_accuracy", "average_esi", "average_safety"] {
            assert_eq!(
                s.metrics_summary[key],
                MetricValue::Note(NO_ITEMS_SCORED.to_string())
            );
        }
        assert!(s.skipped_items_log.is_none());

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["metrics_summary"]["average_esi"], NO_ITEMS_SCORED);
        assert_eq!(json["status_counts"]["ERROR_FUTURE_EXCEPTION"], 1);
        assert!(json["skipped_items_log"].is_null());
    }

    #[test]
    fn mean_of_nothing_is_none() {
        assert_eq!(mean(std::iter::empty()), None);
        assert_eq!(mean([1.0, 2.0, 3.0].into_iter()), Some(2.0));
    }

    #[test]
    fn averages_round_to_two_decimals() {
        assert_eq!(round2(100.0 / 3.0), 33.33);
        assert_eq!(round2(2.0 / 3.0), 0.67);
    }
}
