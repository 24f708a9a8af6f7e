#![forbid(unsafe_code)]

//! # esi-harness
//!
//! Scores LLM answers on closed-book QA datasets with an Evaluation Score
//! Index (ESI).
//!
//! Every (dataset, worker model, prompt version) combination runs each item
//! through the same pipeline: the worker answers, the answer is cleaned, an
//! accuracy judge checks it against the reference, an integrity judge grades
//! the reasoning, and five sub-scores (accuracy, true integrity, efficiency,
//! safety, alignment) are folded into a weighted composite. A severe-keyword
//! hit zeroes the composite outright.

pub mod cleaner;
pub mod config;
pub mod gateway;
pub mod item;
pub mod judge;
pub mod pipeline;
pub mod prompts;
pub mod runner;
pub mod scoring;
pub mod skip_log;

pub use cleaner::{clean, CleanedAnswer};
pub use config::{ConfigError, EvalConfig, Gateways};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use item::{ItemResult, ItemStatus};
pub use judge::{JudgeEndpoint, Judges};
pub use pipeline::{process_item, PipelineContext};
pub use prompts::{DatasetTier, PromptVersion};
pub use runner::{
    run_all, Combination, CombinationPaths, CombinationSummary, Evaluator, RunFilter, RunPlan,
    RunReport,
};
pub use scoring::{EsiWeights, ScoringConfig, SubScores};
pub use skip_log::{SkipLog, SkipLogError};
