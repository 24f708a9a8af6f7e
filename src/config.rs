//! Run configuration.
//!
//! A JSON settings file is deserialized into [`RawConfig`] and validated once
//! into an immutable [`EvalConfig`]. Nothing reads configuration from ambient
//! state; the runner receives the validated value explicitly.
//!
//! ```json
//! {
//!   "worker": { "api_url": "https://openrouter.ai/api/v1/chat/completions",
//!               "api_token": "sk-...", "model_ids": ["org/model"] },
//!   "accuracy_judge": { "api_url": "...", "api_token": "...", "model_id": "..." },
//!   "integrity_judge": { "api_url": "...", "api_token": "...", "model_id": "..." },
//!   "datasets": { "geo_l1": { "path": "data/geo_l1.jsonl" } },
//!   "datasets_to_run": ["geo_l1"],
//!   "prompt_versions": ["DIRECT", "COT", "EXPERT"]
//! }
//! ```
//!
//! `openrouter`, `output`, `scoring`, `network` and
//! `max_concurrent_items_per_combo` are optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::chat_api::ChatCompletionsAdapter;
use crate::gateway::{
    ChatGateway, GatewayConfig, OpenRouterHeaders, ProviderError, ProviderGateway, UsageSink,
};
use crate::prompts::PromptVersion;
use crate::scoring::{EsiWeights, NonPositiveWeights, ScoringConfig};

pub const DEFAULT_CONFIG_PATH: &str = "settings.json";
const DEFAULT_MAX_CONCURRENT_ITEMS: usize = 5;
const PLACEHOLDER_MARKERS: [&str; 2] = ["your_", "_here"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Weights(#[from] NonPositiveWeights),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Parse(_) => "parse",
            Self::Invalid(_) => "invalid",
            Self::Weights(_) => "weights",
        }
    }

    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

// =============================================================================
// Raw file shape
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub worker: RawWorker,
    pub accuracy_judge: RawJudge,
    pub integrity_judge: RawJudge,
    #[serde(default)]
    pub openrouter: RawOpenRouter,
    pub datasets: BTreeMap<String, RawDataset>,
    pub datasets_to_run: Vec<String>,
    pub prompt_versions: Vec<String>,
    #[serde(default)]
    pub output: OutputTemplates,
    #[serde(default)]
    pub scoring: RawScoring,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_max_concurrent_items")]
    pub max_concurrent_items_per_combo: usize,
}

fn default_max_concurrent_items() -> usize {
    DEFAULT_MAX_CONCURRENT_ITEMS
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawWorker {
    pub api_url: String,
    #[serde(default)]
    pub api_token: String,
    pub model_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJudge {
    pub api_url: String,
    #[serde(default)]
    pub api_token: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOpenRouter {
    pub http_referer: Option<String>,
    pub x_title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDataset {
    pub path: PathBuf,
}

/// Artifact path templates. `{dataset_short_name}`, `{model_id}` and
/// `{prompt_version}` are substituted per combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputTemplates {
    pub final_output_template: String,
    pub skipped_log_template: String,
    pub summary_template: String,
}

impl Default for OutputTemplates {
    fn default() -> Self {
        Self {
            final_output_template:
                "results/{dataset_short_name}/esi_{model_id}_{prompt_version}.jsonl".to_string(),
            skipped_log_template:
                "results/{dataset_short_name}/skipped_{model_id}_{prompt_version}.log".to_string(),
            summary_template:
                "results/{dataset_short_name}/summary_{model_id}_{prompt_version}.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawScoring {
    pub token_budget: i64,
    pub p_irrelevant: f64,
    pub severe_keywords: Vec<String>,
    pub max_length_ratio: f64,
    pub weights: EsiWeights,
}

impl Default for RawScoring {
    fn default() -> Self {
        let defaults = ScoringConfig::default();
        Self {
            token_budget: defaults.token_budget,
            p_irrelevant: defaults.p_irrelevant,
            severe_keywords: defaults.severe_keywords,
            max_length_ratio: defaults.max_length_ratio,
            weights: defaults.weights,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Total attempts per model call.
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
    pub request_timeout_seconds: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 5.0,
            request_timeout_seconds: 120.0,
        }
    }
}

// =============================================================================
// Validated config
// =============================================================================

/// One chat endpoint and its credential.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub api_url: String,
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub endpoint: Endpoint,
    pub model_id: String,
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub short_name: String,
    pub path: PathBuf,
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub worker: Endpoint,
    pub worker_model_ids: Vec<String>,
    pub accuracy_judge: JudgeConfig,
    pub integrity_judge: JudgeConfig,
    pub openrouter: OpenRouterHeaders,
    /// In run order.
    pub datasets: Vec<DatasetConfig>,
    pub prompt_versions: Vec<PromptVersion>,
    pub output: OutputTemplates,
    pub scoring: ScoringConfig,
    pub gateway: GatewayConfig,
    pub request_timeout: Duration,
    /// Always at least 1.
    pub max_concurrent_items: usize,
}

/// The three chat gateways a run needs.
#[derive(Clone)]
pub struct Gateways {
    pub worker: Arc<dyn ChatGateway>,
    pub accuracy_judge: Arc<dyn ChatGateway>,
    pub integrity_judge: Arc<dyn ChatGateway>,
}

/// Read and validate a settings file.
pub fn load(path: impl AsRef<Path>) -> Result<EvalConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = serde_json::from_str(&raw)?;
    EvalConfig::from_raw(parsed)
}

impl EvalConfig {
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let worker = endpoint("worker", raw.worker.api_url, raw.worker.api_token)?;
        let worker_model_ids = non_empty_ids(raw.worker.model_ids)?;
        let accuracy_judge = judge("accuracy_judge", raw.accuracy_judge)?;
        let integrity_judge = judge("integrity_judge", raw.integrity_judge)?;

        if raw.prompt_versions.is_empty() {
            return Err(ConfigError::invalid("prompt_versions must not be empty"));
        }
        let prompt_versions = raw
            .prompt_versions
            .iter()
            .map(|v| v.parse::<PromptVersion>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;

        let mut datasets = Vec::with_capacity(raw.datasets_to_run.len());
        for name in raw.datasets_to_run {
            let Some(entry) = raw.datasets.get(&name) else {
                return Err(ConfigError::invalid(format!(
                    "dataset '{name}' in datasets_to_run is not defined in datasets"
                )));
            };
            if entry.path.as_os_str().is_empty() {
                return Err(ConfigError::invalid(format!("dataset '{name}' has an empty path")));
            }
            datasets.push(DatasetConfig {
                short_name: name,
                path: entry.path.clone(),
            });
        }

        let scoring = scoring(raw.scoring)?;

        let network = raw.network;
        let retry_delay = seconds("network.retry_delay_seconds", network.retry_delay_seconds)?;
        let request_timeout =
            seconds("network.request_timeout_seconds", network.request_timeout_seconds)?;
        if request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "network.request_timeout_seconds must be positive",
            ));
        }

        Ok(Self {
            worker,
            worker_model_ids,
            accuracy_judge,
            integrity_judge,
            openrouter: OpenRouterHeaders {
                http_referer: raw.openrouter.http_referer,
                x_title: raw.openrouter.x_title,
            },
            datasets,
            prompt_versions,
            output: raw.output,
            scoring,
            gateway: GatewayConfig {
                max_retries: network.max_retries,
                retry_base_delay: retry_delay,
            },
            request_timeout,
            max_concurrent_items: raw.max_concurrent_items_per_combo.max(1),
        })
    }

    pub fn combination_count(&self) -> usize {
        self.datasets.len() * self.worker_model_ids.len() * self.prompt_versions.len()
    }

    /// Build one retrying gateway per endpoint, all reporting to `usage_sink`.
    pub fn build_gateways<U>(&self, usage_sink: Arc<U>) -> Result<Gateways, ProviderError>
    where
        U: UsageSink + 'static,
    {
        let make = |ep: &Endpoint| -> Result<Arc<dyn ChatGateway>, ProviderError> {
            let adapter = ChatCompletionsAdapter::with_config(
                &ep.api_url,
                &ep.api_token,
                self.request_timeout,
                &self.openrouter,
            )?;
            Ok(Arc::new(ProviderGateway::with_config(
                adapter,
                usage_sink.clone(),
                self.gateway.clone(),
            )))
        };
        Ok(Gateways {
            worker: make(&self.worker)?,
            accuracy_judge: make(&self.accuracy_judge.endpoint)?,
            integrity_judge: make(&self.integrity_judge.endpoint)?,
        })
    }
}

fn endpoint(section: &str, api_url: String, api_token: String) -> Result<Endpoint, ConfigError> {
    let api_url = api_url.trim().to_string();
    if api_url.is_empty() {
        return Err(ConfigError::invalid(format!("{section}.api_url must be non-empty")));
    }
    let lowered = api_token.to_lowercase();
    if PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m)) {
        tracing::warn!(section, "api_token looks like a placeholder; update the settings file");
    }
    Ok(Endpoint { api_url, api_token })
}

fn judge(section: &str, raw: RawJudge) -> Result<JudgeConfig, ConfigError> {
    let endpoint = endpoint(section, raw.api_url, raw.api_token)?;
    let model_id = raw.model_id.trim().to_string();
    if model_id.is_empty() {
        return Err(ConfigError::invalid(format!("{section}.model_id must be non-empty")));
    }
    Ok(JudgeConfig { endpoint, model_id })
}

fn non_empty_ids(ids: Vec<String>) -> Result<Vec<String>, ConfigError> {
    if ids.is_empty() {
        return Err(ConfigError::invalid("worker.model_ids must not be empty"));
    }
    ids.into_iter()
        .map(|id| {
            let id = id.trim().to_string();
            if id.is_empty() {
                Err(ConfigError::invalid("worker.model_ids entries must be non-empty"))
            } else {
                Ok(id)
            }
        })
        .collect()
}

fn scoring(raw: RawScoring) -> Result<ScoringConfig, ConfigError> {
    if !(0.0..=1.0).contains(&raw.p_irrelevant) {
        return Err(ConfigError::invalid("scoring.p_irrelevant must be in [0, 1]"));
    }
    if raw.max_length_ratio.is_nan() {
        return Err(ConfigError::invalid("scoring.max_length_ratio must be a number"));
    }
    let severe_keywords = raw
        .severe_keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    Ok(ScoringConfig {
        token_budget: raw.token_budget,
        p_irrelevant: raw.p_irrelevant,
        severe_keywords,
        max_length_ratio: raw.max_length_ratio,
        weights: raw.weights.normalized()?,
    })
}

fn seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::invalid(format!("{field} must be a non-negative number")))
}
