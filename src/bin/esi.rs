#![forbid(unsafe_code)]

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use esi_harness::config::{self, DEFAULT_CONFIG_PATH};
use esi_harness::gateway::TracingUsageSink;
use esi_harness::runner::{self, Evaluator, RunFilter, RunPlan};
use esi_harness::{cleaner, DatasetTier, PromptVersion};

#[derive(Parser)]
#[command(name = "esi", version, about = "ESI evaluation harness CLI")]
struct Cli {
    /// Settings file
    #[arg(long, env = "ESI_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured (dataset, model, prompt version) combination
    Run {
        /// Only run these datasets (repeatable)
        #[arg(long = "dataset")]
        datasets: Vec<String>,
        /// Only run these worker models (repeatable)
        #[arg(long = "model")]
        models: Vec<String>,
        /// Only run these prompt versions (repeatable)
        #[arg(long = "prompt-version")]
        prompt_versions: Vec<PromptVersion>,
    },
    /// Validate the settings file and print the combination matrix
    CheckConfig,
    /// Apply the answer cleaner to text from --text or stdin
    Clean {
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value = "DIRECT")]
        prompt_version: PromptVersion,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            datasets,
            models,
            prompt_versions,
        } => {
            let config = config::load(&cli.config)?;
            let plan = RunPlan::new(
                &config,
                &RunFilter {
                    datasets,
                    models,
                    prompt_versions,
                },
            )?;
            let gateways = config.build_gateways(Arc::new(TracingUsageSink))?;
            let evaluator = Evaluator::from_config(&config, &gateways);

            println!(
                "Running {} combination(s): {} dataset(s) x {} model(s) x {} prompt version(s)",
                plan.combination_count(),
                plan.datasets.len(),
                plan.models.len(),
                plan.versions.len()
            );
            let report = runner::run_all(&evaluator, &config.output, &plan).await;
            for summary in &report.summaries {
                summary.print_report();
            }
            if !report.skipped_datasets.is_empty() {
                println!();
                println!("Skipped datasets: {}", report.skipped_datasets.join(", "));
            }
            let secs = report.elapsed.as_secs();
            println!();
            println!(
                "Finished {} combination(s) in {:.2}s ({:02}:{:02}:{:02})",
                report.summaries.len(),
                report.elapsed.as_secs_f64(),
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60
            );
        }
        Commands::CheckConfig => {
            let config = config::load(&cli.config)?;
            let plan = RunPlan::new(&config, &RunFilter::default())?;
            println!("config ok: {}", cli.config.display());
            println!(
                "worker endpoint: {} ({} model(s))",
                config.worker.api_url,
                config.worker_model_ids.len()
            );
            println!(
                "accuracy judge: {} @ {}",
                config.accuracy_judge.model_id, config.accuracy_judge.endpoint.api_url
            );
            println!(
                "integrity judge: {} @ {}",
                config.integrity_judge.model_id, config.integrity_judge.endpoint.api_url
            );
            println!("max concurrent items: {}", config.max_concurrent_items);
            println!("combinations: {}", plan.combination_count());
            for dataset in &plan.datasets {
                let tier = DatasetTier::from_dataset_name(&dataset.short_name);
                for combination in plan.combinations(dataset) {
                    println!(
                        "  {} [{:?}] | {} | {}",
                        combination.dataset_short_name,
                        tier,
                        combination.worker_model_id,
                        combination.version
                    );
                }
            }
        }
        Commands::Clean {
            text,
            prompt_version,
        } => {
            let raw = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let cleaned = cleaner::clean(&raw, prompt_version);
            println!("{}", cleaned.text);
            if !cleaned.correctly_formatted {
                eprintln!("note: no 'Final Answer:' marker found");
            }
        }
    }

    Ok(())
}
