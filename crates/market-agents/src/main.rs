use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coordination::{MarketContext, ModelId, ModelRegistry, QueryClassifier, WeightingStrategy};
use market_agents::{EnsembleConfig, EnsembleEngine, EnsembleOptions};
use tracing::info;

/// Multi-model crypto market analysis
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one ensemble request and print the response as JSON
    Ask {
        /// The question to analyze
        query: String,

        /// JSON file with market context (topCoin, coins, news, social)
        #[arg(long)]
        context: Option<PathBuf>,

        /// Weighting strategy: confidence, equal, performance, adaptive, fastResponse, highAccuracy
        #[arg(long)]
        strategy: Option<WeightingStrategy>,

        /// Models to leave out, comma separated (e.g. newsRoberta,technicalAnalyzer)
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,

        /// Let the registry pick models and strategy from the query
        #[arg(long, default_value_t = false, conflicts_with_all = ["strategy", "skip"])]
        optimize: bool,

        /// Print only the final answer instead of the full JSON response
        #[arg(long, default_value_t = false)]
        text: bool,
    },

    /// Print the static model table
    Models,

    /// Show which models and strategy a query would use, without calling any backend
    Plan {
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Ask {
            query,
            context,
            strategy,
            skip,
            optimize,
            text,
        } => {
            let context = load_context(context.as_ref())?;
            let config = EnsembleConfig::from_env();
            info!(
                gemini_model = ?config.gemini_model,
                hf_url = %config.hf_inference_url,
                "Market ensemble starting"
            );
            let engine = EnsembleEngine::new(config)?;

            let response = if optimize {
                engine.generate_optimized_response(&query, &context).await?
            } else {
                let options = build_options(strategy, &skip)?;
                engine
                    .generate_ensemble_response(&query, &context, &options)
                    .await?
            };

            if text {
                println!("{}", response.final_response);
            } else {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
        Command::Models => {
            let registry = ModelRegistry::global();
            println!("{}", serde_json::to_string_pretty(registry.configs())?);
        }
        Command::Plan { query } => {
            let analysis = QueryClassifier::new().analyze(&query);
            let plan = ModelRegistry::global().get_optimal_configuration(&analysis);
            let out = serde_json::json!({
                "analysis": analysis,
                "plan": plan,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

fn load_context(path: Option<&PathBuf>) -> Result<MarketContext> {
    let Some(path) = path else {
        return Ok(MarketContext::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read context file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse context file {}", path.display()))
}

fn build_options(strategy: Option<WeightingStrategy>, skip: &[String]) -> Result<EnsembleOptions> {
    let mut models: Vec<ModelId> = ModelId::all().to_vec();
    for name in skip {
        let Some(model) = ModelId::parse(name.trim()) else {
            bail!("Unknown model '{name}'");
        };
        models.retain(|m| *m != model);
    }
    Ok(EnsembleOptions::for_models(
        &models,
        strategy.unwrap_or_default(),
    ))
}
