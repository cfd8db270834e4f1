//! `spark` command line client for the daily spark service.

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde_json::json;
use spark_rs::config::{SparkConfig, default_data_dir};
use spark_rs::core::{Delivery, FileSparkCache, SparkService};
use spark_rs::provider::OpenAiBackend;
use spark_rs::store::{Reaction, Spark, SqliteSparkStore};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Command-line options for the spark client.
#[derive(Parser)]
#[command(name = "spark", version)]
struct Cli {
    /// Optional path to a spark.json5 config file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print today's next spark, generating the batch if needed
    Today {
        #[arg(long)]
        user: String,
        /// Preferred topic (repeatable)
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,
        /// Free-form preference text passed to the generator
        #[arg(long, default_value = "")]
        preferences: String,
    },
    /// Record a reaction to a spark
    React {
        #[arg(long)]
        user: String,
        #[arg(long)]
        spark: Uuid,
        /// Batch position the spark was shown at
        #[arg(long)]
        index: u32,
        /// dislike, like, or love
        #[arg(long, value_parser = parse_reaction)]
        reaction: Reaction,
    },
    /// Show today's batch progress
    Status {
        #[arg(long)]
        user: String,
    },
}

fn parse_reaction(value: &str) -> Result<Reaction, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spark_rs::init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let service = build_service(config)?;

    match cli.command {
        Command::Today {
            user,
            topics,
            preferences,
        } => {
            let delivery = service
                .todays_delivery(&user, &topics, &preferences)
                .await
                .context("failed to fetch today's spark")?;
            match delivery {
                Delivery::Ready(spark) => print_spark(&spark)?,
                Delivery::AllConsumed => println!("All of today's sparks have been seen."),
                Delivery::NotYetAvailable => {
                    println!("Today's sparks are still being prepared; try again shortly.")
                }
            }
        }
        Command::React {
            user,
            spark,
            index,
            reaction,
        } => {
            let marked = service
                .mark_interacted(&user, spark, index, reaction)
                .await
                .context("failed to record reaction")?;
            println!("Recorded {reaction} ({:?}).", marked.outcome);
            if let Some(recommendation) = marked.recommendation {
                println!("A recommendation was added to today's sparks.");
                print_spark(&recommendation)?;
            }
        }
        Command::Status { user } => {
            let summary = service
                .todays_summary(&user)
                .await
                .context("failed to read today's sparks")?;
            let body = json!({
                "date": summary.date.to_string(),
                "batch_count": summary.batch_count,
                "recommendation_count": summary.recommendation_count,
                "complete": summary.complete,
                "unreacted": summary.unreacted.len(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SparkConfig> {
    if let Some(path) = path {
        info!("loading config from path: {}", path.display());
        return SparkConfig::load_from_path(path).context("failed to load config");
    }
    let cwd = std::env::current_dir().context("cwd")?;
    let layered = SparkConfig::load_layered(&cwd).context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    Ok(layered.config)
}

fn build_service(config: SparkConfig) -> anyhow::Result<SparkService> {
    let data_dir = default_data_dir();
    let store_path = match (&config.store.path, &data_dir) {
        (Some(path), _) => PathBuf::from(path),
        (None, Some(dir)) => dir.join("spark.db"),
        (None, None) => return Err(anyhow!("no home directory; set store.path in config")),
    };
    let cache_path = match (&config.cache.path, &data_dir) {
        (Some(path), _) => PathBuf::from(path),
        (None, Some(dir)) => dir.join("cache"),
        (None, None) => return Err(anyhow!("no home directory; set cache.path in config")),
    };
    info!(
        "opening spark store (store={}, cache={})",
        store_path.display(),
        cache_path.display()
    );

    let store = Arc::new(SqliteSparkStore::open(store_path).context("failed to open store")?);
    let backend = Arc::new(
        OpenAiBackend::from_env(&config.provider).context("failed to build provider")?,
    );
    SparkService::builder(config)
        .store(store)
        .completion_backend(backend.clone())
        .embedding_backend(backend)
        .cache(Arc::new(FileSparkCache::new(cache_path)))
        .build()
        .context("failed to build spark service")
}

fn print_spark(spark: &Spark) -> anyhow::Result<()> {
    let body = json!({
        "id": spark.id,
        "index": spark.batch_index,
        "topic": spark.topic,
        "content": spark.content,
        "details": spark.details,
        "recommendation": spark.is_recommendation,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
