/*
briefly - single-binary main.rs
Runs the HTTP control plane, or one selection / broadcast run from the command line.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::init_db_pool;

use briefly::broadcast::{self, BroadcastOutcome};
use briefly::selection;
use briefly::server::launch_rocket;
use briefly::storage;

#[derive(Parser, Debug)]
#[command(name = "briefly", about = "Briefly news selection and broadcast generator")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP control plane
    Serve,

    /// Find, rank and store articles for the given topics
    FindArticles {
        /// Topics to search for (config defaults when empty)
        topics: Vec<String>,

        /// API key (defaults to the configured environment variable)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Generate Broadcast.wav from stored articles
    Broadcast {
        /// Duration of the broadcast script in minutes
        #[arg(
            long,
            default_value_t = 5,
            value_parser = clap::value_parser!(u32).range(0..=broadcast::MAX_DURATION_MINUTES as i64)
        )]
        duration: u32,

        /// API key (defaults to the configured environment variable)
        #[arg(long)]
        api_key: Option<String>,

        /// URLs of stored articles to include
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config).await?;

    let db_path = config.database_path();
    let db_pool = match init_db_pool(&db_path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %db_path, "failed to initialize database pool");
            return Err(e);
        }
    };
    storage::ensure_schema(&db_pool).await?;
    info!(db_path = %db_path, "database ready");

    match args.command {
        Command::Serve => {
            info!("Launching Rocket HTTP server");
            launch_rocket(db_pool, Arc::new(config)).await?;
            info!("Shutdown complete");
        }
        Command::FindArticles { topics, api_key } => {
            let api_key = resolve_api_key(&config, api_key)?;
            let topics = if topics.is_empty() { config.default_topics() } else { topics };

            let report = selection::find_articles(&db_pool, &config, &api_key, &topics).await?;
            info!(
                articles = report.articles.len(),
                empty = ?report.empty_topics,
                failed = ?report.failed_topics,
                "article selection finished"
            );
        }
        Command::Broadcast { duration, api_key, urls } => {
            if urls.is_empty() {
                anyhow::bail!("No URLs provided. Usage: briefly broadcast [--duration N] <url1> <url2> ...");
            }
            let api_key = resolve_api_key(&config, api_key)?;

            match broadcast::generate_broadcast(&db_pool, &config, &api_key, &urls, duration).await? {
                BroadcastOutcome::Produced(audio) => info!(
                    bytes = audio.pcm.len(),
                    parts = audio.parts.len(),
                    "broadcast generation completed"
                ),
                BroadcastOutcome::NoMatchingArticles => {
                    warn!("no stored articles match the provided URLs; nothing generated")
                }
            }
        }
    }

    Ok(())
}

/// `config.default.toml` overlaid with `--config FILE` (or `config.toml` when present).
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    .context("failed to load configuration")?;
    info!(default = ?default_path, override_file = ?override_path, "configuration loaded");
    Ok(config)
}

fn resolve_api_key(config: &Config, from_cli: Option<String>) -> Result<String> {
    from_cli
        .filter(|k| !k.trim().is_empty())
        .or_else(|| config.api_key_from_env())
        .context("no API key: pass --api-key or set the configured environment variable")
}
