//! Cache invalidator CLI - inspect and maintain a proxy response cache
//!
//! Reads the same environment configuration as the proxy. `index`, `stats`
//! and `get` only read the cache directory and are safe against a live
//! cache. `compact` opens the cache read-write: it restores, prunes and
//! rewrites the index, so run it only while no proxy is using the directory.

use cache_invalidator::{
    CacheInvalidator, Codec, InvalidatorConfig, InvalidatorError, JsonCodec, Result,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cache-invalidator", version, about = "Inspect and maintain a proxy response cache")]
struct Cli {
    /// Cache directory (overrides CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the persisted index (read-only)
    Index,
    /// Print a summary of the persisted index as JSON (read-only)
    Stats,
    /// Print the stored object for a key as JSON (read-only)
    Get { key: String },
    /// Drop stale index records and orphaned files, then rewrite the index.
    /// Modifies the cache; do not run against a directory in use
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("cache_invalidator=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let cli = Cli::parse();

    let mut config = InvalidatorConfig::from_env();
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    info!("Cache dir: {:?}", config.cache_dir);

    match cli.command {
        Command::Index => {
            let path = config.cache_dir.join(cache_invalidator::INDEX_FILE);
            let (entries, metadata) = cache_invalidator::read_index(&path).await?;
            println!(
                "version {} written {} checksum {}",
                metadata.version,
                metadata
                    .written_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
                metadata.checksum
            );
            for entry in entries {
                println!("{}\t{}", entry.size, entry.key);
            }
        }
        Command::Stats => {
            let summary = cache_invalidator::summarize(&config.cache_dir).await?;
            println!("{}", to_pretty_json(&summary)?);
        }
        Command::Get { key } => {
            let bytes = cache_invalidator::read_payload(&config.cache_dir, &key).await?;
            let value: serde_json::Value = JsonCodec.decode(&bytes)?;
            println!("{}", to_pretty_json(&value)?);
        }
        Command::Compact => {
            let invalidator = CacheInvalidator::open(config).await?;
            invalidator.flush().await;
            let entries = invalidator.index_entries().await.len();
            invalidator.close().await;
            info!(entries, "Index compacted");
        }
    }

    Ok(())
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| InvalidatorError::Serialization(e.to_string()))
}
