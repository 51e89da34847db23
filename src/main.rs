// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use anyhow::Result;
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tvlink::store::FileStore;
use tvlink::{Config, StreamResolver};

fn cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser)]
#[command(name = "tvlink")]
#[command(about = "Resolve and cache playable live-TV stream URLs")]
#[command(version)]
#[command(styles = cargo_style())]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a playable URL for a channel (cache-first)
    Resolve { channel_id: String },

    /// Resolve a channel via the secondary catalog route
    Catalog { channel_id: String },

    /// Initialize an upstream session for a channel
    Session {
        channel_id: String,
        /// Print the full upstream payload as JSON
        #[arg(long)]
        json: bool,
    },

    /// Warm the cache and sessions for a list of channels
    Preload {
        /// Channel ids, highest priority first
        #[arg(required = true)]
        channel_ids: Vec<String>,
    },

    /// Manage the URL cache
    #[command(subcommand)]
    Cache(CacheSubCommand),
}

#[derive(Subcommand)]
enum CacheSubCommand {
    /// Remove every cached URL, persisted entries included
    Clear,
    /// List currently valid cached entries
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into())
                    .add_directive("hyper_util=error".parse()?),
            )
            .init();
    } else if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive("hyper_util=error".parse()?),
            )
            .init();
    }

    // Load configuration
    let config_path = Config::default_path();
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        eprintln!(
            "No config found at {}, using defaults",
            config_path.display()
        );
        Config::default()
    };

    let store = Arc::new(FileStore::new()?);
    let resolver = StreamResolver::new(&config, store)?;

    // Warm start from the persisted cache before anything touches upstream.
    let loaded = resolver.load_from_persistent().await?;
    tracing::debug!("warm start with {} cached entries", loaded);

    match cli.command {
        Commands::Resolve { channel_id } => {
            let url = resolver.resolve_stream_url(&channel_id).await?;
            println!("{}", url);
        }

        Commands::Catalog { channel_id } => {
            let url = resolver.get_channels_stream(&channel_id).await?;
            println!("{}", url);
        }

        Commands::Session { channel_id, json } => {
            let result = resolver.initialize_session(&channel_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(url) = result.playable_url() {
                println!("{}", url);
            }
        }

        Commands::Preload { channel_ids } => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} [{elapsed_precise}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message(format!("Preloading {} channel(s)...", channel_ids.len()));
            pb.enable_steady_tick(Duration::from_millis(100));

            let report = resolver.preload(&channel_ids).await;

            pb.finish_and_clear();
            println!("Preload complete: {}", report);
        }

        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheSubCommand::Clear => {
                resolver.invalidate_all().await?;
                println!("Cache cleared");
            }
            CacheSubCommand::Show => {
                let entries = resolver.cache().snapshot();
                if entries.is_empty() {
                    println!("Cache is empty");
                } else {
                    let now = chrono::Utc::now().timestamp_millis() as u64;
                    for (channel_id, entry) in entries {
                        println!(
                            "{}\t{}\texpires in {}s",
                            channel_id,
                            entry.url,
                            entry.time_until_expiry(now).as_secs()
                        );
                    }
                }
            }
        },
    }

    Ok(())
}
