mod commands;
mod config;
mod manifests;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use helm_aware::{CachedResolver, ChartIdentity, VersionCache, VersionLookup, VersionResolver};
use helm_aware_repo::{HelmCliSearch, HttpIndexClient};
use helm_aware_store::SqliteRecordStore;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "helm-aware", version)]
#[command(about = "Find Helm charts in ArgoCD manifests and check for newer versions")]
struct Cli {
    /// Config file (defaults to ~/.config/helm-aware/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan ArgoCD manifests and report chart versions
    Scan {
        /// Manifest files (`-` reads stdin)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Ignore cached versions and resolve from the repositories
        #[arg(long)]
        refresh: bool,
    },
    /// List the available versions of one chart
    Versions {
        /// Chart repository URL (https:// or oci://)
        #[arg(long)]
        repo_url: String,
        /// Chart name
        #[arg(long)]
        chart: String,
        /// Print JSON instead of one version per line
        #[arg(long)]
        json: bool,
        /// Ignore cached versions and resolve from the repository
        #[arg(long)]
        refresh: bool,
    },
    /// Resolve a JSON array of chart requests and print JSON results
    Batch {
        /// Request file (defaults to stdin)
        file: Option<PathBuf>,
    },
    /// Inspect or clear the version cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cache location and contents summary
    Info,
    /// Delete every cached chart
    Clear,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_resolver(config: &AppConfig) -> VersionResolver {
    let resolver = &config.resolver;
    let index = HttpIndexClient::new(&resolver.user_agent, resolver.http_timeout());
    let registry = HelmCliSearch::new(&resolver.helm_binary, resolver.oci_timeout());
    VersionResolver::new(Arc::new(index), Arc::new(registry))
}

/// Open the configured cache database, returning its location too.
fn open_cache(config: &AppConfig) -> Result<(VersionCache, PathBuf)> {
    let path = config
        .cache
        .resolved_path()
        .context("could not determine cache directory")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory: {}", parent.display()))?;
    }

    let store = SqliteRecordStore::open(&path).map_err(|e| anyhow::anyhow!("{e}"))?;
    let cache = VersionCache::new(Arc::new(store))
        .with_record_id(&config.cache.record)
        .with_max_attempts(config.cache.max_attempts);
    debug!(path = %path.display(), record = %config.cache.record, "opened version cache");
    Ok((cache, path))
}

/// The lookup used by resolving commands: cache-aware when the cache is
/// enabled and opens, remote-only otherwise.
fn build_lookup(config: &AppConfig, refresh: bool) -> Arc<dyn VersionLookup> {
    let remote: Arc<dyn VersionLookup> = Arc::new(build_resolver(config));

    if !config.cache.enabled {
        return remote;
    }

    match open_cache(config) {
        Ok((cache, _)) => {
            let cached = CachedResolver::new(remote, cache).with_force_refresh(refresh);
            Arc::new(cached) as Arc<dyn VersionLookup>
        }
        Err(e) => {
            eprintln!("warning: cache unavailable, resolving without it: {e:#}");
            remote
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = config::load_config(cli.config.as_deref());

    match cli.command {
        Command::Scan {
            paths,
            json,
            refresh,
        } => {
            let documents = manifests::load(&paths)?;
            let lookup = build_lookup(&config, refresh);
            commands::scan::run(lookup, &documents, &config.batch.options(), json).await
        }
        Command::Versions {
            repo_url,
            chart,
            json,
            refresh,
        } => {
            let identity = ChartIdentity::new(repo_url, chart, "");
            let lookup = build_lookup(&config, refresh);
            commands::versions::run(lookup.as_ref(), &identity, json).await
        }
        Command::Batch { file } => {
            let input = commands::read_input(file.as_deref())?;
            let lookup = build_lookup(&config, false);
            commands::batch::run(lookup, &input, &config.batch.options()).await
        }
        Command::Cache { action } => {
            if !config.cache.enabled {
                eprintln!("warning: cache is disabled in config");
            }
            let (cache, path) = open_cache(&config)?;
            match action {
                CacheCommand::Info => commands::cache::info(&cache, &path).await,
                CacheCommand::Clear => commands::cache::clear(&cache).await,
            }
        }
    }
}
