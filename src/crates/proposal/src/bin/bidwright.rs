//! bidwright command-line entry point
//!
//! Drives proposal generation, iteration and version inspection against the
//! configured providers and database. Results are printed as JSON on stdout;
//! logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm::ProviderRegistry;
use proposal::{
    human_summary, is_major_change, AppConfig, ContextBuilder, GenerationRequest, Generator,
    NoReferences, ProposalService, SqliteStore, TracingMetrics, VersionId,
    DEFAULT_MAJOR_CHANGE_THRESHOLD,
};
use result_cache::ResultCache;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// bidwright - multi-provider proposal generation
#[derive(Parser, Debug)]
#[command(name = "bidwright")]
#[command(version)]
#[command(about = "Generate, iterate on and compare sales proposals across LLM providers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "BIDWRIGHT_CONFIG", default_value = "bidwright.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new version with one or more providers
    Generate {
        /// Subject the proposal is for
        #[arg(short, long)]
        subject: i64,

        /// Requirements text
        #[arg(short, long, conflicts_with = "requirements_file")]
        requirements: Option<String>,

        /// Read requirements from a file
        #[arg(long, value_name = "PATH")]
        requirements_file: Option<PathBuf>,

        /// Provider id (repeat for fan-out)
        #[arg(short, long = "provider", required = true)]
        providers: Vec<String>,
    },

    /// Regenerate from an existing version with feedback
    Iterate {
        /// Version to iterate on
        #[arg(long)]
        parent: VersionId,

        /// Reviewer feedback
        #[arg(short, long)]
        feedback: String,

        /// Provider id (repeat for fan-out)
        #[arg(short, long = "provider", required = true)]
        providers: Vec<String>,
    },

    /// Summarize two or more versions side by side
    Compare {
        #[arg(value_name = "VERSION_ID", num_args = 2..)]
        versions: Vec<VersionId>,
    },

    /// Field-level diff between two versions
    Diff {
        old: VersionId,
        new: VersionId,

        /// Changed-field ratio that counts as a major change
        #[arg(long, default_value_t = DEFAULT_MAJOR_CHANGE_THRESHOLD)]
        threshold: f64,
    },

    /// Mark a completed version as selected
    Select { version: VersionId },

    /// List configured providers
    Providers {
        /// Probe each active provider
        #[arg(long)]
        ping: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = AppConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!(path = %path.display(), providers = config.providers.len(), "configuration loaded");
        Ok(config)
    } else {
        warn!(path = %path.display(), "configuration file not found, using defaults");
        Ok(AppConfig::default())
    }
}

async fn build_service(config: &AppConfig) -> Result<ProposalService> {
    let store = Arc::new(
        SqliteStore::connect(&config.database.url)
            .await
            .context("failed to open the version store")?,
    );
    let cache = Arc::new(ResultCache::connect(&config.cache).await);
    let registry = Arc::new(ProviderRegistry::from_configs(config.providers.clone()));

    let context = ContextBuilder::new(Arc::new(NoReferences))
        .with_cache(cache.clone())
        .with_limits(
            config.generation.max_references,
            config.generation.max_excerpt_chars,
        );
    let generator = Generator::new(context, Arc::new(TracingMetrics))
        .with_provider_store(store.clone())
        .with_settings(&config.generation);

    Ok(ProposalService::new(registry, store, Arc::new(generator), cache)
        .with_settings(&config.fanout))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli.config)?;
    let service = build_service(&config).await?;

    match cli.command {
        Command::Generate {
            subject,
            requirements,
            requirements_file,
            providers,
        } => {
            let requirements = match (requirements, requirements_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("either --requirements or --requirements-file is required"),
            };
            let records = service
                .fan_out_generate(GenerationRequest {
                    subject_id: subject,
                    requirements,
                    provider_ids: providers,
                    parent_version_id: None,
                    feedback: None,
                })
                .await?;
            print_json(&records)?;
        }
        Command::Iterate {
            parent,
            feedback,
            providers,
        } => {
            let records = service.iterate(parent, &feedback, providers).await?;
            print_json(&records)?;
        }
        Command::Compare { versions } => {
            print_json(&service.compare(&versions).await?)?;
        }
        Command::Diff { old, new, threshold } => {
            let diff = service.diff_versions(old, new).await?;
            print_json(&json!({
                "summary": human_summary(&diff),
                "major_change": is_major_change(&diff, threshold),
                "diff": diff,
            }))?;
        }
        Command::Select { version } => {
            print_json(&service.select_version(version).await?)?;
        }
        Command::Providers { ping } => {
            let registry = service.registry();
            let mut out = Vec::new();
            for provider in registry.configs() {
                let reachable = if ping && provider.is_active {
                    match registry.resolve(&provider.id) {
                        Ok(adapter) => Some(adapter.ping().await.unwrap_or(false)),
                        Err(e) => {
                            warn!(provider = %provider.id, error = %e, "provider unusable");
                            Some(false)
                        }
                    }
                } else {
                    None
                };
                out.push(json!({
                    "id": provider.id,
                    "display_name": provider.display_name,
                    "vendor": provider.vendor,
                    "model": provider.model,
                    "is_active": provider.is_active,
                    "reachable": reachable,
                }));
            }
            print_json(&out)?;
        }
    }

    Ok(())
}
