//! govbrief command line.
//!
//! Usage:
//!   govbrief refresh <network> <ref>
//!   govbrief show <network> <ref>
//!   govbrief analyze <network> <ref>
//!   govbrief check-url <url>
//!   govbrief invalidate <network> <ref>
//!
//! Results go to stdout as pretty JSON, logs go to stderr.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use govbrief::Services;
use govbrief::cache::CacheKey;
use govbrief::config::{Config, DEFAULT_LOG_FILTER, RuntimeConfig};
use govbrief::error::GovbriefError;
use govbrief::notify::LogNotifier;

const EXIT_TIMEOUT: u8 = 2;

#[derive(Parser)]
#[command(name = "govbrief")]
#[command(
    about = "Cache governance proposals with their attachments and analyse them",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProposalArgs {
    /// Network name, e.g. polkadot
    network: String,
    /// Referendum or post id
    ref_id: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the cache entry for a proposal
    Refresh(ProposalArgs),
    /// Print cached metadata without refreshing
    Show(ProposalArgs),
    /// Run the analysis batch over the cached proposal
    Analyze(ProposalArgs),
    /// Report whether a URL passes the fetch safety check
    CheckUrl {
        url: String,
    },
    /// Delete the cache entry for a proposal
    Invalidate(ProposalArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // installed before config loading so its warnings are not lost
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&RuntimeConfig::load_from_env().log_level))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Cache root: {}", config.cache.root.display());
    let services = Services::from_config(&config, Arc::new(LogNotifier))?;

    match run(cli.command, &services).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(Failure::TimedOut(partial)) => {
            println!("{}", serde_json::to_string_pretty(&partial)?);
            Ok(ExitCode::from(EXIT_TIMEOUT))
        }
        Err(Failure::Error(e)) => {
            error!("{}", e);
            println!("{}", serde_json::to_string_pretty(&json!({ "error": e.to_report() }))?);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Filter from `level`, falling back to the default when it does not parse
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("Ignoring log filter '{}': {}", level, e);
        EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

enum Failure {
    /// Partial analysis output
    TimedOut(serde_json::Value),
    Error(GovbriefError),
}

impl From<GovbriefError> for Failure {
    fn from(err: GovbriefError) -> Self {
        Failure::Error(err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Failure::Error(err.into())
    }
}

async fn run(
    command: Commands,
    services: &Services,
) -> std::result::Result<serde_json::Value, Failure> {
    match command {
        Commands::Refresh(p) => {
            let entry = services.cache.refresh(&p.network, &p.ref_id).await?;
            Ok(serde_json::to_value(&entry)?)
        }
        Commands::Show(p) => match services.cache.load_entry(&p.network, &p.ref_id).await? {
            Some(entry) => Ok(serde_json::to_value(&entry)?),
            None => {
                let key = CacheKey::new(&p.network, &p.ref_id);
                Err(GovbriefError::CacheAbsent {
                    network: key.network,
                    ref_id: key.ref_id,
                }
                .into())
            }
        },
        Commands::Analyze(p) => {
            let content = services
                .cache
                .get_proposal_content(&p.network, &p.ref_id)
                .await?;
            match services
                .orchestrator
                .run(&content.entry.key, &content.text)
                .await
            {
                Ok(bundle) => Ok(serde_json::to_value(&bundle)?),
                Err(timed_out) => {
                    let bundle = serde_json::to_value(&timed_out.bundle)?;
                    let err: GovbriefError = timed_out.into();
                    error!("{}", err);
                    Err(Failure::TimedOut(json!({
                        "error": err.to_report(),
                        "partial": bundle,
                    })))
                }
            }
        }
        Commands::CheckUrl { url } => match services.fetcher.check(&url).await {
            Ok(vetted) => Ok(json!({
                "url": vetted.url.as_str(),
                "safe": true,
                "addresses": vetted.addrs.iter().map(|a| a.ip().to_string()).collect::<Vec<_>>(),
            })),
            Err(e) => Ok(json!({ "url": url, "safe": false, "reason": e.to_string() })),
        },
        Commands::Invalidate(p) => {
            let removed = services.cache.invalidate(&p.network, &p.ref_id).await?;
            let key = CacheKey::new(&p.network, &p.ref_id);
            Ok(json!({ "key": key.to_string(), "removed": removed }))
        }
    }
}
