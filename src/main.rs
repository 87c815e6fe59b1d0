//! Tierfetch main entry point
//!
//! This is the command-line interface for the Tierfetch page fetcher.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tierfetch::config::{load_config_with_hash, Config};
use tierfetch::TransportStepExecutor;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

/// Tierfetch: budget-aware, escalating page fetcher
///
/// Tierfetch fetches each URL through its domain's transport sequence,
/// escalating from direct requests to proxies and solvers as sites push back,
/// while daily byte budgets and residential burst limits cap bandwidth.
#[derive(Parser, Debug)]
#[command(name = "tierfetch")]
#[command(version = "1.0.0")]
#[command(about = "Budget-aware, escalating page fetcher", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// URLs to fetch
    #[arg(value_name = "URL", required_unless_present = "dry_run")]
    urls: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the transport plan without fetching
    #[arg(long, conflicts_with = "snapshot")]
    dry_run: bool,

    /// Print the budget snapshot as JSON after fetching
    #[arg(long)]
    snapshot: bool,

    /// Write each fetched page into this directory
    #[arg(long, value_name = "DIR")]
    save_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, &cli.urls);
        return Ok(());
    }

    handle_fetch(config, cli.urls, cli.save_dir, cli.snapshot).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tierfetch=info,warn"),
            1 => EnvFilter::new("tierfetch=debug,info"),
            2 => EnvFilter::new("tierfetch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows budgets and each URL's transport plan
fn handle_dry_run(config: &Config, urls: &[String]) {
    println!("=== Tierfetch Dry Run ===\n");

    println!("Budgets:");
    println!(
        "  Global: soft {} MB, hard {} MB per day",
        config.budget.global_soft_mb_per_day, config.budget.global_hard_mb_per_day
    );
    println!(
        "  Residential: soft {} MB, hard {} MB per day",
        config.budget.residential_soft_mb_per_day, config.budget.residential_hard_mb_per_day
    );
    println!("  Throttle ratio: {}", config.budget.throttle_ratio);

    println!("\nTransport:");
    println!("  Default sequence: {}", plan(&config.transport.default_sequence));
    println!(
        "  Timeouts: connect {}s, request {}s",
        config.transport.connect_timeout_secs, config.transport.request_timeout_secs
    );
    println!(
        "  Max concurrent fetches: {}",
        config.transport.max_concurrent_fetches
    );
    println!("  Datacenter proxies: {}", config.datacenter.proxies.len());
    println!(
        "  FlareSolverr: {}",
        if config.flaresolverr.enabled { "enabled" } else { "disabled" }
    );

    println!("\nResidential:");
    println!(
        "  Burst: {} requests, then {}s cooldown, {} requests per day",
        config.residential.max_consecutive_requests,
        config.residential.cooldown_after_burst_sec,
        config.residential.daily_burst_allowance
    );
    println!(
        "  Egress: {}",
        match (&config.residential.endpoint, &config.residential.source_file) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(file)) => format!("credential file {}", file),
            (None, None) => "not configured".to_string(),
        }
    );

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        let sequence = if site.fetch_policy.sequence.is_empty() {
            &config.transport.default_sequence
        } else {
            &site.fetch_policy.sequence
        };
        println!(
            "  - {} [{}] residential {}",
            site.domain,
            plan(sequence),
            if site.allow_residential { "allowed" } else { "stripped" }
        );
    }

    if !urls.is_empty() {
        println!("\nURLs ({}):", urls.len());
        for url in urls {
            let domain = ::url::Url::parse(url)
                .ok()
                .and_then(|u| tierfetch::extract_domain(&u));
            match domain {
                Some(domain) => println!("  - {} ({})", url, domain),
                None => println!("  - {} (invalid, would be skipped)", url),
            }
        }
    }

    println!("\n✓ Configuration is valid");
}

fn plan(sequence: &[tierfetch::TransportStep]) -> String {
    sequence
        .iter()
        .map(|step| step.as_str())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Handles the main fetch operation
async fn handle_fetch(
    config: Config,
    urls: Vec<String>,
    save_dir: Option<PathBuf>,
    snapshot: bool,
) -> anyhow::Result<()> {
    let executor = Arc::new(
        TransportStepExecutor::from_config(config).context("Failed to build transport")?,
    );

    if let Some(dir) = &save_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    tracing::info!("Fetching {} URLs", urls.len());

    let mut tasks = JoinSet::new();
    for (index, url) in urls.into_iter().enumerate() {
        let executor = executor.clone();
        tasks.spawn(async move {
            let output = executor.fetch(&url).await;
            (index, url, output)
        });
    }

    let mut fetched = 0usize;
    let mut failed = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let (index, url, output) = joined.context("Fetch task panicked")?;

        match output {
            Some(output) => {
                fetched += 1;
                let meta = &output.metadata;
                println!(
                    "✓ {} [{} via {}] {} bytes in {:.2}s",
                    url,
                    meta.status_code,
                    meta.transport_step,
                    output.html.len(),
                    output.elapsed_seconds
                );
                if let Some(reason) = &meta.budget_reason {
                    println!("  budget: {}", reason);
                }

                if let Some(dir) = &save_dir {
                    let path = dir.join(format!("{:04}-{}.html", index, meta.domain));
                    tokio::fs::write(&path, output.html.as_bytes())
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                }
            }
            None => {
                failed += 1;
                println!("✗ {} (unavailable)", url);
            }
        }
    }

    tracing::info!(fetched, failed, "Fetching finished");

    if snapshot {
        let snapshot = executor.controller().snapshot(Utc::now());
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}
