use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

use tls_checker_rs::config::{self, ScanConfig};
use tls_checker_rs::coordinator::ScanCoordinator;
use tls_checker_rs::probe::TlsProbe;
use tls_checker_rs::server;
use tls_checker_rs::store::JsonFileStore;
use tls_checker_rs::types::ScanSummary;

/// Find outbound HTTP(S) hosts in a PHP codebase and check them for TLS 1.2/1.3 support.
#[derive(Debug, Parser)]
#[command(name = "tls-checker-rs", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Comma-separated list of directories to scan instead of the configured ones.
    #[arg(long, global = true)]
    directory: Option<String>,

    /// JSON file holding scan results.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Hosts probed concurrently per batch.
    #[arg(long = "batch-size", global = true)]
    batch_size: Option<usize>,

    /// Per-host probe timeout in seconds.
    #[arg(long = "timeout-secs", global = true)]
    timeout_secs: Option<u64>,

    /// Re-probe hosts that already passed.
    #[arg(long = "no-sticky-passing", global = true, default_value_t = false)]
    no_sticky_passing: bool,

    /// Skip the TLS probe for hosts that do not answer an HTTPS GET below 400.
    #[arg(long = "reachability-precheck", global = true, default_value_t = false)]
    reachability_precheck: bool,

    /// PEM certificate to trust in addition to the system roots.
    #[arg(long = "ca-file", global = true)]
    ca_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List URLs a scan would probe.
    Urls,
    /// Extract URLs, probe every pending host in batches, and store the results.
    Scan {
        /// Continue hosts still marked pending instead of extracting again.
        #[arg(long, default_value_t = false)]
        resume: bool,
        /// Write the final summary as pretty JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print stored results.
    Results,
    /// Delete all stored results.
    Reset,
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

fn build_config(cli: &Cli) -> Result<ScanConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => config::load_config(path)?,
        None => ScanConfig::default(),
    };
    if let Some(dirs) = cli.directory.as_deref() {
        config.set_roots_from_list(dirs);
    }
    if let Some(path) = &cli.store {
        config.store_path = path.clone();
    }
    if let Some(n) = cli.batch_size {
        config.batch_size = n;
    }
    if let Some(secs) = cli.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    if cli.no_sticky_passing {
        config.sticky_passing = false;
    }
    if cli.reachability_precheck {
        config.reachability_precheck = true;
    }
    if let Some(path) = &cli.ca_file {
        config.ca_file = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let store = JsonFileStore::open(&config.store_path)
        .with_context(|| format!("failed to open result store {}", config.store_path.display()))?;
    let prober = TlsProbe::from_config(&config).context("failed to build TLS prober")?;
    let span = info_span!("tls_checker", store = %config.store_path.display());
    let coordinator = Arc::new(
        ScanCoordinator::new(Arc::new(store), Arc::new(prober), config.clone()).with_span(span),
    );

    match cli.command {
        Command::Urls => {
            let found = coordinator.discover_urls().await?;
            if found.urls_to_scan.is_empty() {
                println!("No URLs found in specified directories.");
            }
            for url in &found.urls_to_scan {
                println!("{url}");
            }
        }
        Command::Scan { resume, output } => {
            run_scan(&coordinator, resume).await?;
            let summary = coordinator.get_results().await?;
            print_summary(&summary);
            if let Some(path) = output.as_deref() {
                write_summary_json(path, &summary)
                    .with_context(|| format!("failed to write JSON to {}", path.display()))?;
                println!("Wrote JSON results to {}", path.display());
            }
        }
        Command::Results => {
            let summary = coordinator.get_results().await?;
            if !summary.has_data {
                println!("No scan data found.");
            } else {
                print_summary(&summary);
            }
        }
        Command::Reset => {
            coordinator.reset().await?;
            println!("TLS scan data reset.");
        }
        Command::Serve { bind } => {
            let shutdown = CancellationToken::new();
            let on_ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                on_ctrl_c.cancel();
            });
            server::spawn_server(&bind, coordinator, shutdown).await?;
        }
    }

    Ok(())
}

async fn run_scan(coordinator: &ScanCoordinator, resume: bool) -> Result<()> {
    let total = if resume {
        coordinator.resume_scan().await?
    } else {
        coordinator.start_scan().await?
    };
    if total == 0 {
        println!("No new hosts to scan.");
        return Ok(());
    }
    println!("Found {total} hosts to scan.");

    let batch_size = coordinator.config().batch_size;
    let mut offset = 0usize;
    loop {
        let report = coordinator.process_batch(batch_size, offset).await?;
        println!(
            "  {}/{} scanned ({} passing, {} failing)",
            report.processed, total, report.passing, report.failing
        );
        if report.remaining == 0 {
            break;
        }
        offset += batch_size;
        if offset >= total {
            warn!(remaining = report.remaining, "pending hosts left after final batch");
            break;
        }
    }
    info!("scan complete");
    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    println!("Passing domains: {}", summary.passing);
    println!("Failing domains: {}", summary.failing);
    if !summary.failing_urls.is_empty() {
        println!("The following domains are not compatible with TLS 1.2 or 1.3:");
        for url in &summary.failing_urls {
            println!("- {url}");
        }
    }
}

fn write_summary_json(path: &std::path::Path, summary: &ScanSummary) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
