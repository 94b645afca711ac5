//! Catalog-Harvest main entry point
//!
//! This is the command-line interface for the catalog harvester and its
//! standalone extraction endpoint.

use anyhow::Context;
use catalog_harvest::config::{load_config_with_hash, Config};
use catalog_harvest::endpoint::{serve, ExtractionEndpoint};
use catalog_harvest::output::{load_statistics, print_report, print_statistics, JsonOutputStore};
use catalog_harvest::Harvester;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Catalog-Harvest: a paginated product catalog harvester
///
/// Walks the catalog's listing pages, fetches every product page under a
/// bounded worker budget, extracts and de-duplicates records, and writes
/// them to a JSON output store.
#[derive(Parser, Debug)]
#[command(name = "catalog-harvest")]
#[command(version)]
#[command(about = "A paginated product catalog harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "serve"])]
    dry_run: bool,

    /// Show statistics about the output store and ledger and exit
    #[arg(long, conflicts_with_all = ["dry_run", "serve"])]
    stats: bool,

    /// Run the extraction endpoint as a standalone HTTP service
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    serve: bool,

    /// Listen address for --serve (overrides extraction.bind-addr)
    #[arg(long, env = "HARVEST_BIND_ADDR", requires = "serve")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.serve {
        handle_serve(&config, cli.bind.as_deref()).await?;
    } else {
        handle_harvest(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_harvest=info,warn"),
            1 => EnvFilter::new("catalog_harvest=debug,info"),
            2 => EnvFilter::new("catalog_harvest=trace,debug"),
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

/// Handles the --dry-run mode: shows the resolved configuration
fn handle_dry_run(config: &Config) {
    println!("=== Catalog-Harvest Dry Run ===\n");

    println!("Catalog:");
    println!("  Root URL: {}", config.catalog.root_url);
    match config.catalog.max_listing_pages {
        0 => println!("  Max listing pages: unlimited"),
        n => println!("  Max listing pages: {}", n),
    }
    println!(
        "  Max consecutive listing failures: {}",
        config.catalog.max_consecutive_listing_failures
    );

    println!("\nCrawler Configuration:");
    println!(
        "  Max concurrent fetches: {}",
        config.crawler.max_concurrent_fetches
    );
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Backoff: {}ms base, {}ms cap",
        config.crawler.base_delay_ms, config.crawler.max_delay_ms
    );
    println!("  Request timeout: {}ms", config.crawler.request_timeout_ms);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nExtraction:");
    match &config.extraction.endpoint_url {
        Some(url) => println!("  Endpoint: {}", url),
        None => println!("  Endpoint: in-process"),
    }
    println!("  Ledger: {}", config.extraction.ledger_path.display());
    println!("  Call timeout: {}ms", config.extraction.call_timeout_ms);
    println!("  Max attempts: {}", config.extraction.max_attempts);
    println!("  Max document size: {} bytes", config.extraction.max_document_bytes);

    println!("\nOutput:");
    println!("  Records: {}", config.output.records_path.display());
    if let Some(path) = &config.output.report_path {
        println!("  Report: {}", path.display());
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics about the output store
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Output store: {}", config.output.records_path.display());
    println!("Ledger: {}\n", config.extraction.ledger_path.display());

    let store = JsonOutputStore::new(&config.output.records_path);
    let stats = load_statistics(&store, &config.extraction.ledger_path)?;

    print_statistics(&stats);

    Ok(())
}

/// Handles the --serve mode: runs the extraction endpoint until Ctrl-C
async fn handle_serve(config: &Config, bind: Option<&str>) -> anyhow::Result<()> {
    let bind = bind.unwrap_or(config.extraction.bind_addr.as_str());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", bind))?;

    // The ledger is fully loaded before the listener accepts anything
    let endpoint = ExtractionEndpoint::from_config(&config.extraction)?;

    let store = JsonOutputStore::new(&config.output.records_path);
    let existing = store.load()?;
    let added = endpoint.reconcile(existing.iter().map(|r| r.upc.as_str()), "output-store")?;
    if added > 0 {
        tracing::info!(added, "ledger reconciled from output store");
    }

    serve(Arc::new(endpoint), addr, shutdown_signal()).await?;
    tracing::info!("Extraction endpoint stopped");
    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: String) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let harvester = Harvester::from_config(config)?.config_hash(config_hash);
    let result = harvester.run(cancel).await;
    watcher.abort();

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl-C, shutting down");
}
