//! CLI commands implementation.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog;
use crate::config::Settings;
use crate::discovery::{ArchiveSource, LiveIndexMonitor};
use crate::fetch::Fetcher;
use crate::pipeline::{Pipeline, PipelineConfig, PipelineEvent, RunSummary};
use crate::store::{D1Client, UpsertStore};

#[derive(Parser)]
#[command(name = "modelpulse")]
#[command(about = "Catalog popularity crawler - tracks run counts for model hosting sites")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a catalog and persist run counts
    Run {
        /// Catalog to crawl (see `catalogs`)
        catalog: String,
        /// Maximum simultaneous in-flight requests (defaults to the
        /// configured crawl ceiling)
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Limit number of items processed (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Skip archive fallback discovery
        #[arg(long)]
        no_fallback: bool,
        /// Record each item's oldest archive capture date
        #[arg(long)]
        archive_dates: bool,
    },

    /// List built-in catalogs
    Catalogs,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            catalog,
            concurrency,
            limit,
            no_fallback,
            archive_dates,
        } => cmd_run(&catalog, concurrency, limit, no_fallback, archive_dates).await,
        Commands::Catalogs => cmd_catalogs(),
    }
}

async fn cmd_run(
    catalog_id: &str,
    concurrency: Option<usize>,
    limit: usize,
    no_fallback: bool,
    archive_dates: bool,
) -> anyhow::Result<()> {
    let Some(catalog) = catalog::find(catalog_id) else {
        println!(
            "{} Unknown catalog '{}', try `modelpulse catalogs`",
            style("✗").red(),
            catalog_id
        );
        return Ok(());
    };

    let settings = Settings::from_env()?;

    let concurrency = concurrency.unwrap_or(settings.crawl.max_in_flight);
    let fetcher = Fetcher::with_limits(concurrency, settings.crawl.timeout);
    let executor = Arc::new(D1Client::new(
        settings.store.base_url.clone(),
        settings.store.token.clone(),
        settings.store.timeout,
    ));
    let store = UpsertStore::new(executor, catalog.table.clone(), settings.store_retry);
    let archive = ArchiveSource::new(fetcher.clone(), settings.archive.clone());

    let config = PipelineConfig {
        max_items: limit,
        use_fallback: !no_fallback,
        archive_window_days: settings.archive_window_days,
        archive_dates: archive_dates || settings.archive_dates,
        ..PipelineConfig::default()
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, draining in-flight requests...");
                cancel.cancel();
            }
        });
    }

    let (event_tx, event_rx) = mpsc::channel(256);

    let mut pipeline = Pipeline::new(catalog.clone(), fetcher.clone(), store, archive, config)
        .with_events(event_tx)
        .with_cancellation(cancel);
    if let Some(endpoint) = settings.live_index_endpoint.clone() {
        pipeline = pipeline.with_live_index(LiveIndexMonitor::new(fetcher, endpoint));
    }

    println!(
        "{} Crawling {} ({})",
        style("→").cyan(),
        style(&catalog.name).bold(),
        catalog.root_sitemap
    );

    let progress = tokio::spawn(drive_progress(event_rx));
    let summary = pipeline.run().await?;
    drop(pipeline);
    let _ = progress.await;

    print_summary(&summary);
    Ok(())
}

/// Render pipeline events as a progress bar.
async fn drive_progress(mut events: mpsc::Receiver<PipelineEvent>) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Discovered { total } => {
                let pb = ProgressBar::new(total as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                        .unwrap()
                        .progress_chars("=> "),
                );
                bar = Some(pb);
            }
            PipelineEvent::Fetched { .. } => {}
            PipelineEvent::Missed { .. } | PipelineEvent::Failed { .. } => {
                if let Some(pb) = &bar {
                    pb.inc(1);
                }
            }
            PipelineEvent::Persisted { url } => {
                if let Some(pb) = &bar {
                    pb.set_message(url);
                    pb.inc(1);
                }
            }
        }
    }

    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", style("Run summary").bold());
    println!("  {} discovered", summary.discovered);
    println!("  {} fetched", summary.fetched);
    println!("  {} extracted", summary.extracted);
    println!(
        "  {} {} persisted",
        style("✓").green(),
        summary.persisted
    );
    if summary.failed > 0 {
        println!("  {} {} failed", style("✗").red(), summary.failed);
    }
}

fn cmd_catalogs() -> anyhow::Result<()> {
    println!("{}", style("Catalogs").bold());
    for catalog in catalog::builtin() {
        println!(
            "  {} {} - {}",
            style(&catalog.id).cyan(),
            catalog.name,
            catalog.root_sitemap
        );
        println!("      table: {}", catalog.table);
    }
    Ok(())
}
