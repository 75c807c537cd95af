//! SNPedia-Harvest main entry point
//!
//! This is the command-line interface for the resumable SNPedia harvester.

use anyhow::Context;
use clap::Parser;
use snpedia_harvest::config::{load_config_with_hash, Config};
use snpedia_harvest::engine::{Engine, JobOutcome, JobReport};
use snpedia_harvest::progress::percent;
use snpedia_harvest::storage::{read_count, SqliteStore, Store};
use snpedia_harvest::TracingObserver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// SNPedia-Harvest: a resumable category harvester
///
/// Walks the SNP and genotype categories of SNPedia, storing the wikitext of
/// every page in SQLite. Interrupted runs resume from the last saved
/// checkpoint.
#[derive(Parser, Debug)]
#[command(name = "snpedia-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable SNPedia category harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults are used when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without harvesting
    #[arg(long, conflicts_with_all = ["stats", "recheck"])]
    dry_run: bool,

    /// Show progress from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "recheck"])]
    stats: bool,

    /// Forget completed categories and re-walk them for new members
    #[arg(long)]
    recheck: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (config, Some(hash))
        }
        None => {
            tracing::info!("No configuration given, using defaults");
            (Config::default(), None)
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_harvest(&config, config_hash.as_deref(), cli.recheck).await?;
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
            0 => EnvFilter::new("snpedia_harvest=info,warn"),
            1 => EnvFilter::new("snpedia_harvest=debug,info"),
            2 => EnvFilter::new("snpedia_harvest=trace,debug"),
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

/// Handles the --dry-run mode: shows what would be harvested
fn handle_dry_run(config: &Config) {
    println!("=== SNPedia-Harvest Dry Run ===\n");

    println!("Source:");
    println!("  API: {}", config.source.api_url);
    println!("  Page limit: {}", config.source.page_limit);
    println!("  Timeout: {}s", config.source.timeout_secs);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nTiming:");
    println!("  Retry backoff: {}ms", config.timing.retry_backoff_ms);
    println!("  Chunk delay: {}ms", config.timing.chunk_delay_ms);
    match config.timing.max_list_retries {
        Some(max) => println!("  Listing retries: {}", max),
        None => println!("  Listing retries: unlimited"),
    }
    println!("  Page attempts: {}", config.timing.max_page_attempts);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Error log: {}", config.storage.error_log_path);

    let jobs = config.effective_jobs();
    println!("\nJobs ({}):", jobs.len());
    for job in &jobs {
        println!(
            "  - {} from {} into {}.{} (~{} records, batches of {})",
            job.label,
            job.category,
            job.table,
            job.id_column,
            job.expected_total,
            job.effective_batch_size()
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows checkpoints and record counts
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let mut store = SqliteStore::open(Path::new(&config.storage.database_path))
        .context("Failed to open database")?;

    for job in config.effective_jobs() {
        store.ensure_record_table(&job.table, &job.id_column)?;
        let count = read_count(&mut store, &job.count_key)?;
        let stored = store.count_records(&job.table)?;
        let complete = store.read_checkpoint(&job.done_key())?.is_some();
        let cursor = store.read_checkpoint(&job.cursor_key)?;

        println!("{}:", job.label);
        println!(
            "  Progress: {}/{} ({:.1}%)",
            count,
            job.expected_total,
            percent(count, job.expected_total)
        );
        println!("  Records stored: {}", stored);
        if complete {
            println!("  Status: complete");
        } else if let Some(cursor) = cursor {
            println!("  Status: in progress (cursor {})", cursor);
        } else {
            println!("  Status: not started");
        }
    }

    store.close();
    Ok(())
}

/// Handles the main harvest: runs until done or interrupted with Ctrl-C
async fn handle_harvest(
    config: &Config,
    config_hash: Option<&str>,
    recheck: bool,
) -> anyhow::Result<()> {
    let engine = Engine::from_config(config, Arc::new(TracingObserver::default()))
        .context("Failed to initialize harvester")?;

    if let Some(hash) = config_hash {
        engine.record_config_hash(hash)?;
    }
    if recheck {
        engine.reset_completion()?;
    }

    engine.start()?;

    let wait = engine.wait();
    tokio::pin!(wait);
    let reports = tokio::select! {
        reports = &mut wait => reports,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, stopping. Progress is saved.");
            if let Err(e) = engine.stop() {
                tracing::debug!("Stop after interrupt: {}", e);
            }
            wait.await
        }
    };

    let (done, total) = engine.combined_progress()?;
    tracing::info!(
        "Overall progress: {}/{} ({:.1}%)",
        done,
        total,
        percent(done, total)
    );

    match reports {
        Some(reports) => print_reports(&reports),
        None => anyhow::bail!("Harvest worker exited abnormally"),
    }

    Ok(())
}

fn print_reports(reports: &[JobReport]) {
    for report in reports {
        let outcome = match report.outcome {
            JobOutcome::Exhausted => "complete",
            JobOutcome::Partial => "reached the end with unsaved members, will re-walk",
            JobOutcome::Skipped => "already complete",
            JobOutcome::Interrupted => "interrupted",
        };
        tracing::info!("{}: {} ({} records)", report.label, outcome, report.count);
    }
}
