//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use cryptfeed_core::{
    CollectionOutcome, CollectionReport, ProgressReporter, RunSummary, run_ingestion,
};
use cryptfeed_feeds::{Fetcher, fetchers_from_config, http_client};
use cryptfeed_shared::{
    AppConfig, CollectionName, RunConfig, init_config, load_config, load_config_from,
};
use cryptfeed_storage::{DocumentStore, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// cryptfeed: idempotent crypto news ingestion.
#[derive(Parser)]
#[command(
    name = "cryptfeed",
    version,
    about = "Pull crypto news feeds into a document store without duplicates.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.cryptfeed/cryptfeed.toml.
    #[arg(long, global = true, env = "CRYPTFEED_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch every configured source and store the new articles.
    Run {
        /// Only process these collections (repeatable).
        #[arg(long = "only", value_name = "COLLECTION")]
        only: Vec<String>,
    },

    /// List configured sources and their target collections.
    Sources,

    /// Show document counts per collection and the last run.
    Stats,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "cryptfeed=info",
        1 => "cryptfeed=debug",
        _ => "cryptfeed=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run { only } => cmd_run(config_path, &only).await,
        Command::Sources => cmd_sources(config_path).await,
        Command::Stats => cmd_stats(config_path).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(&p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<PathBuf>, only: &[String]) -> Result<()> {
    let config = resolve_config(config_path)?;
    let run_config = RunConfig::from(&config);

    let client = http_client(run_config.fetch_timeout)?;
    let fetchers = select_fetchers(fetchers_from_config(&config, &client)?, only)?;
    if fetchers.is_empty() {
        warn!("no sources configured, nothing to do");
        return Ok(());
    }

    let storage = Storage::connect(&config.store.target()?).await?;
    let run_id = storage.begin_run().await?;

    info!(run_id, sources = fetchers.len(), "ingestion run started");

    let reporter = CliProgress::new();
    let summary = run_ingestion(&storage, &fetchers, &run_config, &reporter).await;

    let summary_json = serde_json::to_string(&summary.to_json())?;
    if let Err(e) = storage.finish_run(run_id, &summary_json).await {
        warn!(error = %e, run_id, "could not record run summary");
    }

    print_summary(&summary);

    let failed = summary.failures().count();
    if failed > 0 {
        return Err(eyre!(
            "{failed} of {} collection(s) failed; see the log for details",
            summary.reports.len()
        ));
    }
    Ok(())
}

/// Keep only the sources whose collection is listed in `only`. An empty list keeps all.
fn select_fetchers(
    fetchers: Vec<Box<dyn Fetcher>>,
    only: &[String],
) -> Result<Vec<Box<dyn Fetcher>>> {
    if only.is_empty() {
        return Ok(fetchers);
    }

    let wanted = only
        .iter()
        .map(|name| CollectionName::new(name.as_str()))
        .collect::<cryptfeed_shared::Result<Vec<_>>>()?;

    if let Some(missing) = wanted
        .iter()
        .find(|w| !fetchers.iter().any(|f| f.collection() == *w))
    {
        return Err(eyre!("no configured source writes to collection '{missing}'"));
    }

    Ok(fetchers
        .into_iter()
        .filter(|f| wanted.contains(f.collection()))
        .collect())
}

fn print_summary(summary: &RunSummary) {
    println!();
    for report in &summary.reports {
        println!("  {}", summary_line(report));
    }
    println!();
    println!(
        "  Inserted {} record(s) in {:.1}s",
        summary.inserted_total(),
        summary.elapsed.as_secs_f64()
    );
    println!();
}

fn summary_line(report: &CollectionReport) -> String {
    let status = match &report.outcome {
        CollectionOutcome::Empty => "no data".to_string(),
        CollectionOutcome::Ingested(r) => format!(
            "{} new, {} already stored, {} repeated",
            r.inserted, r.already_stored, r.repeated_in_batch
        ),
        CollectionOutcome::Failed(e) => format!("FAILED ({}): {e}", e.kind()),
    };
    format!("{:<20} {status}", report.collection.as_str())
}

async fn cmd_sources(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let client = http_client(RunConfig::from(&config).fetch_timeout)?;

    for fetcher in fetchers_from_config(&config, &client)? {
        println!(
            "  {:<20} {:<12} {}",
            fetcher.collection().as_str(),
            fetcher.name(),
            fetcher.source_url()
        );
    }
    Ok(())
}

async fn cmd_stats(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::connect(&config.store.target()?).await?;

    let collections = storage.collections().await?;
    if collections.is_empty() {
        println!("No documents stored yet.");
    }
    for collection in &collections {
        let count = storage.count(collection).await?;
        println!("  {:<20} {count}", collection.as_str());
    }

    if let Some(last) = storage.last_run().await? {
        println!();
        println!("  Last run #{} started {}", last.id, last.started_at);
        match last.finished_at {
            Some(finished) => println!("  Finished {finished}"),
            None => println!("  Did not finish"),
        }
        if let Some(json) = last.summary_json {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            println!(
                "  Inserted {}, failed collections {}",
                value["inserted"], value["failed"]
            );
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn collection_started(&self, collection: &CollectionName, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Ingesting [{current}/{total}] {collection}"));
    }

    fn collection_finished(&self, report: &CollectionReport) {
        self.spinner.set_message(summary_line(report));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}
