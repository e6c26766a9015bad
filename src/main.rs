use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use revhist::config::{self, CleanConfig, HarvestConfig};
use revhist::latest::{self, HttpExtractsApi};
use revhist::pipeline::{self, CleanOutcome, HarvestOutcome};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "revhist")]
#[command(about = "Harvest a wiki article's revision history and clean it into a text corpus")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every revision of an article into a JSON collection
    Harvest(HarvestArgs),
    /// Clean a harvested collection into the final corpus
    Clean(CleanArgs),
    /// Harvest then clean
    Run(RunArgs),
    /// Download every revision of an article as a MediaWiki XML export
    Dump(HarvestArgs),
    /// Fetch the current plain text of one or more articles
    Latest(LatestArgs),
}

#[derive(Args)]
struct HarvestArgs {
    /// Wiki language code (e.g. en, es)
    #[arg(short, long)]
    lang: String,

    /// Article title as it appears in the URL
    #[arg(short, long)]
    title: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: String,

    /// Revisions requested per API call
    #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: u32,

    /// Pause between consecutive API calls, in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_REQUEST_DELAY_MS)]
    delay_ms: u64,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Only fetch the lead section of each revision
    #[arg(long)]
    lead_only: bool,

    /// API endpoint (defaults to https://<lang>.wikipedia.org/w/api.php)
    #[arg(long)]
    api_url: Option<String>,

    /// User-Agent sent with every request
    #[arg(long, env = "REVHIST_USER_AGENT", default_value = config::DEFAULT_USER_AGENT)]
    user_agent: String,
}

#[derive(Args)]
struct CleanArgs {
    /// Collection file written by `harvest`
    #[arg(short, long)]
    input: String,

    #[command(flatten)]
    tuning: CleanTuning,
}

#[derive(Args)]
struct CleanTuning {
    /// Revisions per chunk handed to the workers
    #[arg(long, default_value_t = config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Worker threads (defaults to, and capped at, available cores)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    harvest: HarvestArgs,

    #[command(flatten)]
    tuning: CleanTuning,
}

#[derive(Args)]
struct LatestArgs {
    /// Wiki language code
    #[arg(short, long)]
    lang: String,

    /// Article titles
    #[arg(required = true)]
    titles: Vec<String>,

    /// Only the introduction, before the first section
    #[arg(long)]
    intro_only: bool,

    /// Write the JSON result here instead of stdout
    #[arg(long)]
    output: Option<String>,

    /// Extract batches in flight
    #[arg(long, default_value_t = config::DEFAULT_LOOKUP_CONCURRENCY)]
    concurrency: usize,

    /// API endpoint (defaults to https://<lang>.wikipedia.org/w/api.php)
    #[arg(long)]
    api_url: Option<String>,

    /// User-Agent sent with every request
    #[arg(long, env = "REVHIST_USER_AGENT", default_value = config::DEFAULT_USER_AGENT)]
    user_agent: String,
}

impl HarvestArgs {
    fn to_config(&self) -> HarvestConfig {
        let mut config = HarvestConfig::new(&self.lang, &self.title, &self.output);
        config.api_url.clone_from(&self.api_url);
        config.batch_size = self.batch_size;
        config.request_delay = Duration::from_millis(self.delay_ms);
        config.request_timeout = Duration::from_secs(self.timeout_secs);
        config.user_agent.clone_from(&self.user_agent);
        config.lead_only = self.lead_only;
        config
    }
}

impl CleanTuning {
    fn to_config(&self) -> CleanConfig {
        CleanConfig {
            chunk_size: self.chunk_size,
            workers: self.workers,
        }
    }
}

fn harvest(args: &HarvestArgs) -> Result<(HarvestOutcome, Duration)> {
    info!("Starting harvest pass");
    let start = Instant::now();
    let outcome = pipeline::run_harvest(&args.to_config())?;
    let duration = start.elapsed();
    info!(duration_secs = duration.as_secs_f64(), "Harvest pass complete");
    Ok((outcome, duration))
}

fn clean(input: &Path, tuning: &CleanTuning) -> Result<(CleanOutcome, Duration)> {
    info!("Starting clean pass");
    let start = Instant::now();
    let outcome = pipeline::run_clean(input, &tuning.to_config())?;
    let duration = start.elapsed();
    info!(duration_secs = duration.as_secs_f64(), "Clean pass complete");
    Ok((outcome, duration))
}

fn print_harvest_summary(outcome: &HarvestOutcome, duration: Duration) {
    println!("Harvest time:       {:.2}s", duration.as_secs_f64());
    println!("Pages fetched:      {}", outcome.stats.pages_fetched);
    println!("Revisions written:  {}", outcome.stats.revisions_written);
    println!("Revisions dropped:  {}", outcome.stats.revisions_dropped);
    println!("Collection:         {}", outcome.path.display());
}

fn print_clean_summary(outcome: &CleanOutcome, duration: Duration) {
    println!("Clean time:         {:.2}s", duration.as_secs_f64());
    println!("Chunks processed:   {}", outcome.stats.chunks_processed);
    println!("Revisions cleaned:  {}", outcome.stats.revisions_cleaned);
    println!(
        "Size after clean:   {:.1}%",
        outcome.stats.reduction_ratio() * 100.0
    );
    println!("Corpus:             {}", outcome.path.display());
}

fn run_harvest(args: HarvestArgs) -> Result<()> {
    let (outcome, duration) = harvest(&args)?;

    println!();
    println!("=== Summary ===");
    print_harvest_summary(&outcome, duration);
    Ok(())
}

fn run_clean(args: CleanArgs) -> Result<()> {
    let (outcome, duration) = clean(Path::new(&args.input), &args.tuning)?;

    println!();
    println!("=== Summary ===");
    print_clean_summary(&outcome, duration);
    Ok(())
}

fn run_all(args: RunArgs) -> Result<()> {
    let (harvested, harvest_duration) = harvest(&args.harvest)?;
    let (cleaned, clean_duration) = clean(&harvested.path, &args.tuning)?;

    println!();
    println!("=== Summary ===");
    print_harvest_summary(&harvested, harvest_duration);
    println!();
    print_clean_summary(&cleaned, clean_duration);
    println!();
    println!(
        "Total time:         {:.2}s",
        (harvest_duration + clean_duration).as_secs_f64()
    );
    Ok(())
}

fn run_dump(args: HarvestArgs) -> Result<()> {
    info!("Starting dump export");
    let start = Instant::now();
    let outcome = revhist::dump::run_dump(&args.to_config())?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Export time:        {:.2}s", duration.as_secs_f64());
    println!("Page id:            {}", outcome.page_id);
    println!("Pages fetched:      {}", outcome.stats.pages_fetched);
    println!("Revisions written:  {}", outcome.stats.revisions_written);
    println!("Revisions dropped:  {}", outcome.stats.revisions_dropped);
    println!("Export:             {}", outcome.path.display());
    Ok(())
}

fn run_latest(args: LatestArgs) -> Result<()> {
    let base_url = args
        .api_url
        .clone()
        .unwrap_or_else(|| config::api_url_for(&args.lang));
    let api = HttpExtractsApi::new(
        &base_url,
        &args.user_agent,
        Duration::from_secs(config::DEFAULT_REQUEST_TIMEOUT_SECS),
    )
    .context("Failed to build HTTP client")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("revhist-lookup-worker")
        .enable_all()
        .build()?;
    let extracts = rt
        .block_on(latest::lookup_latest(
            &api,
            &args.titles,
            args.intro_only,
            args.concurrency,
        ))
        .with_context(|| format!("Failed to fetch extracts from {}", base_url))?;

    let missing = args.titles.len().saturating_sub(extracts.len());
    let json = serde_json::to_string_pretty(&extracts)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write output: {}", path))?;
            println!();
            println!("=== Summary ===");
            println!("Titles requested:   {}", args.titles.len());
            println!("Extracts found:     {}", extracts.len());
            println!("Without extract:    {}", missing);
            println!("Output:             {}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let result = match cli.command {
        Commands::Harvest(args) => run_harvest(args),
        Commands::Clean(args) => run_clean(args),
        Commands::Run(args) => run_all(args),
        Commands::Dump(args) => run_dump(args),
        Commands::Latest(args) => run_latest(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
