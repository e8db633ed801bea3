use std::process::ExitCode;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use rasff_harvest::app::{App, CorpusResult, FetchOptions, FetchResult, RefreshResult};
use rasff_harvest::config::{ConfigLoader, ResolvedConfig};
use rasff_harvest::domain::{Interval, ReferenceId};
use rasff_harvest::error::RasffError;
use rasff_harvest::output::{AlertsOutput, JsonOutput, OriginsOutput, OutputMode};
use rasff_harvest::portal::{PortalClient, PortalHttpClient};
use rasff_harvest::progress::{FetchObserver, LogObserver, LogSink, ProgressSink};
use rasff_harvest::query::{AlertFilter, Countries, group_by_country};
use rasff_harvest::terminal::{StatusLines, TerminalBars};

#[derive(Parser)]
#[command(name = "rasff")]
#[command(about = "Harvest RASFF notifications and query the alert corpus")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Config file (defaults to ./rasff.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Refresh the cached reference list from the portal listing")]
    Refs,
    #[command(about = "Download notification documents into shards")]
    Fetch(FetchArgs),
    #[command(about = "Merge shards into the corpus file")]
    Corpus(CorpusArgs),
    #[command(about = "Select alerts")]
    Alerts(SelectionArgs),
    #[command(about = "Origins of the selected alerts, grouped by country")]
    Origins(SelectionArgs),
    #[command(about = "Product categories and their products")]
    Catalog,
    #[command(about = "Product and hazard category counts")]
    Pies(PieArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    retry_failed: bool,
}

#[derive(Args)]
struct CorpusArgs {
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct SelectionArgs {
    #[arg(long = "country")]
    countries: Vec<String>,

    /// First day, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    from: Option<NaiveDate>,

    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    to: Option<NaiveDate>,

    #[arg(long)]
    category: Option<String>,

    #[arg(long)]
    product: Option<String>,

    /// Print per-country counts instead of records
    #[arg(long)]
    by_country: bool,
}

#[derive(Args)]
struct PieArgs {
    #[arg(long = "country")]
    countries: Vec<String>,

    #[arg(long, value_parser = parse_day)]
    from: Option<NaiveDate>,

    #[arg(long, value_parser = parse_day)]
    to: Option<NaiveDate>,
}

/// Stands in for the portal on commands that only read local files.
struct Offline;

impl PortalClient for Offline {
    fn fetch_listing(&self, _offset: usize) -> Result<String, RasffError> {
        Err(RasffError::PortalHttp("portal not available offline".to_string()))
    }

    fn fetch_notification(&self, _reference: &ReferenceId) -> Result<String, RasffError> {
        Err(RasffError::PortalHttp("portal not available offline".to_string()))
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(rasff) = report.downcast_ref::<RasffError>() {
            return ExitCode::from(map_exit_code(rasff));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RasffError) -> u8 {
    match error {
        RasffError::NoReferences | RasffError::NoShards(_) | RasffError::ConfigRead(_) => 2,
        RasffError::PortalHttp(_)
        | RasffError::PortalStatus { .. }
        | RasffError::Pagination { .. }
        | RasffError::Network { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Refs => {
            let client = PortalHttpClient::new(&config.portal)?;
            run_refs(App::new(config, client), output_mode)
        }
        Commands::Fetch(args) => {
            let client = PortalHttpClient::new(&config.portal)?;
            run_fetch(args, App::new(config, client), output_mode)
        }
        Commands::Corpus(args) => run_corpus(args, App::new(config, Offline), output_mode),
        Commands::Alerts(args) => run_alerts(args, config, output_mode),
        Commands::Origins(args) => run_origins(args, config, output_mode),
        Commands::Catalog => {
            let app = App::new(config, Offline);
            let dataset = app.load_dataset(sink_for(output_mode))?;
            JsonOutput::print_catalog(&dataset.query().category_catalog()).into_diagnostic()
        }
        Commands::Pies(args) => {
            let interval = interval_from(args.from, args.to)?;
            let app = App::new(config, Offline);
            let dataset = app.load_dataset(sink_for(output_mode))?;
            let pies = dataset.query().pies(countries_from(args.countries), interval);
            JsonOutput::print_pies(&pies).into_diagnostic()
        }
    }
}

fn run_refs<C: PortalClient>(app: App<C>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.refresh_references(sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_refresh(&result).into_diagnostic()?,
        OutputMode::Interactive => print_refresh_summary(&result),
    }
    if let Some(failure) = result.pagination_error {
        return Err(RasffError::Pagination {
            offset: failure.offset,
            reason: failure.reason,
        }
        .into());
    }
    Ok(())
}

fn run_fetch<C: PortalClient>(
    args: FetchArgs,
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let options = FetchOptions {
        retry_failed: args.retry_failed,
        workers: args.workers,
    };
    let mut observer: Box<dyn FetchObserver> = match output_mode {
        OutputMode::Interactive => Box::new(TerminalBars::new()),
        OutputMode::NonInteractive => Box::new(LogObserver::new(Duration::from_secs(5))),
    };
    let result = app.fetch_records(options, observer.as_mut())?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_fetch(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_fetch_summary(&result);
            Ok(())
        }
    }
}

fn run_corpus<C: PortalClient>(
    args: CorpusArgs,
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let result = app.build_corpus(args.force, sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_corpus(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_corpus_summary(&result);
            Ok(())
        }
    }
}

fn run_alerts(
    args: SelectionArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let filter = filter_from(&args)?;
    let app = App::new(config, Offline);
    let dataset = app.load_dataset(sink_for(output_mode))?;
    let alerts = dataset.query().select_alerts(&filter);
    if args.by_country {
        return JsonOutput::print_counts(&group_by_country(alerts.iter().copied()))
            .into_diagnostic();
    }
    JsonOutput::print_alerts(&AlertsOutput {
        count: alerts.len(),
        alerts: &alerts,
        parse: dataset.report(),
    })
    .into_diagnostic()
}

fn run_origins(
    args: SelectionArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let filter = filter_from(&args)?;
    let app = App::new(config, Offline);
    let dataset = app.load_dataset(sink_for(output_mode))?;
    let query = dataset.query();
    let alerts = query.select_alerts(&filter);
    let origins = query.origins_for(&alerts);
    let by_country = group_by_country(origins.iter().copied());
    if args.by_country {
        return JsonOutput::print_counts(&by_country).into_diagnostic();
    }
    JsonOutput::print_origins(&OriginsOutput {
        count: origins.len(),
        by_country,
        origins: &origins,
    })
    .into_diagnostic()
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &StatusLines,
        OutputMode::NonInteractive => &LogSink,
    }
}

fn filter_from(args: &SelectionArgs) -> miette::Result<AlertFilter> {
    Ok(AlertFilter {
        countries: countries_from(args.countries.clone()),
        interval: interval_from(args.from, args.to)?,
        category: args.category.clone(),
        product: args.product.clone(),
    })
}

fn countries_from(mut countries: Vec<String>) -> Option<Countries> {
    match countries.len() {
        0 => None,
        1 => countries.pop().map(Countries::One),
        _ => Some(Countries::Many(countries)),
    }
}

fn interval_from(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Option<Interval>, RasffError> {
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    let start = from.unwrap_or(NaiveDate::MIN);
    let end = to.unwrap_or(NaiveDate::MAX);
    Interval::new(start, end).map(Some)
}

fn parse_day(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| format!("expected YYYY-MM-DD: {err}"))
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_refresh_summary(result: &RefreshResult) {
    println!("{CYAN}RASFF references{RESET}");
    println!("{GREEN}  cached before: {}{RESET}", result.known);
    println!("{GREEN}  new: {}{RESET}", result.discovered);
    println!(
        "{GREEN}  total: {} ({} pages, {:.1}s){RESET}",
        result.total,
        result.pages,
        result.elapsed_ms as f64 / 1000.0
    );
    println!("{CYAN}  saved to {}{RESET}", result.references_path);
    if let Some(failure) = &result.pagination_error {
        println!(
            "{RED}  listing stopped at offset {}: {}{RESET}",
            failure.offset, failure.reason
        );
    }
}

fn print_fetch_summary(result: &FetchResult) {
    println!("{CYAN}RASFF fetch summary{RESET}");
    println!("{GREEN}  downloaded: {}{RESET}", result.succeeded);
    let color = if result.failed == 0 { GREEN } else { YELLOW };
    println!("{color}  failed: {}{RESET}", result.failed);
    println!(
        "{CYAN}  {} of {} requested in {:.1}s{RESET}",
        result.succeeded + result.failed,
        result.requested,
        result.elapsed_ms as f64 / 1000.0
    );
    for worker in &result.workers {
        let color = if worker.failures.is_empty() { GREEN } else { YELLOW };
        println!(
            "{color}  thread {}: {}/{} -> {}{RESET}",
            worker.worker, worker.succeeded, worker.assigned, worker.shard_path
        );
        if let Some(path) = &worker.error_path {
            println!("{YELLOW}    failed ids: {path}{RESET}");
        }
    }
    if result.failed > 0 {
        println!("{YELLOW}  rerun with `rasff fetch --retry-failed` to retry failures{RESET}");
    }
}

fn print_corpus_summary(result: &CorpusResult) {
    println!("{CYAN}RASFF corpus{RESET}");
    match result.shards {
        Some(shards) => println!("{GREEN}  built from {shards} shards{RESET}"),
        None => println!("{GREEN}  reused existing corpus{RESET}"),
    }
    println!("{GREEN}  {} ({} bytes){RESET}", result.path, result.bytes);
    if !result.stale_shards.is_empty() {
        println!(
            "{YELLOW}  {} shards are newer than the corpus; rebuild with --force{RESET}",
            result.stale_shards.len()
        );
    }
}
