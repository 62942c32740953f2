//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use finsource_core::{BatchCoordinator, BatchOptions, BatchProgress, PromptBuilder, RefinementLoop};
use finsource_model::{OpenRouterClient, OpenRouterOptions};
use finsource_report::{ReportFormat, RunReport, fill_dataset, load_records, writer_for};
use finsource_scraper::{HttpReferenceScraper, NoopScraper, ReferenceScraper};
use finsource_shared::{
    AppConfig, CompanyResult, CompanyTask, RunConfig, RunId, TerminationReason, init_config,
    load_config, resolve_api_key,
};

use crate::input::load_companies;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// finsource: locate official financial disclosures for a list of companies.
#[derive(Parser)]
#[command(
    name = "finsource",
    version,
    about = "Find the latest official financial disclosure URL and fiscal year for each company.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Result file format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// One JSON report with totals and a checksum.
    Json,
    /// One record per line.
    Jsonl,
    /// `;`-separated, one row per record.
    Csv,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ReportFormat::Json,
            OutputFormat::Jsonl => ReportFormat::JsonLines,
            OutputFormat::Csv => ReportFormat::Csv,
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process a company list and write the results.
    Run(RunArgs),

    /// Fill empty FIN_REP sources of a discovery dataset from a finished run.
    Fill(FillArgs),

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Company list: JSON array, `;`-separated `.csv` with a NAME column,
    /// or one name per line (`Name | domain`).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where to write results.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output format. Defaults to jsonl for `.jsonl` paths, csv for `.csv`
    /// paths, json otherwise.
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Companies processed in parallel.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Search/judge iterations per company.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Timeout for each model or scraper call, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Retries after a model transport failure.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Kind of document to look for (e.g. "Annual Report", "10-K").
    #[arg(long)]
    pub source_type: Option<String>,

    /// Write results in input order instead of completion order.
    #[arg(long)]
    pub ordered: bool,

    /// Skip reference scraping.
    #[arg(long)]
    pub no_scrape: bool,
}

#[derive(Args, Debug)]
pub(crate) struct FillArgs {
    /// `;`-separated dataset with NAME, TYPE, SRC and REFYEAR columns.
    #[arg(short, long)]
    pub dataset: PathBuf,

    /// JSON report or JSON-lines results of a previous run.
    #[arg(short, long)]
    pub results: PathBuf,

    /// Where to write the filled dataset.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Use only results the judge accepted.
    #[arg(long)]
    pub accepted_only: bool,
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
        0 => "finsource=info",
        1 => "finsource=debug",
        _ => "finsource=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Fill(args) => cmd_fill(&args),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Merge config file values with CLI overrides.
pub(crate) fn run_config(config: &AppConfig, args: &RunArgs) -> RunConfig {
    let mut run = RunConfig::from(config);
    if let Some(n) = args.max_iterations {
        run.max_iterations = n;
    }
    if let Some(c) = args.concurrency {
        run.concurrency = c;
    }
    if let Some(secs) = args.timeout_secs {
        run.per_call_timeout = Duration::from_secs(secs);
    }
    if let Some(r) = args.retries {
        run.max_transport_retries = r;
    }
    run
}

pub(crate) fn output_format(args: &RunArgs) -> OutputFormat {
    args.format.unwrap_or_else(|| match args.output.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("jsonl") => OutputFormat::Jsonl,
        Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
        _ => OutputFormat::Json,
    })
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let run = run_config(&config, &args);
    run.validate()?;

    let companies = load_companies(&args.input)?;
    if companies.is_empty() {
        return Err(eyre!("no companies found in '{}'", args.input.display()));
    }

    let api_key = resolve_api_key(&config)?;
    let search = OpenRouterClient::new(OpenRouterOptions::search(&config.model, &api_key))?;
    let judge = OpenRouterClient::new(OpenRouterOptions::judge(&config.model, &api_key))?;

    let scraper: Arc<dyn ReferenceScraper> = if args.no_scrape || !config.scraper.enabled {
        info!("reference scraping disabled");
        Arc::new(NoopScraper)
    } else {
        Arc::new(HttpReferenceScraper::new(&config.scraper)?)
    };

    let source_type = args
        .source_type
        .clone()
        .unwrap_or_else(|| config.defaults.source_type.clone());
    let refinement = RefinementLoop::new(Arc::new(search), Arc::new(judge), scraper, &run)
        .with_prompts(PromptBuilder::new(source_type.clone()));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight companies");
            ctrl_c.cancel();
        }
    });

    info!(
        companies = companies.len(),
        concurrency = run.concurrency,
        max_iterations = run.max_iterations,
        source_type = %source_type,
        search_model = %config.model.search_model,
        judge_model = %config.model.judge_model,
        "starting batch"
    );

    let progress = Arc::new(CliProgress::new(companies.len()));
    let coordinator = BatchCoordinator::new(
        Arc::new(refinement),
        BatchOptions {
            concurrency: run.concurrency,
            preserve_order: args.ordered,
        },
    )
    .with_progress(progress.clone());

    let results = coordinator.run(companies, &cancel).await;
    progress.finish();

    let report = RunReport::new(RunId::new(), &results)?;
    let format = output_format(&args);
    writer_for(format.into()).write(&report, &args.output)?;

    print_summary(&report, &args.output);
    Ok(())
}

fn print_summary(report: &RunReport, output: &Path) {
    println!();
    println!("  Run:       {}", report.run_id);
    println!(
        "  Accepted:  {}/{} ({:.0}%)",
        report.totals.accepted,
        report.totals.companies,
        report.accepted_rate * 100.0
    );
    for (reason, count) in &report.totals.by_reason {
        if reason != TerminationReason::Accepted.as_str() {
            println!("  {reason:<10} {count}");
        }
    }
    println!("  Output:    {}", output.display());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Progress bar over companies finished.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {bar:30.cyan/blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgress for CliProgress {
    fn company_started(&self, company: &CompanyTask) {
        self.bar.set_message(company.name.clone());
    }

    fn company_finished(&self, result: &CompanyResult) {
        self.bar.inc(1);
        let url = result.answer.url.as_deref().unwrap_or("-");
        self.bar.println(format!(
            "  {:<9} {} -> {url}",
            result.termination.as_str(),
            result.company.name
        ));
    }
}

fn cmd_fill(args: &FillArgs) -> Result<()> {
    let records = load_records(&args.results)?;
    info!(records = records.len(), results = %args.results.display(), "results loaded");

    let summary = fill_dataset(&args.dataset, &records, &args.output, args.accepted_only)?;

    println!();
    println!("  Rows:       {}", summary.rows);
    println!("  Filled:     {}", summary.filled);
    println!("  Unresolved: {}", summary.unresolved);
    println!("  Output:     {}", args.output.display());
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn run_args(cli: Cli) -> RunArgs {
        match cli.command {
            Command::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn flags_override_config() {
        let args = run_args(parse(&[
            "finsource", "run", "-i", "in.txt", "-o", "out.json", "--concurrency", "8",
            "--max-iterations", "5", "--timeout-secs", "30", "--retries", "0",
        ]));
        let run = run_config(&AppConfig::default(), &args);
        assert_eq!(run.concurrency, 8);
        assert_eq!(run.max_iterations, 5);
        assert_eq!(run.per_call_timeout, Duration::from_secs(30));
        assert_eq!(run.max_transport_retries, 0);
    }

    #[test]
    fn config_defaults_apply_without_flags() {
        let args = run_args(parse(&["finsource", "run", "-i", "in.txt", "-o", "out.json"]));
        let run = run_config(&AppConfig::default(), &args);
        assert_eq!(run, RunConfig::default());
        assert!(!args.ordered);
        assert!(!args.no_scrape);
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let args = run_args(parse(&[
            "finsource", "run", "-i", "in.txt", "-o", "out.json", "--concurrency", "0",
        ]));
        assert!(run_config(&AppConfig::default(), &args).validate().is_err());
    }

    #[test]
    fn format_follows_extension_unless_given() {
        let jsonl = run_args(parse(&["finsource", "run", "-i", "a", "-o", "out.JSONL"]));
        assert_eq!(output_format(&jsonl), OutputFormat::Jsonl);

        let json = run_args(parse(&["finsource", "run", "-i", "a", "-o", "out.json"]));
        assert_eq!(output_format(&json), OutputFormat::Json);

        let forced = run_args(parse(&[
            "finsource", "run", "-i", "a", "-o", "out.txt", "--format", "jsonl",
        ]));
        assert_eq!(output_format(&forced), OutputFormat::Jsonl);

        let csv = run_args(parse(&["finsource", "run", "-i", "a", "-o", "out.csv"]));
        assert_eq!(output_format(&csv), OutputFormat::Csv);
    }

    #[test]
    fn fill_writes_sources_from_results() {
        let dir = std::env::temp_dir().join(format!("finsource-fill-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let dataset = dir.join("discovery.csv");
        let results = dir.join("results.jsonl");
        let output = dir.join("submission.csv");
        std::fs::write(&dataset, "NAME;TYPE;SRC;REFYEAR\nAcme Corp;FIN_REP;;\n").unwrap();
        let record = serde_json::json!({
            "company": "Acme Corp",
            "final_url": "https://acme.com/ar-2023.pdf",
            "fiscal_year": 2023,
            "accepted": true,
            "termination_reason": "accepted",
            "iterations_used": 1,
            "last_feedback": null
        });
        std::fs::write(&results, format!("{record}\n")).unwrap();

        let cli = parse(&[
            "finsource", "fill", "-d", dataset.to_str().unwrap(), "-r",
            results.to_str().unwrap(), "-o", output.to_str().unwrap(), "--accepted-only",
        ]);
        let Command::Fill(args) = cli.command else {
            panic!("expected fill");
        };
        cmd_fill(&args).unwrap();

        let filled = std::fs::read_to_string(&output).unwrap();
        assert!(filled.contains("Acme Corp;FIN_REP;https://acme.com/ar-2023.pdf;2023"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn input_and_output_are_required() {
        assert!(Cli::try_parse_from(["finsource", "run", "-i", "in.txt"]).is_err());
    }
}
