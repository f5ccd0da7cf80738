// 🏭 enterprise-dw - batch ETL and data quality CLI
// Logs go to stderr; command reports are printed to stdout as JSON.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use enterprise_dw::data_quality::QualityEngine;
use enterprise_dw::rules::{setup_rules, RuleCatalog};
use enterprise_dw::{
    populate_date_dimension, EtlError, EtlPipeline, PipelineConfig, PipelineContext, SourceTable,
    StagingLoader,
};

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "enterprise-dw")]
#[command(about = "Batch ETL into a SQLite star schema, with data quality scoring")]
#[command(version)]
struct Cli {
    /// TOML settings file; missing file means defaults
    #[arg(short, long, value_name = "FILE", default_value = "etl.toml", env = "ETL_CONFIG")]
    config: PathBuf,

    /// Business date for SCD2 changes and quality reports (default: today)
    #[arg(long, value_name = "DATE")]
    as_of: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and populate the date dimension
    Setup,

    /// Load CSV extracts into staging tables
    Load {
        /// customers, products, transactions, items, campaigns, responses or all
        #[arg(long, default_value = "all")]
        table: LoadTarget,

        /// Extract to load instead of the latest file in the raw data directory
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },

    /// Run the warehouse pipeline
    Run {
        #[arg(long, value_enum, default_value_t = RunMode::Full)]
        mode: RunMode,
    },

    /// Data quality rules and scorecards
    Quality {
        #[command(subcommand)]
        action: QualityAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    Full,
    Incremental,
    Validate,
}

#[derive(Subcommand, Debug, PartialEq)]
enum QualityAction {
    /// Upsert the rule catalog into dq_rules
    Setup,
    /// Execute every active rule for the report date
    Run,
    /// Score the report date's results
    Scorecard {
        /// DAILY, WEEKLY or MONTHLY label (default from config)
        #[arg(long)]
        period: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadTarget {
    All,
    Table(SourceTable),
}

impl FromStr for LoadTarget {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(LoadTarget::All)
        } else {
            s.parse().map(LoadTarget::Table)
        }
    }
}

// ============================================================================
// ENTRY POINT
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()));
    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_tracing(&level);

    match config.and_then(|config| execute(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins; otherwise the configured level
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(cli: Cli, config: PipelineConfig) -> Result<()> {
    let processing_date = cli.as_of.unwrap_or_else(|| Local::now().date_naive());
    let db_path = config.database.path.clone();
    let ctx = PipelineContext::open(config, processing_date)
        .with_context(|| format!("opening warehouse {}", db_path.display()))?;

    match cli.command {
        Command::Setup => setup(&ctx),
        Command::Load { table, file } => load(&ctx, table, file.as_deref()),
        Command::Run { mode } => run(&ctx, mode),
        Command::Quality { action } => quality(&ctx, action),
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn setup(ctx: &PipelineContext) -> Result<()> {
    let dates = &ctx.config.date_dimension;
    let inserted = populate_date_dimension(&ctx.conn, dates.start_year, dates.end_year)
        .context("populating date dimension")?;
    info!(inserted, "✓ warehouse setup complete");
    Ok(())
}

fn load(ctx: &PipelineContext, target: LoadTarget, file: Option<&Path>) -> Result<()> {
    let loader = StagingLoader::new(&ctx.conn, &ctx.config.paths.raw_data, ctx.config.etl.batch_size)
        .context("initializing staging loader")?;

    match target {
        LoadTarget::All => {
            if file.is_some() {
                bail!("--file needs a single --table");
            }
            let summary = loader.load_all(&ctx.conn);
            print_report(&summary)?;
            if !summary.is_success() {
                bail!("{} staging table(s) failed to load", summary.failed.len());
            }
        }
        LoadTarget::Table(table) => {
            let load = loader
                .load_table(&ctx.conn, table, file)
                .with_context(|| format!("loading staging table {table}"))?;
            print_report(&load)?;
        }
    }
    Ok(())
}

fn run(ctx: &PipelineContext, mode: RunMode) -> Result<()> {
    let pipeline = EtlPipeline::new(ctx);
    match mode {
        RunMode::Full => {
            let summary = pipeline.run_full().context("full pipeline run")?;
            print_report(&summary)?;
        }
        RunMode::Incremental => pipeline.run_incremental()?,
        RunMode::Validate => {
            let report = pipeline.validate().context("warehouse validation")?;
            print_report(&report)?;
        }
    }
    Ok(())
}

fn quality(ctx: &PipelineContext, action: QualityAction) -> Result<()> {
    let settings = &ctx.config.quality;
    let engine = QualityEngine::new(ctx.processing_date, settings.max_exceptions_per_rule);

    match action {
        QualityAction::Setup => {
            let catalog = RuleCatalog::load(settings.rules_file.as_deref())
                .context("loading quality rule catalog")?;
            let count = setup_rules(&ctx.conn, &catalog)?;
            info!(rules = count, "✓ quality rules ready");
        }
        QualityAction::Run => {
            let summary = engine.run_all_rules(&ctx.conn).context("running quality rules")?;
            print_report(&summary)?;
        }
        QualityAction::Scorecard { period } => {
            let period = period.unwrap_or_else(|| settings.report_period.clone());
            match engine.generate_scorecard(&ctx.conn, &period)? {
                Some(scorecard) => print_report(&scorecard)?,
                None => warn!(report_date = %ctx.processing_date, "no quality results to score"),
            }
        }
    }
    Ok(())
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
