use std::process::ExitCode;

use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agridata_pipeline::config::{ConfigLoader, ResolvedConfig};
use agridata_pipeline::domain::KeyColumn;
use agridata_pipeline::error::PipelineError;
use agridata_pipeline::extract::{
    AgrifoodHttpClient, ExtractReport, ProductionQuery, extract, previous_month,
};
use agridata_pipeline::loader::{LoadStatus, Loader};
use agridata_pipeline::notify::{Notifier, NotifyReport, OutboxMailer};
use agridata_pipeline::output::{JsonOutput, ObjectList, RunSummary};
use agridata_pipeline::raw_store::{FsRawStore, RawStore};
use agridata_pipeline::table::SqliteTable;

#[derive(Parser)]
#[command(name = "agridata")]
#[command(about = "Fetch, store and idempotently load EU agri-food production data")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch one month of production data into the raw store")]
    Extract(PeriodArgs),
    #[command(about = "Normalize a raw object and load new rows into the table")]
    Load(LoadArgs),
    #[command(about = "Mail the production summary for the configured country")]
    Notify,
    #[command(about = "Extract, load and notify in one go")]
    Run(PeriodArgs),
    #[command(about = "List raw objects in a bucket")]
    Objects(ObjectsArgs),
}

#[derive(Args, Clone, Copy)]
struct PeriodArgs {
    /// Reporting year (defaults to last month's year).
    #[arg(long, requires = "month")]
    year: Option<i32>,

    /// Reporting month, 1-12 (defaults to last month).
    #[arg(long, requires = "year", value_parser = clap::value_parser!(u32).range(1..=12))]
    month: Option<u32>,
}

#[derive(Args)]
struct LoadArgs {
    #[arg(long)]
    bucket: Option<String>,

    #[arg(long)]
    key: String,

    /// Override the configured natural key, e.g. `country,year_month,category`.
    #[arg(long, value_enum, value_delimiter = ',')]
    natural_key: Vec<KeyColumn>,
}

#[derive(Args)]
struct ObjectsArgs {
    #[arg(long)]
    bucket: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<PipelineError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::ConfigRead(_)
        | PipelineError::ConfigParse(_)
        | PipelineError::InvalidConfig(_) => 2,
        PipelineError::UpstreamHttp(_)
        | PipelineError::UpstreamStatus { .. }
        | PipelineError::MalformedPayload(_)
        | PipelineError::Mail(_) => 3,
        _ => 1,
    }
}

fn load_exit_code(status: LoadStatus) -> ExitCode {
    match status {
        LoadStatus::Written => ExitCode::SUCCESS,
        LoadStatus::PartialWritten => ExitCode::from(4),
        LoadStatus::Failed => ExitCode::from(5),
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = FsRawStore::new_with_root(config.raw_store_root.clone());

    match cli.command {
        Commands::Extract(period) => {
            let report = run_extract(&config, &store, period)?;
            JsonOutput::print_extract(&report).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Load(args) => {
            let settings = config.table_with_key(args.natural_key)?;
            let table = SqliteTable::open(&config.table_path, &settings)?;
            let loader = Loader::new(&store, &table, &table, settings.natural_key.clone());
            let bucket = args.bucket.unwrap_or_else(|| config.extract.bucket.clone());
            let report = loader.load_from_blob(&bucket, &args.key);
            JsonOutput::print_load(&report).into_diagnostic()?;
            Ok(load_exit_code(report.status))
        }
        Commands::Notify => {
            let table = SqliteTable::open(&config.table_path, &config.table)?;
            let report = run_notify(&config, &table)?;
            JsonOutput::print_notify(&report).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(period) => {
            let extracted = run_extract(&config, &store, period)?;
            let table = SqliteTable::open(&config.table_path, &config.table)?;
            let loader = Loader::new(&store, &table, &table, config.table.natural_key.clone());
            let load = loader.load_from_blob(&extracted.bucket, &extracted.object_key);

            let notify = if load.status == LoadStatus::Failed {
                None
            } else if config.notify.recipient.is_none() {
                warn!("notify.recipient is not set; skipping summary mail");
                None
            } else {
                Some(run_notify(&config, &table)?)
            };

            let status = load.status;
            let summary = RunSummary {
                extract: extracted,
                load,
                notify,
            };
            JsonOutput::print_run(&summary).into_diagnostic()?;
            Ok(load_exit_code(status))
        }
        Commands::Objects(args) => {
            let bucket = args.bucket.unwrap_or_else(|| config.extract.bucket.clone());
            let keys = store.list(&bucket)?;
            JsonOutput::print_objects(&ObjectList { bucket, keys }).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_extract(
    config: &ResolvedConfig,
    store: &FsRawStore,
    period: PeriodArgs,
) -> Result<ExtractReport, PipelineError> {
    let (year, month) = match (period.year, period.month) {
        (Some(year), Some(month)) => (year, month),
        _ => previous_month(Local::now().date_naive()),
    };
    info!(year, month, "extracting reporting period");
    let query = ProductionQuery::for_period(
        config.extract.member_state_codes.clone(),
        config.extract.categories.clone(),
        year,
        month,
    );
    let client = AgrifoodHttpClient::new(config.request_timeout)?;
    extract(
        &client,
        store,
        &config.extract.bucket,
        &config.extract.base_url,
        &query,
        Utc::now(),
    )
}

fn run_notify(config: &ResolvedConfig, table: &SqliteTable) -> Result<NotifyReport, PipelineError> {
    let settings = config.notify.settings()?;
    let mailer = OutboxMailer::new(config.notify.outbox.clone(), settings.sender.clone());
    Notifier::notify(table, &mailer, &settings)
}
