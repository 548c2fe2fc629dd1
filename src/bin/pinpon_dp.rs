use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use pinpon_datapipe::config::{ConfigLoader, ResolvedConfig};
use pinpon_datapipe::error::PipeError;
use pinpon_datapipe::gsheets;
use pinpon_datapipe::invoices::InvoiceStore;
use pinpon_datapipe::kpi::{self, RatioPolicy};
use pinpon_datapipe::notion::{self, NotionHttpClient};
use pinpon_datapipe::output::{InvoiceReport, JsonOutput, LoadReport};
use pinpon_datapipe::sheets::SheetsHttpClient;
use pinpon_datapipe::sync;
use pinpon_datapipe::table::Record;
use pinpon_datapipe::upload;

#[derive(Parser)]
#[command(name = "pinpon-dp")]
#[command(about = "Business reporting and invoicing sync (CSV/XLSX + Google Sheets + Notion)")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    /// Shared access token; required when `pin_token` is configured.
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Load a source, normalize it, and report KPIs")]
    Load(LoadArgs),
    #[command(about = "Operate on the invoices sheet")]
    Invoices(InvoicesArgs),
}

#[derive(Args)]
struct LoadArgs {
    #[command(subcommand)]
    command: LoadCommand,
}

#[derive(Subcommand)]
enum LoadCommand {
    #[command(about = "Load an uploaded CSV/XLSX file")]
    File {
        path: Utf8PathBuf,
        #[command(flatten)]
        opts: LoadOpts,
    },
    #[command(about = "Load the first worksheet of a Google Sheet by URL")]
    Gsheet {
        url: String,
        #[command(flatten)]
        opts: LoadOpts,
    },
    #[command(about = "Load the configured Notion database")]
    Notion {
        #[command(flatten)]
        opts: LoadOpts,
    },
}

#[derive(Args, Clone)]
struct LoadOpts {
    /// Write the normalized table to this path as CSV.
    #[arg(long)]
    out: Option<Utf8PathBuf>,

    /// Exclude undefined IVA ratios from the average instead of
    /// counting them as zero.
    #[arg(long)]
    exclude_undefined: bool,
}

#[derive(Args)]
struct InvoicesArgs {
    #[command(subcommand)]
    command: InvoicesCommand,
}

#[derive(Subcommand)]
enum InvoicesCommand {
    #[command(about = "Read the invoice table and report summary figures")]
    List,
    #[command(about = "Upsert rows from a JSON file (array of objects keyed by ID)")]
    Upsert {
        #[arg(long)]
        file: Utf8PathBuf,
    },
    #[command(about = "Export 'Por enviar' rows to the accountant sheet")]
    Export {
        /// Also write the exported rows to this path as CSV.
        #[arg(long)]
        copy: Option<Utf8PathBuf>,
    },
    #[command(about = "Pull FOLIO/ESTATUS assignments back from the accountant sheet")]
    Sync,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(pipe) = report.downcast_ref::<PipeError>() {
            return ExitCode::from(map_exit_code(pipe));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PipeError) -> u8 {
    match error {
        PipeError::Configuration(_)
        | PipeError::ConfigRead(_)
        | PipeError::ConfigParse(_)
        | PipeError::NotFound(_) => 2,
        PipeError::Authentication(_)
        | PipeError::SheetsHttp(_)
        | PipeError::SheetsStatus { .. }
        | PipeError::NotionHttp(_)
        | PipeError::NotionStatus { .. } => 3,
        PipeError::Schema(_) | PipeError::Validation { .. } => 4,
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
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    check_token(&config, cli.token.as_deref()).into_diagnostic()?;

    match cli.command {
        Commands::Load(args) => run_load(args.command, &config),
        Commands::Invoices(args) => run_invoices(args.command, &config),
    }
}

fn check_token(config: &ResolvedConfig, token: Option<&str>) -> Result<(), PipeError> {
    match config.pin_token.as_deref() {
        Some(expected) if token != Some(expected) => Err(PipeError::Authentication(
            "invalid or missing access token".to_string(),
        )),
        _ => Ok(()),
    }
}

fn run_load(command: LoadCommand, config: &ResolvedConfig) -> miette::Result<()> {
    let (table, opts) = match command {
        LoadCommand::File { path, opts } => (upload::load_file(&path).into_diagnostic()?, opts),
        LoadCommand::Gsheet { url, opts } => {
            let key = config.require_service_account().into_diagnostic()?.clone();
            let api = SheetsHttpClient::new(key).into_diagnostic()?;
            (gsheets::load_sheet_url(&api, &url).into_diagnostic()?, opts)
        }
        LoadCommand::Notion { opts } => {
            let (api_key, db_id) = config.require_notion().into_diagnostic()?;
            let client = NotionHttpClient::new(api_key).into_diagnostic()?;
            (notion::load_database(&client, db_id).into_diagnostic()?, opts)
        }
    };

    let policy = if opts.exclude_undefined {
        RatioPolicy::ExcludeUndefined
    } else {
        RatioPolicy::ZeroFill
    };
    let report = LoadReport {
        rows: table.len(),
        kpis: kpi::compute_kpis_with(&table, policy),
        table,
    };
    if let Some(out) = &opts.out {
        report.table.write_csv(out).into_diagnostic()?;
    }
    JsonOutput::print_load(&report).into_diagnostic()?;
    Ok(())
}

fn run_invoices(command: InvoicesCommand, config: &ResolvedConfig) -> miette::Result<()> {
    let store = build_store(config)?;
    match command {
        InvoicesCommand::List => {
            let table = store.read().into_diagnostic()?;
            let report = InvoiceReport {
                rows: table.len(),
                summary: kpi::invoice_summary(&table),
                table,
            };
            JsonOutput::print_invoices(&report).into_diagnostic()?;
        }
        InvoicesCommand::Upsert { file } => {
            let rows = read_rows_file(&file).into_diagnostic()?;
            let table = store.upsert(&rows).into_diagnostic()?;
            let report = InvoiceReport {
                rows: table.len(),
                summary: kpi::invoice_summary(&table),
                table,
            };
            JsonOutput::print_invoices(&report).into_diagnostic()?;
        }
        InvoicesCommand::Export { copy } => {
            let outcome = sync::export_pending(&store).into_diagnostic()?;
            if let Some(copy) = &copy {
                outcome.table.write_csv(copy).into_diagnostic()?;
            }
            JsonOutput::print_export(&outcome).into_diagnostic()?;
        }
        InvoicesCommand::Sync => {
            let outcome = sync::sync_folios(&store).into_diagnostic()?;
            JsonOutput::print_sync(&outcome).into_diagnostic()?;
        }
    }
    Ok(())
}

fn build_store(config: &ResolvedConfig) -> miette::Result<InvoiceStore<SheetsHttpClient>> {
    let sheet_id = config.require_sheet_id().into_diagnostic()?.to_string();
    let key = config.require_service_account().into_diagnostic()?.clone();
    let api = SheetsHttpClient::new(key).into_diagnostic()?;
    Ok(InvoiceStore::new(
        api,
        sheet_id,
        config.fact_sheet.clone(),
        config.cont_sheet.clone(),
    ))
}

fn read_rows_file(path: &Utf8PathBuf) -> Result<Vec<Record>, PipeError> {
    let content = std::fs::read_to_string(path.as_std_path())
        .map_err(|err| PipeError::Filesystem(err.to_string()))?;
    let values: Vec<serde_json::Value> =
        serde_json::from_str(&content).map_err(|err| PipeError::InvalidRows(err.to_string()))?;
    values.iter().map(Record::from_json).collect()
}
