use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use zotsync_core::{LibraryScope, Reconciler, RecordStore, SyncOptions, DEFAULT_FUZZY_THRESHOLD};
use zotsync_store_api::{ApiConfig, ApiLibrary, DEFAULT_BASE_URL};
use zotsync_store_sqlite::SqliteLibrary;

mod export;
mod input;
mod logging;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "zotsync", version)]
#[command(about = "Sync screening decisions between a Zotero library and ASReview")]
struct Cli {
    /// Increase log detail on stderr (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the library as a screening-tool CSV.
    Export(ExportArgs),
    /// Write screening decisions back to the library as review tags.
    Import(ImportArgs),
    /// Remove every review tag from the library.
    Clean(CleanArgs),
}

#[derive(Debug, Args)]
struct LibraryArgs {
    #[arg(long, env = "ZOTSYNC_LIBRARY_ID")]
    library_id: String,
    /// `users` or `groups`.
    #[arg(long, env = "ZOTSYNC_LIBRARY_TYPE", default_value = "groups")]
    library_type: String,
}

impl LibraryArgs {
    fn scope(&self) -> Result<LibraryScope> {
        Ok(LibraryScope::parse(&self.library_type, &self.library_id)?)
    }
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// Local database; the web API is used when absent.
    #[arg(long, env = "ZOTSYNC_DB_PATH")]
    db_path: Option<PathBuf>,
    #[arg(long, env = "ZOTSYNC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "ZOTSYNC_API_BASE", default_value = DEFAULT_BASE_URL)]
    api_base: String,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// Count what would change without writing.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ExportArgs {
    out_csv: PathBuf,
    #[command(flatten)]
    library: LibraryArgs,
    #[arg(long = "dedupe", env = "ZOTSYNC_DEDUPLICATE", default_value_t = false)]
    dedupe: bool,
    /// Defaults to `~/Zotero/zotero.sqlite`.
    #[arg(long, env = "ZOTSYNC_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    asr_csv: PathBuf,
    #[command(flatten)]
    library: LibraryArgs,
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long, env = "ZOTSYNC_FUZZY_THRESHOLD", default_value_t = DEFAULT_FUZZY_THRESHOLD)]
    fuzzy_threshold: f64,
}

#[derive(Debug, Args)]
struct CleanArgs {
    #[command(flatten)]
    library: LibraryArgs,
    #[command(flatten)]
    store: StoreArgs,
}

/// Which backend a run talked to.
#[derive(Debug, Clone, Copy)]
enum StoreKind {
    Sqlite,
    Api,
}

impl StoreKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Api => "api",
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert("contract_version".to_string(), Value::String(CLI_CONTRACT_VERSION.to_string()));
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&logging::LogConfig::from_verbosity(cli.verbose))?;
    match cli.command {
        Command::Export(args) => run_export(&args),
        Command::Import(args) => run_import(&args),
        Command::Clean(args) => run_clean(&args),
    }
}

fn default_db_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join("Zotero").join("zotero.sqlite"))
        .ok_or_else(|| anyhow!("cannot determine home directory; pass --db-path"))
}

fn open_store(scope: &LibraryScope, args: &StoreArgs) -> Result<(Box<dyn RecordStore>, StoreKind)> {
    if let Some(path) = &args.db_path {
        let library = SqliteLibrary::open(path, scope)?;
        info!(path = %path.display(), library_id = library.library_id(), "using local database");
        return Ok((Box::new(library), StoreKind::Sqlite));
    }

    let api_key = args
        .api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("an API key is required when no --db-path is given"))?;
    let config = ApiConfig::new(api_key)
        .with_base_url(args.api_base.clone())
        .with_timeout(Duration::from_secs(args.timeout_secs));
    let library = ApiLibrary::new(&config, scope);
    info!(base = library.base_url(), "using web API");
    Ok((Box::new(library), StoreKind::Api))
}

fn run_export(args: &ExportArgs) -> Result<()> {
    let scope = args.library.scope()?;
    let db_path = match &args.db_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    let library = SqliteLibrary::open(&db_path, &scope)?;
    let entries = library.export_entries()?;
    let summary = export::write_export(&entries, &args.out_csv, args.dedupe)?;

    emit_json(serde_json::json!({
        "command": "export",
        "out_csv": display_path(&args.out_csv),
        "entries": entries.len(),
        "rows": summary.rows,
        "duplicates": summary.duplicates,
        "dedupe": args.dedupe
    }))
}

fn run_import(args: &ImportArgs) -> Result<()> {
    let options = SyncOptions::new(args.fuzzy_threshold, args.store.dry_run)?;
    let scope = args.library.scope()?;
    let rows = input::read_decision_rows(&args.asr_csv)?;
    let (mut store, kind) = open_store(&scope, &args.store)?;

    let report = Reconciler::new(store.as_mut(), options).apply_decisions(&rows);

    emit_json(serde_json::json!({
        "command": "import",
        "store": kind.as_str(),
        "dry_run": options.dry_run(),
        "rows": rows.len(),
        "updated": report.updated,
        "not_found": report.not_found,
        "errors": report.errors
    }))
}

fn run_clean(args: &CleanArgs) -> Result<()> {
    let options = SyncOptions::new(DEFAULT_FUZZY_THRESHOLD, args.store.dry_run)?;
    let scope = args.library.scope()?;
    let (mut store, kind) = open_store(&scope, &args.store)?;

    let report = Reconciler::new(store.as_mut(), options)
        .clean()
        .context("failed to list review-tagged records")?;

    emit_json(serde_json::json!({
        "command": "clean",
        "store": kind.as_str(),
        "dry_run": options.dry_run(),
        "removed": report.removed,
        "errors": report.errors
    }))
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
