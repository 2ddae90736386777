pub mod classify;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod fallback;
pub mod job;
pub mod normalize;
pub mod orchestrator;
pub mod parser;
pub mod query;
pub mod record;
pub mod report;
pub mod resolve;
pub mod schema;
pub mod service;
pub mod store;
pub mod upsert;
pub mod validate;

use std::{
    env, fs,
    path::Path,
    sync::{Arc, OnceLock},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    classify::RecordKind,
    cli::{Cli, ColumnsArgs, Commands, ImportArgs},
    config::ImportConfig,
    job::{ImportOptions, ImportStage},
    schema::TargetColumnSet,
    service::ImportService,
    store::sqlite::{SqliteStore, SqliteStoreFactory},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("energy_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Columns(args) => handle_columns(&args),
        Commands::Types => {
            for kind in service::supported_types() {
                println!("{}\t{}", kind.id, kind.label);
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ImportConfig> {
    match path {
        Some(path) => ImportConfig::load(path),
        None => Ok(ImportConfig::default()),
    }
}

fn resolve_options(args: &ImportArgs, config: &ImportConfig) -> Result<ImportOptions> {
    if let Some(json) = &args.options {
        return ImportOptions::from_json(json).context("Parsing --options JSON");
    }
    let mut options = config.options;
    options.dry_run |= args.dry_run;
    options.skip_validation |= args.skip_validation;
    options.skip_association |= args.skip_association;
    if args.no_auto_detect {
        options.auto_detect_type = false;
    }
    if let Some(batch_size) = args.batch_size {
        options = options.with_batch_size(batch_size);
    }
    Ok(options)
}

fn handle_import(args: &ImportArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let options = resolve_options(args, &config)?;
    debug!("Import options: {options:?}");
    info!(
        "Importing '{}' into {:?}{}",
        args.input.display(),
        args.db,
        args.delimiter
            .map(|d| format!(" with delimiter '{}'", printable_delimiter(d)))
            .unwrap_or_default()
    );

    let bytes =
        fs::read(&args.input).with_context(|| format!("Reading input file {:?}", args.input))?;
    let file_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.display().to_string());

    let service = ImportService::new(Arc::new(SqliteStoreFactory::new(args.db.clone())), config);
    let job = service.import_blocking(&file_name, &bytes, options, args.delimiter)?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&job.result).context("Serializing import result")?;
        println!("{rendered}");
    } else {
        print!("{}", report::render_result(&job));
    }

    if job.progress.stage == ImportStage::Failed {
        return Err(anyhow!("Import failed: {}", job.progress.message));
    }
    info!(
        "Import {} finished: {} inserted, {} updated, {} error(s)",
        job.id,
        job.result.inserted.total(),
        job.result.updated.total(),
        job.result.errors.len()
    );
    Ok(())
}

fn handle_columns(args: &ColumnsArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut store =
        SqliteStore::open(&args.db).with_context(|| format!("Opening database {:?}", args.db))?;
    let tables = match &args.table {
        Some(table) => vec![table.clone()],
        None => RecordKind::SUPPORTED
            .iter()
            .filter_map(|kind| config.tables.for_kind(*kind))
            .chain([config.tables.users.as_str()])
            .map(str::to_string)
            .collect(),
    };
    let mut first = true;
    for table in tables {
        let set = TargetColumnSet::introspect(&mut store, &table)
            .with_context(|| format!("Reading columns of '{table}'"))?;
        if !first {
            println!();
        }
        first = false;
        match set {
            Some(set) => print!("{}", report::render_columns(set.table(), set.columns())),
            None => println!("{table}\n(table not found)"),
        }
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
