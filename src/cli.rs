use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Bulk import of clients and energy contracts into a relational store",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a CSV, TSV or Excel file of clients and contracts
    Import(ImportArgs),
    /// List the columns the importer sees for a target table
    Columns(ColumnsArgs),
    /// List the record types the importer recognises
    Types,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// File to import (.csv, .tsv, .txt, .xls, .xlsx)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// SQLite database holding the target tables
    #[arg(long)]
    pub db: PathBuf,
    /// YAML file with table names and default options
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Run every row, then roll the whole import back
    #[arg(long)]
    pub dry_run: bool,
    /// Rows between progress updates (clamped to 1..=1000)
    #[arg(long)]
    pub batch_size: Option<i64>,
    /// Skip tax code, VAT and e-mail checks
    #[arg(long)]
    pub skip_validation: bool,
    /// Do not link records to agents
    #[arg(long)]
    pub skip_association: bool,
    /// Classify rows by their type column only
    #[arg(long)]
    pub no_auto_detect: bool,
    /// Options as a JSON object, e.g. '{"dryRun":true,"batchSize":50}'
    #[arg(long, conflicts_with_all = ["dry_run", "batch_size", "skip_validation", "skip_association", "no_auto_detect"])]
    pub options: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Print the final result as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// SQLite database to inspect
    #[arg(long)]
    pub db: PathBuf,
    /// Table to describe; all configured target tables when omitted
    #[arg(short, long)]
    pub table: Option<String>,
    /// YAML file with table names
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
