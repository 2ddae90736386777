//! Query/transaction interface consumed by the importer.
//!
//! The importer never assumes a static schema: it asks the store for the
//! columns of each target table and builds statements from that set only.

pub mod sqlite;

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    data::{Row, Value},
    error::StoreError,
};

pub use sqlite::{SqliteStore, SqliteStoreFactory};

/// A column as reported by the live schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub has_default: bool,
}

impl ColumnInfo {
    /// NOT NULL without a default: an insert must supply a value.
    pub fn requires_value(&self) -> bool {
        self.not_null && !self.has_default && !self.primary_key
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: usize,
    pub last_insert_id: Option<i64>,
}

/// How positional parameters are spelled in SQL text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?1`, `?2`, ... (SQLite)
    #[default]
    Numbered,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl PlaceholderStyle {
    /// Renders the placeholder for the 1-based parameter `index`.
    pub fn render(self, index: usize) -> String {
        match self {
            PlaceholderStyle::Numbered => format!("?{index}"),
            PlaceholderStyle::Dollar => format!("${index}"),
        }
    }
}

pub trait Store {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    fn savepoint(&mut self, name: &str) -> Result<(), StoreError>;
    fn release(&mut self, name: &str) -> Result<(), StoreError>;
    fn rollback_to(&mut self, name: &str) -> Result<(), StoreError>;

    /// Runs a statement with positional parameters and returns all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError>;

    /// Runs a statement with `:name` parameters and returns all rows.
    fn query_named(&mut self, sql: &str, params: &[(&str, Value)])
    -> Result<Vec<Row>, StoreError>;

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome, StoreError>;

    /// Columns of `table` in declaration order; empty when the table is absent.
    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, StoreError>;

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

/// Opens one store per import job.
pub trait StoreFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn Store + Send>, StoreError>;
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    if identifier_regex().is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Double-quotes an identifier that has already passed [`validate_identifier`].
pub fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}
