//! Live-schema introspection.
//!
//! A [`TargetColumnSet`] is the allowlist of columns a dynamic statement may
//! reference for one table. It is computed fresh for every job; a column that
//! is absent from the set is skipped by callers, never treated as an error.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    error::StoreError,
    normalize::TypeFamily,
    store::{ColumnInfo, Store, validate_identifier},
};

#[derive(Debug, Clone)]
pub struct TargetColumnSet {
    table: String,
    columns: Vec<ColumnInfo>,
}

impl TargetColumnSet {
    /// Introspects `table`. Returns `Ok(None)` when the table does not exist.
    pub fn introspect(store: &mut dyn Store, table: &str) -> Result<Option<Self>, StoreError> {
        validate_identifier(table)?;
        let columns = store.table_columns(table)?;
        if columns.is_empty() {
            debug!("Table '{table}' not present in live schema");
            return Ok(None);
        }
        for column in &columns {
            validate_identifier(&column.name)?;
        }
        debug!(
            "Table '{table}' exposes {} column(s): {}",
            columns.len(),
            columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Some(Self {
            table: table.to_string(),
            columns,
        }))
    }

    pub fn from_columns(table: &str, columns: Vec<ColumnInfo>) -> Result<Self, StoreError> {
        validate_identifier(table)?;
        for column in &columns {
            validate_identifier(&column.name)?;
        }
        Ok(Self {
            table: table.to_string(),
            columns,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// First column among `candidates` present in the table.
    pub fn first_present(&self, candidates: &[&str]) -> Option<&ColumnInfo> {
        candidates.iter().find_map(|name| self.column(name))
    }

    /// The declared primary key, falling back to a column named `id`.
    pub fn primary_key(&self) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .or_else(|| self.column("id"))
    }

    /// True when new rows need an application-generated id.
    pub fn key_is_textual(&self) -> bool {
        self.primary_key()
            .is_some_and(|pk| TypeFamily::of(&pk.sql_type).is_textual() && !pk.sql_type.is_empty())
    }
}

/// Column names present in `table`.
pub fn columns_of(store: &mut dyn Store, table: &str) -> Result<BTreeSet<String>, StoreError> {
    Ok(TargetColumnSet::introspect(store, table)?
        .map(|set| set.columns.into_iter().map(|c| c.name).collect())
        .unwrap_or_default())
}

/// Column names of `table` mapped to their declared SQL type.
pub fn column_types_of(
    store: &mut dyn Store,
    table: &str,
) -> Result<BTreeMap<String, String>, StoreError> {
    Ok(TargetColumnSet::introspect(store, table)?
        .map(|set| {
            set.columns
                .into_iter()
                .map(|c| (c.name, c.sql_type))
                .collect()
        })
        .unwrap_or_default())
}
