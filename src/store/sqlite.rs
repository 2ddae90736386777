use std::path::{Path, PathBuf};

use log::debug;
use rusqlite::{
    Connection, ToSql, params_from_iter,
    types::{Value as SqliteValue, ValueRef},
};

use super::{ColumnInfo, ExecOutcome, Store, StoreFactory, quote_identifier, validate_identifier};
use crate::{
    data::{Row, Value},
    error::StoreError,
};

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn run(&mut self, statement: &str) -> Result<(), StoreError> {
        debug!("sqlite: {statement}");
        self.conn.execute_batch(statement)?;
        Ok(())
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Integer(i) => SqliteValue::Integer(*i),
        Value::Real(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn read_rows(rows: &mut rusqlite::Rows<'_>, columns: &[String]) -> Result<Vec<Row>, StoreError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(from_sqlite(row.get_ref(idx)?));
        }
        out.push(Row::new(columns.to_vec(), values));
    }
    Ok(out)
}

impl Store for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.run("BEGIN")
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.run("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.run("ROLLBACK")
    }

    fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let name = quote_identifier(validate_identifier(name)?);
        self.run(&format!("SAVEPOINT {name}"))
    }

    fn release(&mut self, name: &str) -> Result<(), StoreError> {
        let name = quote_identifier(validate_identifier(name)?);
        self.run(&format!("RELEASE SAVEPOINT {name}"))
    }

    fn rollback_to(&mut self, name: &str) -> Result<(), StoreError> {
        let name = quote_identifier(validate_identifier(name)?);
        self.run(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        debug!("sqlite query: {sql} {params:?}");
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite)))?;
        read_rows(&mut rows, &columns)
    }

    fn query_named(
        &mut self,
        sql: &str,
        params: &[(&str, Value)],
    ) -> Result<Vec<Row>, StoreError> {
        debug!("sqlite query: {sql} {params:?}");
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let values = params
            .iter()
            .map(|(_, value)| to_sqlite(value))
            .collect::<Vec<_>>();
        let named = params
            .iter()
            .zip(values.iter())
            .map(|((name, _), value)| (*name, value as &dyn ToSql))
            .collect::<Vec<_>>();
        let mut rows = stmt.query(named.as_slice())?;
        read_rows(&mut rows, &columns)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome, StoreError> {
        debug!("sqlite execute: {sql} {params:?}");
        let mut stmt = self.conn.prepare(sql)?;
        let rows_affected = stmt.execute(params_from_iter(params.iter().map(to_sqlite)))?;
        Ok(ExecOutcome {
            rows_affected,
            last_insert_id: Some(self.conn.last_insert_rowid()),
        })
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let table = quote_identifier(validate_identifier(table)?);
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get::<_, String>("name")?,
                    sql_type: row.get::<_, Option<String>>("type")?.unwrap_or_default(),
                    not_null: row.get::<_, i64>("notnull")? != 0,
                    primary_key: row.get::<_, i64>("pk")? != 0,
                    has_default: row.get::<_, Option<String>>("dflt_value")?.is_some(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }
}

/// Opens a fresh connection to the same SQLite file for every job.
#[derive(Debug, Clone)]
pub struct SqliteStoreFactory {
    path: PathBuf,
}

impl SqliteStoreFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreFactory for SqliteStoreFactory {
    fn open(&self) -> Result<Box<dyn Store + Send>, StoreError> {
        let store = SqliteStore::open(&self.path)
            .map_err(|err| StoreError::Open(format!("{}: {err}", self.path.display())))?;
        Ok(Box::new(store))
    }
}
