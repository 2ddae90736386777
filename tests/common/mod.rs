#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use energy_import::{
    config::ImportConfig,
    job::{ImportJob, ImportOptions},
    service::ImportService,
    store::sqlite::SqliteStoreFactory,
};
use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

/// Target tables as a current deployment declares them.
pub const MODERN_SCHEMA: &str = "
CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    nome TEXT,
    cognome TEXT,
    email TEXT
);
CREATE TABLE clienti_privati (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nome TEXT,
    cognome TEXT,
    codice_fiscale TEXT,
    email TEXT,
    telefono TEXT,
    data_nascita DATE,
    agente_id INTEGER,
    tipo_cliente TEXT,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE clienti_aziende (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ragione_sociale TEXT,
    partita_iva TEXT,
    email TEXT,
    pec TEXT,
    agente_id INTEGER,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE contratti_luce (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cliente_id INTEGER,
    numero_contratto TEXT,
    pod TEXT,
    fornitore TEXT,
    data_attivazione DATE,
    data_scadenza DATE,
    prezzo REAL,
    agente_id INTEGER,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE contratti_gas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cliente_id INTEGER,
    numero_contratto TEXT,
    pdr TEXT,
    fornitore TEXT,
    data_attivazione DATE,
    data_scadenza DATE,
    prezzo REAL,
    agente_id INTEGER,
    created_at TEXT,
    updated_at TEXT
);
INSERT INTO users (id, nome, cognome, email) VALUES
    (7, 'Maria', 'Rossi', 'maria.rossi@agenzia.it'),
    (8, 'Luca', 'Bianchi', 'luca.bianchi@agenzia.it');
";

/// Older deployment: text keys and mandatory contract columns without defaults.
pub const LEGACY_SCHEMA: &str = "
CREATE TABLE users (id INTEGER PRIMARY KEY, first_name TEXT, last_name TEXT, email TEXT);
CREATE TABLE clienti_privati (
    id TEXT PRIMARY KEY,
    nome TEXT,
    cognome TEXT,
    codice_fiscale TEXT NOT NULL,
    email TEXT
);
CREATE TABLE clienti_aziende (
    id TEXT PRIMARY KEY,
    ragione_sociale TEXT NOT NULL,
    partita_iva TEXT
);
CREATE TABLE contratti_luce (
    id TEXT PRIMARY KEY,
    cliente_id TEXT NOT NULL,
    numero_contratto TEXT NOT NULL,
    pod TEXT NOT NULL,
    fornitore TEXT NOT NULL,
    data_attivazione DATE,
    data_scadenza DATE NOT NULL,
    prezzo REAL NOT NULL
);
CREATE TABLE contratti_gas (
    id TEXT PRIMARY KEY,
    cliente_id TEXT NOT NULL,
    numero_contratto TEXT NOT NULL,
    pdr TEXT NOT NULL,
    fornitore TEXT NOT NULL,
    data_scadenza DATE NOT NULL,
    prezzo REAL NOT NULL
);
";

/// Scratch directory holding one SQLite database and the files to import.
pub struct TestDatabase {
    temp_dir: TempDir,
    db_path: PathBuf,
}

impl TestDatabase {
    pub fn new(schema: &str) -> Self {
        let temp_dir = tempdir().expect("temp dir");
        let db_path = temp_dir.path().join("crm.db");
        let conn = Connection::open(&db_path).expect("open database");
        conn.execute_batch(schema).expect("create schema");
        Self { temp_dir, db_path }
    }

    pub fn modern() -> Self {
        Self::new(MODERN_SCHEMA)
    }

    pub fn legacy() -> Self {
        Self::new(LEGACY_SCHEMA)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn connection(&self) -> Connection {
        Connection::open(&self.db_path).expect("open database")
    }

    /// Writes `contents` into a file next to the database and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn service(&self) -> ImportService {
        ImportService::new(
            Arc::new(SqliteStoreFactory::new(self.db_path.clone())),
            ImportConfig::default(),
        )
    }

    pub fn import(&self, file_name: &str, contents: &str, options: ImportOptions) -> ImportJob {
        self.import_bytes(file_name, contents.as_bytes(), options)
    }

    pub fn import_bytes(&self, file_name: &str, bytes: &[u8], options: ImportOptions) -> ImportJob {
        self.service()
            .import_blocking(file_name, bytes, options, None)
            .expect("job exists")
    }

    pub fn count(&self, table: &str) -> i64 {
        self.connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count rows")
    }
}

pub fn dry_run() -> ImportOptions {
    ImportOptions {
        dry_run: true,
        ..ImportOptions::default()
    }
}
