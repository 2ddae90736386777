mod common;

use common::{TestDatabase, dry_run};
use energy_import::{
    classify::RecordKind,
    config::ImportConfig,
    job::{ImportJob, ImportOptions, ImportStage, InMemoryJobStore, JobStore},
    orchestrator::Importer,
    parser::parse,
    store::sqlite::SqliteStore,
    upsert::UpsertAction,
};
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook, XlsxError};

const PRIVATE_CLIENTS: &str = "\
tipo_record;nome;cognome;codice_fiscale;email_principale;telefono
privato;Mario;Rossi;RSSMRA85T10A562S;mario.rossi@example.it;3331234567
privato;Giuseppe;Verdi;VRDGPP80A01H501U;g.verdi@example.it;
";

const MIXED: &str = "\
tipo,nome,cognome,codice_fiscale,ragione_sociale,partita_iva,numero_contratto,pod,pdr,fornitore,data_attivazione,prezzo
privato,Mario,Rossi,RSSMRA85T10A562S,,,,,,,,
azienda,,,,Acme Srl,12345678903,,,,,,
luce,,,RSSMRA85T10A562S,,,L-001,IT001E12345678,,Enel,01/02/2024,\"0,1234\"
gas,,,,Acme Srl,12345678903,G-001,,01234567890123,Eni,15/03/2024,\"0,95\"
";

fn kinds_and_actions(job: &ImportJob) -> Vec<(usize, RecordKind, UpsertAction)> {
    job.result
        .rows
        .iter()
        .map(|row| (row.row, row.kind, row.action))
        .collect()
}

#[test]
fn private_clients_are_inserted() {
    let db = TestDatabase::modern();
    let job = db.import("clienti.csv", PRIVATE_CLIENTS, ImportOptions::default());

    assert_eq!(job.progress.stage, ImportStage::Completed);
    assert_eq!(job.progress.progress, 100);
    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert_eq!(job.result.total_rows, 2);
    assert_eq!(job.result.processed, 2);
    assert_eq!(job.result.inserted.clienti_privati, 2);
    assert_eq!(job.result.updated.total(), 0);
    assert_eq!(db.count("clienti_privati"), 2);

    let (tax_code, client_type, created): (String, String, Option<String>) = db
        .connection()
        .query_row(
            "SELECT codice_fiscale, tipo_cliente, created_at FROM clienti_privati WHERE cognome = 'Rossi'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("stored client");
    assert_eq!(tax_code, "RSSMRA85T10A562S");
    assert_eq!(client_type, "privato");
    assert!(created.is_some());
}

#[test]
fn mixed_file_links_contracts_to_clients() {
    let db = TestDatabase::modern();
    let job = db.import("mixed.csv", MIXED, ImportOptions::default());

    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert_eq!(job.result.inserted.clienti_privati, 1);
    assert_eq!(job.result.inserted.clienti_aziende, 1);
    assert_eq!(job.result.inserted.contratti_luce, 1);
    assert_eq!(job.result.inserted.contratti_gas, 1);

    let conn = db.connection();
    let (client_id, activation): (i64, String) = conn
        .query_row(
            "SELECT cliente_id, data_attivazione FROM contratti_luce WHERE numero_contratto = 'L-001'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("electricity contract");
    let rossi: i64 = conn
        .query_row(
            "SELECT id FROM clienti_privati WHERE codice_fiscale = 'RSSMRA85T10A562S'",
            [],
            |row| row.get(0),
        )
        .expect("client");
    assert_eq!(client_id, rossi);
    assert_eq!(activation, "2024-02-01");

    let (gas_owner, price): (i64, f64) = conn
        .query_row(
            "SELECT cliente_id, prezzo FROM contratti_gas WHERE pdr = '01234567890123'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("gas contract");
    let acme: i64 = conn
        .query_row("SELECT id FROM clienti_aziende", [], |row| row.get(0))
        .expect("company");
    assert_eq!(gas_owner, acme);
    assert!((price - 0.95).abs() < f64::EPSILON);
}

#[test]
fn contract_without_client_data_is_a_row_error() {
    let db = TestDatabase::modern();
    let job = db.import(
        "contratti.csv",
        "pod,numero_contratto\nIT001E12345678,C-1\n",
        ImportOptions::default(),
    );

    assert_eq!(job.progress.stage, ImportStage::Completed);
    assert!(!job.result.success);
    assert_eq!(job.result.processed, 1);
    assert_eq!(job.result.errors.len(), 1);
    assert_eq!(job.result.errors[0].row, 1);
    assert!(job.result.errors[0].error.contains("client"));
    assert_eq!(job.result.inserted.total(), 0);
    assert_eq!(db.count("contratti_luce"), 0);
}

fn spreadsheet_upload() -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("dd/mm/yyyy");

    let sheet = workbook.add_worksheet();
    sheet.set_name("Clienti")?;
    let headers = [
        "Tipo",
        "Codice Fiscale",
        "Nome",
        "Cognome",
        "Telefono",
        "Data Nascita",
        "Numero Contratto",
        "POD",
        "Fornitore",
        "Data Attivazione",
        "Prezzo",
    ];
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }

    sheet.write_string(1, 0, "privato")?;
    sheet.write_string(1, 1, "RSSMRA85T10A562S")?;
    sheet.write_string(1, 2, "Mario")?;
    sheet.write_string(1, 3, "Rossi")?;
    sheet.write_number(1, 4, 3331234567.0)?;
    sheet.write_datetime_with_format(1, 5, &ExcelDateTime::from_ymd(1985, 12, 10)?, &date_format)?;

    // Row 2 stays blank.
    sheet.write_string(3, 0, "luce")?;
    sheet.write_string(3, 1, "RSSMRA85T10A562S")?;
    sheet.write_string(3, 6, "L-100")?;
    sheet.write_string(3, 7, "IT001E12345678")?;
    sheet.write_string(3, 8, "Enel")?;
    sheet.write_datetime_with_format(3, 9, &ExcelDateTime::from_ymd(2024, 3, 5)?, &date_format)?;
    sheet.write_number(3, 10, 0.1234)?;

    let other = workbook.add_worksheet();
    other.set_name("Note")?;
    other.write_string(0, 0, "Tipo")?;
    other.write_string(1, 0, "gas")?;

    workbook.save_to_buffer()
}

#[test]
fn spreadsheet_first_sheet_is_imported() {
    let bytes = spreadsheet_upload().expect("build workbook");

    let table = parse(&bytes, "clienti.xlsx").expect("parse workbook");
    assert_eq!(table.len(), 2);
    assert_eq!(table.headers[1], "codice_fiscale");
    assert_eq!(table.records[0].get("telefono"), Some("3331234567"));
    assert_eq!(table.records[0].get("data_nascita"), Some("1985-12-10"));
    assert_eq!(table.records[1].get("nome"), Some(""));
    assert_eq!(table.records[1].get("data_attivazione"), Some("2024-03-05"));

    let db = TestDatabase::modern();
    let job = db.import_bytes("clienti.xlsx", &bytes, ImportOptions::default());
    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert_eq!(job.result.total_rows, 2);
    assert_eq!(job.result.inserted.clienti_privati, 1);
    assert_eq!(job.result.inserted.contratti_luce, 1);
    assert_eq!(db.count("contratti_gas"), 0);

    let conn = db.connection();
    let (phone, born): (String, String) = conn
        .query_row(
            "SELECT telefono, data_nascita FROM clienti_privati",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("client");
    assert_eq!(phone, "3331234567");
    assert_eq!(born, "1985-12-10");
    let (activation, price): (String, f64) = conn
        .query_row(
            "SELECT data_attivazione, prezzo FROM contratti_luce WHERE numero_contratto = 'L-100'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("contract");
    assert_eq!(activation, "2024-03-05");
    assert!((price - 0.1234).abs() < f64::EPSILON);
}

#[test]
fn contract_row_creates_missing_owner() {
    let db = TestDatabase::modern();
    let job = db.import(
        "contratti.csv",
        "tipo;numero_contratto;pod;codice_fiscale;nome;cognome\nluce;L-9;IT001E87654321;BNCLRA90C45F205Z;Laura;Bianchi\n",
        ImportOptions::default(),
    );

    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert_eq!(job.result.inserted.contratti_luce, 1);
    assert_eq!(job.result.inserted.clienti_privati, 1);
    let owner = job.result.rows[0].owner.as_ref().expect("owner created");
    assert_eq!(owner.kind, RecordKind::ClientPrivate);
    assert_eq!(owner.action, UpsertAction::Inserted);
    assert_eq!(db.count("clienti_privati"), 1);
}

#[test]
fn company_owner_falls_back_to_the_only_client_table() {
    let db = TestDatabase::new(
        "CREATE TABLE clienti_privati (id INTEGER PRIMARY KEY, codice_fiscale TEXT, ragione_sociale TEXT, partita_iva TEXT);
         CREATE TABLE contratti_gas (id INTEGER PRIMARY KEY, cliente_id INTEGER, numero_contratto TEXT, pdr TEXT, fornitore TEXT);",
    );
    let job = db.import(
        "contratti.csv",
        "tipo;numero_contratto;pdr;fornitore;ragione_sociale;partita_iva\ngas;G-7;01234567890123;Eni;Acme Srl;12345678903\n",
        ImportOptions::default(),
    );

    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert_eq!(job.result.inserted.contratti_gas, 1);
    let owner = job.result.rows[0].owner.as_ref().expect("owner created");
    assert_eq!(owner.kind, RecordKind::ClientPrivate);
    let conn = db.connection();
    let (client_id, vat): (i64, String) = conn
        .query_row("SELECT id, partita_iva FROM clienti_privati", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .expect("owner row");
    assert_eq!(vat, "12345678903");
    let linked: i64 = conn
        .query_row("SELECT cliente_id FROM contratti_gas", [], |row| row.get(0))
        .expect("contract");
    assert_eq!(linked, client_id);
}

#[test]
fn failing_row_leaves_no_partial_writes() {
    let db = TestDatabase::modern();
    let job = db.import(
        "mixed.csv",
        "tipo;codice_fiscale;nome;cognome\nprivato;RSSMRA85T10A562X;Mario;Rossi\nprivato;VRDGPP80A01H501U;Giuseppe;Verdi\n",
        ImportOptions::default(),
    );

    assert_eq!(job.result.processed, 2);
    assert_eq!(job.result.errors.len(), 1);
    assert_eq!(job.result.errors[0].row, 1);
    assert_eq!(job.result.inserted.clienti_privati, 1);
    assert_eq!(db.count("clienti_privati"), 1);
}

#[test]
fn second_import_of_same_file_updates() {
    let db = TestDatabase::modern();
    let first = db.import("mixed.csv", MIXED, ImportOptions::default());
    assert_eq!(first.result.inserted.total(), 4);

    let second = db.import("mixed.csv", MIXED, ImportOptions::default());
    assert!(second.result.success, "errors: {:?}", second.result.errors);
    assert_eq!(second.result.inserted.total(), 0);
    assert_eq!(second.result.updated.total(), 4);
    assert!(
        second
            .result
            .rows
            .iter()
            .all(|row| row.action == UpsertAction::Updated && row.owner.is_none())
    );
    assert_eq!(db.count("clienti_privati"), 1);
    assert_eq!(db.count("contratti_luce"), 1);
    assert_eq!(db.count("contratti_gas"), 1);
}

#[test]
fn dry_run_reports_the_same_outcome_and_saves_nothing() {
    let preview_db = TestDatabase::modern();
    let preview = preview_db.import("mixed.csv", MIXED, dry_run());
    assert!(preview.result.dry_run);
    assert_eq!(preview.progress.stage, ImportStage::Completed);
    assert_eq!(preview_db.count("clienti_privati"), 0);
    assert_eq!(preview_db.count("clienti_aziende"), 0);
    assert_eq!(preview_db.count("contratti_luce"), 0);
    assert_eq!(preview_db.count("contratti_gas"), 0);

    let real_db = TestDatabase::modern();
    let real = real_db.import("mixed.csv", MIXED, ImportOptions::default());
    assert_eq!(preview.result.inserted, real.result.inserted);
    assert_eq!(preview.result.updated, real.result.updated);
    assert_eq!(kinds_and_actions(&preview), kinds_and_actions(&real));
}

#[test]
fn agent_name_links_client_to_user() {
    let db = TestDatabase::modern();
    let job = db.import(
        "clienti.csv",
        "codice_fiscale,nome,cognome,agente\nRSSMRA85T10A562S,Mario,Rossi,Maria Rossi\n",
        ImportOptions::default(),
    );

    assert!(job.result.success, "errors: {:?}", job.result.errors);
    let agent: Option<i64> = db
        .connection()
        .query_row("SELECT agente_id FROM clienti_privati", [], |row| row.get(0))
        .expect("client");
    assert_eq!(agent, Some(7));
}

#[test]
fn homonymous_agents_are_not_linked() {
    let db = TestDatabase::modern();
    db.connection()
        .execute(
            "INSERT INTO users (id, nome, cognome, email) VALUES (9, 'Maria', 'Rossi', 'm.rossi@agenzia.it')",
            [],
        )
        .expect("second agent");
    let job = db.import(
        "clienti.csv",
        "codice_fiscale,nome,cognome,agente\nRSSMRA85T10A562S,Mario,Rossi,Maria Rossi\n",
        ImportOptions::default(),
    );

    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert!(
        job.result
            .warnings
            .contains(&"row 1: agent name 'Maria Rossi' matches 2 users".to_string()),
        "{:?}",
        job.result.warnings
    );
    let agent: Option<i64> = db
        .connection()
        .query_row("SELECT agente_id FROM clienti_privati", [], |row| row.get(0))
        .expect("client");
    assert_eq!(agent, None);
}

#[test]
fn agent_email_and_split_name_columns_resolve() {
    let db = TestDatabase::modern();
    let job = db.import(
        "clienti.csv",
        "codice_fiscale;agente_email\nRSSMRA85T10A562S;LUCA.BIANCHI@agenzia.it\n",
        ImportOptions::default(),
    );
    assert!(job.result.warnings.is_empty(), "{:?}", job.result.warnings);

    let second = db.import(
        "clienti.csv",
        "codice_fiscale;agente_nome;agente_cognome\nVRDGPP80A01H501U;Maria;Rossi\n",
        ImportOptions::default(),
    );
    assert!(second.result.warnings.is_empty(), "{:?}", second.result.warnings);

    let conn = db.connection();
    let agents = conn
        .prepare("SELECT agente_id FROM clienti_privati ORDER BY id")
        .expect("prepare")
        .query_map([], |row| row.get::<_, Option<i64>>(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows");
    assert_eq!(agents, vec![Some(8), Some(7)]);
}

#[test]
fn unknown_agent_warns_and_row_still_applies() {
    let db = TestDatabase::modern();
    let job = db.import(
        "clienti.csv",
        "codice_fiscale,nome,cognome,agente_nome\nRSSMRA85T10A562S,Mario,Rossi,Paolo Neri\n",
        ImportOptions::default(),
    );

    assert!(job.result.success);
    assert_eq!(job.result.inserted.clienti_privati, 1);
    assert_eq!(job.result.warnings, vec!["row 1: agent 'Paolo Neri' not found".to_string()]);
    let agent: Option<i64> = db
        .connection()
        .query_row("SELECT agente_id FROM clienti_privati", [], |row| row.get(0))
        .expect("client");
    assert_eq!(agent, None);
}

#[test]
fn skip_association_ignores_agents() {
    let db = TestDatabase::modern();
    let options = ImportOptions {
        skip_association: true,
        ..ImportOptions::default()
    };
    let job = db.import(
        "clienti.csv",
        "codice_fiscale,agente_nome\nRSSMRA85T10A562S,Paolo Neri\n",
        options,
    );
    assert!(job.result.success);
    assert!(job.result.warnings.is_empty());
}

#[test]
fn skip_validation_accepts_bad_tax_code() {
    let db = TestDatabase::modern();
    let file = "codice_fiscale,nome\nRSSMRA85T10A562X,Mario\n";

    let strict = db.import("clienti.csv", file, dry_run());
    assert_eq!(strict.result.errors.len(), 1);

    let lenient = db.import(
        "clienti.csv",
        file,
        ImportOptions {
            skip_validation: true,
            ..ImportOptions::default()
        },
    );
    assert!(lenient.result.success);
    assert_eq!(db.count("clienti_privati"), 1);
}

#[test]
fn email_owned_by_another_client_is_dropped_with_warning() {
    let db = TestDatabase::modern();
    let job = db.import(
        "clienti.csv",
        "codice_fiscale,email\n\
         RSSMRA85T10A562S,mario@example.it\n\
         VRDGPP80A01H501U,giuseppe@example.it\n\
         VRDGPP80A01H501U,mario@example.it\n",
        ImportOptions::default(),
    );

    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert_eq!(job.result.inserted.clienti_privati, 2);
    assert_eq!(job.result.updated.clienti_privati, 1);
    assert_eq!(job.result.warnings.len(), 1);
    assert!(job.result.warnings[0].starts_with("row 3:"));
    let email: String = db
        .connection()
        .query_row(
            "SELECT email FROM clienti_privati WHERE codice_fiscale = 'VRDGPP80A01H501U'",
            [],
            |row| row.get(0),
        )
        .expect("client");
    assert_eq!(email, "giuseppe@example.it");
}

#[test]
fn unclassifiable_rows_are_skipped_with_warning() {
    let db = TestDatabase::modern();
    let job = db.import(
        "misc.csv",
        "colore,taglia\nrosso,M\n",
        ImportOptions::default(),
    );
    assert!(job.result.success);
    assert_eq!(job.result.processed, 1);
    assert_eq!(job.result.inserted.total(), 0);
    assert_eq!(job.result.warnings.len(), 1);
}

#[test]
fn legacy_schema_gets_contract_defaults() {
    let db = TestDatabase::legacy();
    let job = db.import(
        "contratti.csv",
        "tipo;codice_fiscale;pod;data_attivazione\nluce;RSSMRA85T10A562S;IT001E12345678;01/02/2024\n",
        ImportOptions::default(),
    );

    assert!(job.result.success, "errors: {:?}", job.result.errors);
    assert_eq!(job.result.inserted.contratti_luce, 1);
    assert_eq!(job.result.inserted.clienti_privati, 1);
    assert!(job.result.warnings.len() >= 4, "{:?}", job.result.warnings);

    let (id, number, supplier, expiry, price): (String, String, String, String, f64) = db
        .connection()
        .query_row(
            "SELECT id, numero_contratto, fornitore, data_scadenza, prezzo FROM contratti_luce",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .expect("contract");
    assert_eq!(id.len(), 36);
    assert_eq!(number, "CTR-IT001E12345678");
    assert_eq!(supplier, "unspecified");
    assert_eq!(expiry, "2024-02-01");
    assert_eq!(price, 0.0);
}

#[test]
fn textual_and_integer_keys_are_both_returned() {
    let legacy = TestDatabase::legacy();
    let job = legacy.import(
        "clienti.csv",
        "codice_fiscale\nRSSMRA85T10A562S\n",
        ImportOptions::default(),
    );
    let id = &job.result.rows[0].id;
    assert_eq!(id.len(), 36);
    let stored: String = legacy
        .connection()
        .query_row("SELECT id FROM clienti_privati", [], |row| row.get(0))
        .expect("client");
    assert_eq!(&stored, id);

    let modern = TestDatabase::modern();
    let job = modern.import(
        "clienti.csv",
        "codice_fiscale\nRSSMRA85T10A562S\n",
        ImportOptions::default(),
    );
    assert_eq!(job.result.rows[0].id, "1");
}

#[test]
fn missing_target_table_fails_rows_of_that_kind() {
    let db = TestDatabase::new(
        "CREATE TABLE clienti_privati (id INTEGER PRIMARY KEY, codice_fiscale TEXT);",
    );
    let job = db.import(
        "mixed.csv",
        "codice_fiscale,pdr,numero_contratto\nRSSMRA85T10A562S,,\nRSSMRA85T10A562S,01234567890123,G-1\n",
        ImportOptions::default(),
    );
    assert_eq!(job.progress.stage, ImportStage::Completed);
    assert_eq!(job.result.inserted.clienti_privati, 1);
    assert_eq!(job.result.errors.len(), 1);
    assert_eq!(job.result.errors[0].row, 2);
    assert!(
        job.result
            .warnings
            .iter()
            .any(|w| w.contains("contratti_gas"))
    );
}

#[test]
fn unparseable_upload_fails_the_job() {
    let db = TestDatabase::modern();
    let job = db
        .service()
        .import_blocking("scan.pdf", b"%PDF-1.4\xff\xfe\x00\x81", ImportOptions::default(), None)
        .expect("job exists");

    assert_eq!(job.progress.stage, ImportStage::Failed);
    assert_eq!(job.progress.progress, 100);
    assert!(!job.result.success);
    assert_eq!(job.result.errors.len(), 1);
    assert_eq!(job.result.errors[0].row, 0);
    assert!(job.progress.completed_at.is_some());
}

#[test]
fn importer_processes_every_row_and_publishes_batches() {
    let db = TestDatabase::modern();
    let mut lines = String::from("tipo;codice_fiscale;email\n");
    for idx in 0..25 {
        lines.push_str(&format!("privato;;client{idx}@example.it\n"));
    }
    let table = parse(lines.as_bytes(), "clienti.csv").expect("parse");
    assert_eq!(table.len(), 25);

    let jobs = InMemoryJobStore::new();
    let options = ImportOptions::default().with_batch_size(10);
    jobs.put(ImportJob::new("job-1", "clienti.csv", options))
        .expect("put");
    let config = ImportConfig::default();
    let mut store = SqliteStore::open(db.db_path()).expect("store");
    let result = Importer::new(&mut store, &config, options)
        .run(&jobs, "job-1", "clienti.csv", &table)
        .expect("run");

    assert_eq!(result.processed, result.total_rows);
    assert_eq!(result.inserted.clienti_privati, 25);
    let job = jobs.get("job-1").expect("get").expect("job");
    assert_eq!(job.progress.stage, ImportStage::Completed);
    assert_eq!(job.result, result);
}
