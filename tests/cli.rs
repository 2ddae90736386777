mod common;

use assert_cmd::Command;
use common::TestDatabase;
use predicates::str::contains;

const CLIENTS: &str = "codice_fiscale;nome;cognome\nRSSMRA85T10A562S;Mario;Rossi\n";

fn bin() -> Command {
    Command::cargo_bin("energy-import").expect("binary exists")
}

#[test]
fn import_prints_summary_table() {
    let db = TestDatabase::modern();
    let input = db.write("clienti.csv", CLIENTS);
    bin()
        .args(["import", "-i"])
        .arg(&input)
        .arg("--db")
        .arg(db.db_path())
        .assert()
        .success()
        .stdout(contains("1 of 1 row(s) processed, no errors"))
        .stdout(contains("Private client"));
    assert_eq!(db.count("clienti_privati"), 1);
}

#[test]
fn import_json_reports_camel_case_result() {
    let db = TestDatabase::modern();
    let input = db.write("clienti.csv", CLIENTS);
    let output = bin()
        .args(["import", "--json", "--dry-run", "-i"])
        .arg(&input)
        .arg("--db")
        .arg(db.db_path())
        .output()
        .expect("run binary");
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(result["totalRows"], 1);
    assert_eq!(result["dryRun"], true);
    assert_eq!(result["inserted"]["clienti_privati"], 1);
    assert_eq!(db.count("clienti_privati"), 0);
}

#[test]
fn import_accepts_options_json() {
    let db = TestDatabase::modern();
    let input = db.write("clienti.csv", "codice_fiscale\nRSSMRA85T10A562X\n");
    bin()
        .args(["import", "--options", r#"{"skipValidation":true,"batchSize":0}"#, "-i"])
        .arg(&input)
        .arg("--db")
        .arg(db.db_path())
        .assert()
        .success()
        .stdout(contains("no errors"));
    assert_eq!(db.count("clienti_privati"), 1);
}

#[test]
fn import_with_explicit_delimiter() {
    let db = TestDatabase::modern();
    let input = db.write("clienti.txt", "codice_fiscale|nome\nRSSMRA85T10A562S|Mario\n");
    bin()
        .args(["import", "--delimiter", "pipe", "-i"])
        .arg(&input)
        .arg("--db")
        .arg(db.db_path())
        .assert()
        .success();
    assert_eq!(db.count("clienti_privati"), 1);
}

#[test]
fn import_of_unsupported_file_fails() {
    let db = TestDatabase::modern();
    let input = db.path().join("scan.pdf");
    std::fs::write(&input, b"%PDF\xff\xfe\x00").expect("write pdf");
    bin()
        .args(["import", "-i"])
        .arg(&input)
        .arg("--db")
        .arg(db.db_path())
        .assert()
        .failure()
        .stderr(contains("error: Import failed"));
}

#[test]
fn import_uses_table_names_from_config() {
    let db = TestDatabase::new(
        "CREATE TABLE privati (id INTEGER PRIMARY KEY, codice_fiscale TEXT, nome TEXT);",
    );
    let config = db.write(
        "import.yaml",
        "tables:\n  private_clients: privati\nunspecified_supplier: N/D\n",
    );
    let input = db.write("clienti.csv", CLIENTS);
    bin()
        .args(["import", "--skip-association", "-c"])
        .arg(&config)
        .arg("-i")
        .arg(&input)
        .arg("--db")
        .arg(db.db_path())
        .assert()
        .success();
    assert_eq!(db.count("privati"), 1);
}

#[test]
fn columns_lists_target_table() {
    let db = TestDatabase::legacy();
    bin()
        .args(["columns", "--table", "contratti_luce", "--db"])
        .arg(db.db_path())
        .assert()
        .success()
        .stdout(contains("contratti_luce"))
        .stdout(contains("numero_contratto"))
        .stdout(contains("not null"));
}

#[test]
fn columns_reports_missing_tables() {
    let db = TestDatabase::new("CREATE TABLE users (id INTEGER PRIMARY KEY, nome TEXT);");
    bin()
        .args(["columns", "--db"])
        .arg(db.db_path())
        .assert()
        .success()
        .stdout(contains("clienti_privati\n(table not found)"))
        .stdout(contains("users"));
}

#[test]
fn types_lists_record_kinds() {
    bin()
        .arg("types")
        .assert()
        .success()
        .stdout(contains("client_private\tPrivate client"))
        .stdout(contains("contract_gas\tGas contract"));
}
