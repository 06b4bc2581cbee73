//! Scenario: failures that stop a batch before any record is reconciled
//! exit non-zero with a message on stderr.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;

fn prk(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("prk").unwrap();
    cmd.current_dir(dir).env_remove("PRK_DATABASE_URL");
    cmd
}

#[test]
fn missing_feed_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.csv");

    prk(dir.path())
        .args([
            "ingest",
            "--file",
            missing.to_str().unwrap(),
            "--kind",
            "exit",
            "--parking-id",
            "6",
            "--parking-name",
            "Monza",
            "--parking-slug",
            "monza",
            "--dry-run",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("decode exit feed"));
}

#[test]
fn csv_without_required_header_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("pagamentos.csv");
    fs::write(&file, "ticket,matricula\n123,0\n").unwrap();

    prk(dir.path())
        .args([
            "ingest",
            "--file",
            file.to_str().unwrap(),
            "--kind",
            "pagamentos",
            "--parking-id",
            "6",
            "--parking-name",
            "Monza",
            "--parking-slug",
            "monza",
            "--dry-run",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required header column"));
}

#[test]
fn real_ingest_without_database_url_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("saidas.csv");
    fs::write(
        &file,
        "checkin,checkout,ticket,matricula,use_type\n2020-10-01 08:00:00,2020-10-01 09:00:00,1,0,A\n",
    )
    .unwrap();

    prk(dir.path())
        .args([
            "ingest",
            "--file",
            file.to_str().unwrap(),
            "--kind",
            "exit",
            "--parking-id",
            "6",
            "--parking-name",
            "Monza",
            "--parking-slug",
            "monza",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SECRETS_MISSING"))
        .stderr(predicate::str::contains("PRK_DATABASE_URL"));
}

#[test]
fn unknown_kind_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("x.csv");
    fs::write(&file, "a\n").unwrap();

    prk(dir.path())
        .args([
            "ingest",
            "--file",
            file.to_str().unwrap(),
            "--kind",
            "tickets",
            "--parking-id",
            "6",
            "--parking-name",
            "Monza",
            "--parking-slug",
            "monza",
            "--dry-run",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid feed kind"));
}
