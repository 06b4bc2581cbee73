use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use uuid::Uuid;

/// Ingest into Postgres twice: the second delivery updates, never duplicates.
///
/// This test is DB-backed and is skipped if PRK_DATABASE_URL is not set.
#[test]
fn cli_ingest_redelivery_updates_then_delete() -> anyhow::Result<()> {
    let url = match std::env::var(prk_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: PRK_DATABASE_URL not set");
            return Ok(());
        }
    };

    let dir = tempfile::tempdir()?;
    let file = dir.path().join("saidas.csv");
    fs::write(
        &file,
        "checkin,checkout,ticket,matricula,use_type\n\
         2020-10-01 08:45:46,2020-10-01 12:16:24,123,0,A\n",
    )?;

    // fresh lot per run so leftovers from earlier runs do not match
    let parking_id = (Uuid::new_v4().as_u128() % 1_000_000_000) as i64 + 1_000;
    let parking_id = parking_id.to_string();
    let ingest = |expect: &str| -> anyhow::Result<()> {
        let mut cmd = Command::cargo_bin("prk")?;
        cmd.current_dir(dir.path())
            .env(prk_db::ENV_DB_URL, &url)
            .args([
                "ingest",
                "--file",
                file.to_str().unwrap_or_default(),
                "--kind",
                "exit",
                "--parking-id",
                &parking_id,
                "--parking-name",
                "Test Lot",
                "--parking-slug",
                "test-lot",
            ]);
        cmd.assert()
            .success()
            .stdout(predicate::str::contains(expect));
        Ok(())
    };

    ingest("created=1")?;
    ingest("updated=1")?;

    let mut status = Command::cargo_bin("prk")?;
    status
        .current_dir(dir.path())
        .env(prk_db::ENV_DB_URL, &url)
        .args(["db", "status"]);
    status
        .assert()
        .success()
        .stdout(predicate::str::contains("has_transactions_table=true"));

    let mut delete = Command::cargo_bin("prk")?;
    delete
        .current_dir(dir.path())
        .env(prk_db::ENV_DB_URL, &url)
        .args(["tx", "delete", "--id", &Uuid::new_v4().to_string()]);
    delete
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted=false"));

    Ok(())
}
