use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;

#[test]
fn config_hash_prints_hash_and_canonical_json() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let site = dir.path().join("monza.yaml");
    fs::write(&base, "engine:\n  granularity: hour\nruntime:\n  workers: 1\n").unwrap();
    fs::write(&site, "runtime:\n  workers: 4\n").unwrap();

    Command::cargo_bin("prk")
        .unwrap()
        .current_dir(dir.path())
        .args([
            "config-hash",
            base.to_str().unwrap(),
            site.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("config_hash="))
        .stdout(predicate::str::contains(r#""workers":4"#))
        .stdout(predicate::str::contains(r#""granularity":"hour""#));
}

#[test]
fn config_hash_requires_paths() {
    Command::cargo_bin("prk")
        .unwrap()
        .arg("config-hash")
        .assert()
        .failure();
}
