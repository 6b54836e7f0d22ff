//! Admin command tests against files on disk
//!
//! Run with: cargo test --package trackstore-cli --test cli_tests

use pretty_assertions::assert_eq;
use std::fs;
use trackstore_cli::{csv, load_config, sample, verify};
use trackstore_core::{StoreConfig, StoreName};
use trackstore_repo::{SampleSize, INVALID_BACKUP};

fn config() -> StoreConfig {
    StoreConfig::default().with_database_name("trackstore-cli-test")
}

#[tokio::test]
async fn sample_then_verify_counts_every_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let size = SampleSize::default();

    let path = sample(config(), 7, size, dir.path()).await.expect("sample");
    let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
    assert!(name.starts_with("database-backup-"));
    assert!(name.ends_with(".json"));

    let report = verify(config(), &path).await.expect("verify");
    assert_eq!(report.count(StoreName::Projects), size.projects);
    assert_eq!(report.count(StoreName::SmePartners), size.partners);
    assert_eq!(report.count(StoreName::Collaborators), size.collaborators);
    assert_eq!(
        report.count(StoreName::Spis),
        size.projects * size.spis_per_project
    );
    assert_eq!(report.count(StoreName::Teams), 0);
}

#[tokio::test]
async fn verify_rejects_invalid_backup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");
    fs::write(&path, r#"{"projects": []}"#).expect("write");

    let err = verify(config(), &path).await.expect_err("invalid backup");
    assert!(format!("{err:#}").contains(INVALID_BACKUP));
}

#[tokio::test]
async fn csv_writes_both_sections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backup = sample(config(), 11, SampleSize::default(), dir.path())
        .await
        .expect("sample");
    let out = dir.path().join("export.csv");

    let rendered = csv(config(), &backup, Some(&out)).await.expect("csv");
    let written = fs::read_to_string(&out).expect("read csv");

    assert_eq!(rendered, written);
    assert!(written.starts_with("Projects\n"));
    assert!(written.contains("\nCollaborators\n"));
}

#[test]
fn config_file_overrides_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.json");
    fs::write(&path, r#"{"database_name": "from-file", "version": 3}"#).expect("write");

    let loaded = load_config(Some(&path)).expect("config");
    assert_eq!(loaded.database_name, "from-file");
    assert_eq!(loaded.version, 3);
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(load_config(Some(&dir.path().join("absent.json"))).is_err());
}
