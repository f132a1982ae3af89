//! Integration tests for mirror reconciliation
//!
//! A primary archive and its mirror are each played by a mock server. The
//! source session has two series and a behavioural folder with three files;
//! the mirror copy is missing one series and one file and holds one file
//! whose digest differs.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xnat_sync::app::reconcile::MissingScan;
use xnat_sync::app::{ExperimentPath, Reconciler, RepairItem};
use xnat_sync::constants::xnat;

use common::{
    catalog_xml, connect, experiment_json, experiment_path, folder, md5_hex, mock_login, result_set,
    scan, PROJECT,
};

const SOURCE_SESSION: &str = "SPN01_CMH_0001_01_01";
const MIRROR_PROJECT: &str = "SPN";
const MIRROR_SUBJECT: &str = "SPN_CAMH_0001";
const MIRROR_SESSION: &str = "SPN_CAMH_0001_01_SE01_MR";

const EVENTS: &[u8] = b"trial,onset\n1,0.5\n";
const SUMMARY: &[u8] = b"accuracy=0.93\n";
const NOTES: &[u8] = b"participant fell asleep during run 2\n";

fn source_path() -> ExperimentPath {
    ExperimentPath::new(PROJECT, SOURCE_SESSION, SOURCE_SESSION)
}

fn mirror_path() -> ExperimentPath {
    ExperimentPath::new(MIRROR_PROJECT, MIRROR_SUBJECT, MIRROR_SESSION)
}

fn source_experiment_route() -> String {
    experiment_path(PROJECT, SOURCE_SESSION, SOURCE_SESSION)
}

fn mirror_experiment_route() -> String {
    experiment_path(MIRROR_PROJECT, MIRROR_SUBJECT, MIRROR_SESSION)
}

/// Source archive with series 1 (5 files) and 2 (3 files), a `behav` folder
/// and two folders that must never be compared
async fn source_archive() -> MockServer {
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(source_experiment_route()))
        .respond_with(ResponseTemplate::new(200).set_body_json(experiment_json(
            SOURCE_SESSION,
            "XNAT_E00042",
            vec![scan("1", 5), scan("2", 3)],
            vec![
                folder(Some("behav"), "900", 3),
                folder(None, "901", 3),
                folder(Some("empty"), "902", 0),
            ],
        )))
        .mount(&server)
        .await;

    let events = md5_hex(EVENTS);
    let summary = md5_hex(SUMMARY);
    let notes = md5_hex(NOTES);
    Mock::given(method("GET"))
        .and(path(format!("{}/resources/900/", source_experiment_route())))
        .and(query_param("format", "xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_xml(&[
            ("events.csv", events.as_str()),
            ("run%202/summary.txt", summary.as_str()),
            ("notes.txt", notes.as_str()),
        ])))
        .mount(&server)
        .await;

    for degenerate in ["901", "902"] {
        Mock::given(method("GET"))
            .and(path(format!("{}/resources/{}/", source_experiment_route(), degenerate)))
            .respond_with(ResponseTemplate::new(200).set_body_string(catalog_xml(&[])))
            .expect(0)
            .mount(&server)
            .await;
    }

    server
}

/// Mirror holding series 1 and a `behav` folder with one matching and one
/// differing file
async fn mirror_archive() -> MockServer {
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(mirror_experiment_route()))
        .respond_with(ResponseTemplate::new(200).set_body_json(experiment_json(
            MIRROR_SESSION,
            "MIRROR_E00007",
            vec![scan("1", 5)],
            vec![folder(Some("behav"), "700", 2)],
        )))
        .mount(&server)
        .await;

    let events = md5_hex(EVENTS);
    let stale = md5_hex(b"an older version of the notes\n");
    Mock::given(method("GET"))
        .and(path(format!("{}/resources/700/", mirror_experiment_route())))
        .and(query_param("format", "xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_xml(&[
            ("events.csv", events.as_str()),
            ("notes.txt", stale.as_str()),
        ])))
        .mount(&server)
        .await;

    server
}

/// Routes used by a repair: downloads on the source, uploads on the mirror
async fn mount_repair_routes(source: &MockServer, mirror: &MockServer, import_status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("{}/scans/2/resources/DICOM/files", source_experiment_route())))
        .and(query_param("format", "zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04series-2".to_vec()))
        .expect(1)
        .mount(source)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "{}/resources/900/files/run%202/summary.txt",
            source_experiment_route()
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SUMMARY.to_vec()))
        .expect(1)
        .mount(source)
        .await;

    Mock::given(method("POST"))
        .and(path("/data/services/import"))
        .and(query_param("project", MIRROR_PROJECT))
        .and(query_param("subject", MIRROR_SUBJECT))
        .and(query_param("session", MIRROR_SESSION))
        .respond_with(ResponseTemplate::new(import_status))
        .expect(1)
        .mount(mirror)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/resources/", mirror_experiment_route())))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_set(vec![json!({
            "label": "behav",
            "xnat_abstractresource_id": "700",
            "file_count": "2"
        })])))
        .mount(mirror)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "{}/resources/700/files/run%202/summary.txt",
            mirror_experiment_route()
        )))
        .and(query_param("inbody", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(mirror)
        .await;
}

#[tokio::test]
async fn test_diff_finds_missing_and_differing() {
    let source_server = source_archive().await;
    let mirror_server = mirror_archive().await;
    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;

    let report = Reconciler::new(&source, &mirror)
        .verify(&source_path(), &mirror_path())
        .await
        .unwrap();

    assert_eq!(
        report.missing_scans(),
        &[MissingScan {
            series: "2".to_string(),
            format: "DICOM".to_string(),
        }]
    );
    assert!(report.differing_scans().is_empty());

    // Only the labelled, non-empty folder is compared
    assert_eq!(report.missing_resources().len(), 1);
    let missing = &report.missing_resources()[0];
    assert_eq!(missing.folder_label, "behav");
    assert_eq!(missing.files.len(), 1);
    assert_eq!(missing.files[0].uri, "run%202/summary.txt");

    assert_eq!(report.differing_resources().len(), 1);
    assert_eq!(report.differing_resources()[0].uri, "notes.txt");

    assert!(!report.is_clean());
    assert_eq!(report.missing_file_count(), 1);
}

#[tokio::test]
async fn test_differing_scan_counts() {
    // Test that a series with fewer files on the mirror is reported as differing
    let source_server = MockServer::start().await;
    let mirror_server = MockServer::start().await;
    mock_login(&source_server).await;
    mock_login(&mirror_server).await;

    Mock::given(method("GET"))
        .and(path(source_experiment_route()))
        .respond_with(ResponseTemplate::new(200).set_body_json(experiment_json(
            SOURCE_SESSION,
            "XNAT_E00042",
            vec![scan("1", 176)],
            vec![],
        )))
        .mount(&source_server)
        .await;
    Mock::given(method("GET"))
        .and(path(mirror_experiment_route()))
        .respond_with(ResponseTemplate::new(200).set_body_json(experiment_json(
            MIRROR_SESSION,
            "MIRROR_E00007",
            vec![scan("1", 170)],
            vec![],
        )))
        .mount(&mirror_server)
        .await;

    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;
    let report = Reconciler::new(&source, &mirror)
        .verify(&source_path(), &mirror_path())
        .await
        .unwrap();

    assert!(report.missing_scans().is_empty());
    assert_eq!(report.differing_scans().len(), 1);
    assert_eq!(report.differing_scans()[0].source_count, 176);
    assert_eq!(report.differing_scans()[0].target_count, 170);
    assert!(!report.has_missing());
}

#[tokio::test]
async fn test_folder_missing_on_mirror() {
    // Test that a folder absent from the mirror reports every source file
    let source_server = source_archive().await;
    let mirror_server = MockServer::start().await;
    mock_login(&mirror_server).await;

    Mock::given(method("GET"))
        .and(path(mirror_experiment_route()))
        .respond_with(ResponseTemplate::new(200).set_body_json(experiment_json(
            MIRROR_SESSION,
            "MIRROR_E00007",
            vec![scan("1", 5), scan("2", 3)],
            vec![folder(Some(xnat::NOLABEL), "799", 4)],
        )))
        .mount(&mirror_server)
        .await;

    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;
    let report = Reconciler::new(&source, &mirror)
        .verify(&source_path(), &mirror_path())
        .await
        .unwrap();

    assert!(report.missing_scans().is_empty());
    assert_eq!(report.missing_resources().len(), 1);
    assert_eq!(report.missing_resources()[0].files.len(), 3);
    assert!(report.differing_resources().is_empty());
}

#[tokio::test]
async fn test_verify_missing_experiment() {
    let source_server = source_archive().await;
    let mirror_server = MockServer::start().await;
    mock_login(&mirror_server).await;

    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;
    let result = Reconciler::new(&source, &mirror)
        .verify(&source_path(), &mirror_path())
        .await;

    assert!(matches!(
        result,
        Err(xnat_sync::errors::ArchiveError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_repair_uploads_missing_items() {
    let source_server = source_archive().await;
    let mirror_server = mirror_archive().await;
    mount_repair_routes(&source_server, &mirror_server, 200).await;

    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;
    let seen = AtomicUsize::new(0);
    let reconciler = Reconciler::new(&source, &mirror).with_observer(|progress| {
        assert!(progress.succeeded);
        assert_eq!(progress.total, 2);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let report = reconciler.verify(&source_path(), &mirror_path()).await.unwrap();
    let summary = reconciler.repair(&report).await.unwrap();

    assert!(summary.is_success());
    assert!(!summary.dry_run);
    assert_eq!(summary.repaired.len(), 2);
    assert!(matches!(&summary.repaired[0], RepairItem::Scan { series, .. } if series == "2"));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_repair_continues_after_failure() {
    // Test that a failed import is recorded and the remaining items still run
    let source_server = source_archive().await;
    let mirror_server = mirror_archive().await;
    mount_repair_routes(&source_server, &mirror_server, 500).await;

    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;
    let reconciler = Reconciler::new(&source, &mirror);

    let report = reconciler.verify(&source_path(), &mirror_path()).await.unwrap();
    let summary = reconciler.repair(&report).await.unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.total(), 2);
    assert_eq!(summary.failures.len(), 1);
    assert!(matches!(summary.failures[0].item, RepairItem::Scan { .. }));
    assert!(matches!(summary.repaired[0], RepairItem::ResourceFile { .. }));
}

#[tokio::test]
async fn test_dry_run_transfers_nothing() {
    let source_server = source_archive().await;
    let mirror_server = mirror_archive().await;

    Mock::given(method("POST"))
        .and(path_regex("^/data/(services|archive)/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mirror_server)
        .await;

    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;
    let reconciler = Reconciler::new(&source, &mirror).with_dry_run(true);

    let report = reconciler.verify(&source_path(), &mirror_path()).await.unwrap();
    let summary = reconciler.repair(&report).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.repaired.len(), 2);
    assert!(summary.failures.is_empty());
}

#[tokio::test]
async fn test_repair_copies_empty_resource_file() {
    // Test that a zero-byte resource file is repaired like any other file
    let source_server = MockServer::start().await;
    let mirror_server = MockServer::start().await;
    mock_login(&source_server).await;
    mock_login(&mirror_server).await;

    let events = md5_hex(EVENTS);
    let empty = md5_hex(b"");

    Mock::given(method("GET"))
        .and(path(source_experiment_route()))
        .respond_with(ResponseTemplate::new(200).set_body_json(experiment_json(
            SOURCE_SESSION,
            "XNAT_E00042",
            vec![scan("1", 5)],
            vec![folder(Some("behav"), "900", 2)],
        )))
        .mount(&source_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/resources/900/", source_experiment_route())))
        .and(query_param("format", "xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_xml(&[
            ("events.csv", events.as_str()),
            ("empty.txt", empty.as_str()),
        ])))
        .mount(&source_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/resources/900/files/empty.txt", source_experiment_route())))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&source_server)
        .await;

    Mock::given(method("GET"))
        .and(path(mirror_experiment_route()))
        .respond_with(ResponseTemplate::new(200).set_body_json(experiment_json(
            MIRROR_SESSION,
            "MIRROR_E00007",
            vec![scan("1", 5)],
            vec![folder(Some("behav"), "700", 1)],
        )))
        .mount(&mirror_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/resources/700/", mirror_experiment_route())))
        .and(query_param("format", "xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(catalog_xml(&[("events.csv", events.as_str())])),
        )
        .mount(&mirror_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/resources/", mirror_experiment_route())))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_set(vec![json!({
            "label": "behav",
            "xnat_abstractresource_id": "700",
            "file_count": "1"
        })])))
        .mount(&mirror_server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/resources/700/files/empty.txt", mirror_experiment_route())))
        .and(query_param("inbody", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mirror_server)
        .await;

    let source = connect(&source_server).await;
    let mirror = connect(&mirror_server).await;
    let reconciler = Reconciler::new(&source, &mirror);

    let report = reconciler.verify(&source_path(), &mirror_path()).await.unwrap();
    let summary = reconciler.repair(&report).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.repaired.len(), 1);
    assert!(matches!(
        &summary.repaired[0],
        RepairItem::ResourceFile { file, .. } if file.uri == "empty.txt"
    ));
}
