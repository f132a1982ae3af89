//! Shared fixtures for the integration tests
//!
//! Every test runs against a `wiremock` server standing in for an XNAT
//! archive. The builders below produce the JSON and XML shapes XNAT answers
//! with, trimmed to the fields the client reads.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xnat_sync::app::client::{ClientConfig, RequestPolicy};
use xnat_sync::app::ArchiveClient;
use xnat_sync::auth::Credentials;

pub const PROJECT: &str = "SPINS";

/// Accept logins and logouts on the session endpoint
pub async fn mock_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/data/JSESSION"))
        .respond_with(ResponseTemplate::new(200).set_body_string("3F2504E04F8911D39A0C0305E82C3301"))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/data/JSESSION"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Log into the mock server with the fast test configuration
pub async fn connect(server: &MockServer) -> ArchiveClient {
    connect_with(server, ClientConfig::for_testing()).await
}

pub async fn connect_with(server: &MockServer, config: ClientConfig) -> ArchiveClient {
    ArchiveClient::connect(&server.uri(), Credentials::new("user", "pass"), config)
        .await
        .unwrap()
}

/// Test configuration whose queries give up after `retries` short timeouts
pub fn short_query_config(retries: u32) -> ClientConfig {
    ClientConfig {
        query: RequestPolicy::new(retries, Duration::from_millis(200)),
        ..ClientConfig::for_testing()
    }
}

pub fn subject_path(project: &str, label: &str) -> String {
    format!("/data/archive/projects/{}/subjects/{}", project, label)
}

pub fn experiment_path(project: &str, subject: &str, experiment: &str) -> String {
    format!(
        "/data/archive/projects/{}/subjects/{}/experiments/{}",
        project, subject, experiment
    )
}

/// Subject query answer
pub fn subject_json(project: &str, label: &str) -> Value {
    json!({
        "items": [{
            "data_fields": {
                "project": project,
                "label": label,
                "ID": format!("XNAT_S_{}", label)
            },
            "children": []
        }]
    })
}

/// One scan with a DICOM resource of `file_count` files
pub fn scan(series: &str, file_count: u64) -> Value {
    json!({
        "data_fields": {
            "ID": series,
            "type": "T1w",
            "series_description": format!("Series {}", series),
            "parameters/imageType": "ORIGINAL\\PRIMARY"
        },
        "children": [{
            "field": "file",
            "items": [{
                "data_fields": {
                    "label": "DICOM",
                    "format": "DICOM",
                    "content": "RAW",
                    "file_count": file_count,
                    "xnat_abstractresource_id": format!("5{}", series)
                }
            }]
        }]
    })
}

/// One resource folder; pass `None` for an unlabelled folder
pub fn folder(label: Option<&str>, resource_id: &str, file_count: u64) -> Value {
    let mut fields = json!({
        "xnat_abstractresource_id": resource_id,
        "file_count": file_count
    });
    if let Some(label) = label {
        fields["label"] = json!(label);
    }
    json!({ "data_fields": fields })
}

/// Experiment query answer
pub fn experiment_json(label: &str, id: &str, scans: Vec<Value>, folders: Vec<Value>) -> Value {
    json!({
        "items": [{
            "data_fields": {
                "label": label,
                "ID": id,
                "UID": "1.2.840.113619",
                "date": "2024-03-01"
            },
            "children": [
                {"field": "scans/scan", "items": scans},
                {"field": "resources/resource", "items": folders}
            ]
        }]
    })
}

/// `{"ResultSet": {"Result": [...]}}` listing
pub fn result_set(rows: Vec<Value>) -> Value {
    json!({ "ResultSet": { "Result": rows } })
}

/// Resource catalog listing `(uri, digest)` entries
pub fn catalog_xml(entries: &[(&str, &str)]) -> String {
    let entries: String = entries
        .iter()
        .map(|(uri, digest)| {
            format!(
                r#"    <cat:entry URI="{}" ID="{}" digest="{}"/>
"#,
                uri, uri, digest
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<cat:Catalog xmlns:cat="http://nrg.wustl.edu/catalog" ID="resource">
  <cat:entries>
{}  </cat:entries>
</cat:Catalog>"#,
        entries
    )
}

/// Hex MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
