//! Integration tests for the resilient request layer
//!
//! These tests drive the retry loop through real HTTP exchanges with a mock
//! archive: timeouts, unavailable servers, expired sessions and the status
//! codes callers have to interpret themselves.

mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xnat_sync::errors::{ArchiveError, AuthError, ServerFailure};

use common::{connect, connect_with, mock_login, result_set, short_query_config, subject_path, PROJECT};

const PROJECTS_PATH: &str = "/data/archive/projects/";

fn projects_listing() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(result_set(vec![json!({"ID": "SPINS"}), json!({"ID": "PACTMD"})]))
}

#[tokio::test]
async fn test_timeout_then_success() {
    // Test that a timed-out attempt is retried with a longer timeout
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(projects_listing().set_delay(Duration::from_secs(2)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(projects_listing())
        .expect(1)
        .mount(&server)
        .await;

    let client = connect_with(&server, short_query_config(1)).await;
    let projects = client.list_projects().await.unwrap();

    assert_eq!(projects, vec!["SPINS", "PACTMD"]);
}

#[tokio::test]
async fn test_timeout_budget_exhausted() {
    // Test that every attempt timing out surfaces a timeout error
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(projects_listing().set_delay(Duration::from_secs(3)))
        .expect(2)
        .mount(&server)
        .await;

    let client = connect_with(&server, short_query_config(1)).await;
    let result = client.list_projects().await;

    match result {
        Err(ArchiveError::Timeout { url, attempts, .. }) => {
            assert_eq!(attempts, 2);
            assert!(url.contains("/data/archive/projects/"));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unavailable_then_success() {
    // Test that 503 answers are retried after the backoff
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(projects_listing())
        .expect(1)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    assert_eq!(client.list_projects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unavailable_budget_exhausted() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(ResponseTemplate::new(504))
        .expect(4)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    match client.list_projects().await {
        Err(ArchiveError::ServiceUnavailable { status, attempts, .. }) => {
            assert_eq!(status, 504);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected unavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_semantic_bad_gateway_not_retried() {
    // Test that a 502 carrying an import failure is reported straight away
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("Unable to identify experiment"))
        .expect(1)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    match client.list_projects().await {
        Err(ArchiveError::Server { status, failure, .. }) => {
            assert_eq!(status, 502);
            assert_eq!(failure, ServerFailure::UnidentifiedExperiment);
        }
        other => panic!("expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_session_logs_in_again() {
    // Test that a 401 triggers one re-login and a replay of the request
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/data/JSESSION"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ABCDEF"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(projects_listing())
        .expect(1)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    assert_eq!(client.list_projects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_fresh_session() {
    // Test that a second 401 right after re-login is an authentication failure
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    let result = client.list_projects().await;
    assert!(matches!(
        result,
        Err(ArchiveError::Auth(AuthError::SessionRejected { .. }))
    ));
}

#[tokio::test]
async fn test_not_found_is_empty() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(subject_path(PROJECT, "SPN01_CMH_9999_01_01")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    let subject = client.find_subject(PROJECT, "SPN01_CMH_9999_01_01").await.unwrap();
    assert!(subject.is_none());

    let labels = client.list_subject_labels("MISSING").await.unwrap();
    assert!(labels.is_empty());
}

#[tokio::test]
async fn test_conflict_passed_to_caller() {
    // Test that 409 is surfaced unchanged and not retried
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("PUT"))
        .and(path(subject_path(PROJECT, "SPN01_CMH_0001_01_01")))
        .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
        .expect(1)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    match client.create_subject(PROJECT, "SPN01_CMH_0001_01_01").await {
        Err(ArchiveError::Conflict { status, body, .. }) => {
            assert_eq!(status, 409);
            assert_eq!(body, "already exists");
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_failure_classified() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS_PATH))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("<html>There are multiple imaging sessions in the archive</html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = connect(&server).await;
    let error = client.list_projects().await.unwrap_err();
    assert_eq!(error.status(), Some(500));
    assert!(matches!(
        error,
        ArchiveError::Server {
            failure: ServerFailure::MultipleSessions,
            ..
        }
    ));
}
