//! HTTP surface of the import feature, driven through the router
//!
//! Requests go through `tower::ServiceExt::oneshot`; stores are in memory so
//! no database is needed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use medsync_server::features::{self, FeatureState, ImportState};
use medsync_server::ingest::SourceCatalog;
use serde_json::Value;
use tower::ServiceExt;

mod helpers;
use helpers::{procedures_export, Harness};

const BOUNDARY: &str = "medsync-test-boundary";

fn app(harness: &Harness) -> Router {
    let mut catalog = SourceCatalog::builtin();
    catalog.set_cloud_url("roster_federal", None);
    let imports = ImportState::new(harness.pipeline.clone(), catalog, reqwest::Client::new())
        .with_max_upload_bytes(64 * 1024);
    Router::new().nest("/api/v1", features::router(FeatureState { imports }))
}

fn multipart_body(field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/vnd.ms-excel\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(source: &str, field: &str, content: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/v1/imports/{source}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("x-triggered-by", "ops@clinic")
        .body(Body::from(multipart_body(field, "procedimientos.xls", content)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Catalogue and history
// ============================================================================

#[tokio::test]
async fn test_sources_lists_catalogue_without_urls() {
    let harness = Harness::with_standard_codes();
    let response = app(&harness)
        .oneshot(get("/api/v1/imports/sources"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    let sources = body["data"].as_array().unwrap();
    assert_eq!(sources.len(), 5);
    assert!(sources.iter().all(|s| s.get("cloud_url").is_none()));

    let response = app(&harness)
        .oneshot(get("/api/v1/imports/sources?mode=cloud"))
        .await
        .unwrap();
    let body = json_body(response).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["roster_federal"]);
}

#[tokio::test]
async fn test_history_rejects_bad_limit_and_unknown_source() {
    let harness = Harness::with_standard_codes();

    let response = app(&harness)
        .oneshot(get("/api/v1/imports/history?limit=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let response = app(&harness)
        .oneshot(get("/api/v1/imports/history?source=nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test]
async fn test_upload_runs_import_and_records_history() {
    let harness = Harness::with_standard_codes();
    let file = procedures_export(&[
        &["2024/03/15", "CC", "100", "640000", "1"],
        &["2024/03/15", "CC", "200", "999999", "1"],
    ]);

    let response = app(&harness)
        .oneshot(upload("procedures", "file", &file))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["data"]["success"], 1);
    assert_eq!(body["data"]["errors"], 1);
    assert_eq!(body["data"]["totalProcessed"], 2);

    let response = app(&harness)
        .oneshot(get("/api/v1/imports/history?source=procedures"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["meta"]["count"], 1);
    let run = &body["data"][0];
    assert_eq!(run["triggeredBy"], "ops@clinic");
    assert_eq!(run["fileName"], "procedimientos.xls");
    assert_eq!(run["status"], "completed");
    assert_eq!(run["fileSha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_upload_without_file_field_is_rejected() {
    let harness = Harness::with_standard_codes();
    let response = app(&harness)
        .oneshot(upload("procedures", "attachment", b"<table></table>"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(harness.history.all().is_empty());
}

#[tokio::test]
async fn test_upload_error_codes() {
    let harness = Harness::with_standard_codes();

    let response = app(&harness)
        .oneshot(upload("unknown", "file", b"<table></table>"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "UNKNOWN_SOURCE");

    let response = app(&harness)
        .oneshot(upload("roster_federal", "file", b"TIPO ID|NUMERO ID\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "WRONG_MODE");

    let response = app(&harness)
        .oneshot(upload(
            "procedures",
            "file",
            b"<table><tr><td>NOMBRE</td></tr></table>",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "HEADER_NOT_FOUND");
    assert_eq!(body["error"]["details"]["expected"], "fecha, idpcte, cups");
}

#[tokio::test]
async fn test_oversized_upload_is_refused() {
    let harness = Harness::with_standard_codes();
    let big = vec![b' '; 80 * 1024];

    let response = app(&harness)
        .oneshot(upload("procedures", "file", &big))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.records.rows("procedures").is_empty());
}

// ============================================================================
// Cloud sync
// ============================================================================

#[tokio::test]
async fn test_sync_without_url_fails_before_streaming() {
    let harness = Harness::with_standard_codes();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/imports/roster_federal/sync")
        .body(Body::empty())
        .unwrap();

    let response = app(&harness).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(json_body(response).await["error"]["code"], "NO_CLOUD_URL");
}
