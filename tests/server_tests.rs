use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use tls_checker_rs::config::ScanConfig;
use tls_checker_rs::coordinator::ScanCoordinator;
use tls_checker_rs::probe::Prober;
use tls_checker_rs::server::router;
use tls_checker_rs::store::MemoryStore;
use tls_checker_rs::types::{ProbeOutcome, ProbeTarget};

struct PrefixProber;

#[async_trait]
impl Prober for PrefixProber {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        if target.host.starts_with("good") {
            ProbeOutcome::Passing
        } else {
            ProbeOutcome::Failing
        }
    }
}

fn app(root: &std::path::Path) -> axum::Router {
    let config = ScanConfig {
        roots: vec![root.to_path_buf()],
        ..ScanConfig::default()
    };
    let coordinator = ScanCoordinator::new(Arc::new(MemoryStore::new()), Arc::new(PrefixProber), config);
    router(Arc::new(coordinator))
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("client.php"),
        "<?php\n$a = 'https://good.example.com/api';\n$b = 'https://bad.example.com:8443/';\n$c = 'https://good-two.example.org/';\n",
    )
    .unwrap();
    dir
}

#[tokio::test]
async fn lists_discovered_urls() {
    let dir = fixture();
    let app = app(dir.path());
    let (status, body) = call(&app, "GET", "/api/urls", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "urls_to_scan": [
            "https://bad.example.com:8443",
            "https://good-two.example.org",
            "https://good.example.com"
        ]})
    );
}

#[tokio::test]
async fn batch_endpoint_pages_through_a_scan() {
    let dir = fixture();
    let app = app(dir.path());

    let (status, first) = call(&app, "POST", "/api/scan/batch", Some(json!({ "offset": 0, "batch_size": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["processed"], 2);
    assert_eq!(first["remaining"], 1);

    let (_, state) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(state, json!({ "state": "probing", "batch": 1 }));

    let (status, last) = call(&app, "POST", "/api/scan/batch", Some(json!({ "offset": 2, "batch_size": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(last["processed"], 3);
    assert_eq!(last["remaining"], 0);
    assert_eq!(last["passing"], 2);
    assert_eq!(last["failing_urls"], json!(["bad.example.com:8443"]));

    let (status, results) = call(&app, "GET", "/api/results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["has_data"], true);
    assert_eq!(results["passing_urls"], json!(["good-two.example.org", "good.example.com"]));
}

#[tokio::test]
async fn batch_without_session_conflicts() {
    let dir = fixture();
    let app = app(dir.path());
    let (status, body) = call(&app, "POST", "/api/scan/batch", Some(json!({ "offset": 5 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("no scan in progress"));
}

#[tokio::test]
async fn scan_requires_urls() {
    let dir = fixture();
    let app = app(dir.path());
    let (status, body) = call(&app, "POST", "/api/scan", Some(json!({ "urls": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No URLs provided for scanning.");

    let (status, body) = call(
        &app,
        "POST",
        "/api/scan",
        Some(json!({ "urls": ["https://good.example.com/x", "https://bad.example.com"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "processed": 2, "passing": 1, "failing": 1, "failing_urls": ["bad.example.com"] })
    );
}

#[tokio::test]
async fn results_are_empty_until_something_is_stored() {
    let dir = fixture();
    let app = app(dir.path());
    let (status, body) = call(&app, "GET", "/api/results", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn reset_reports_success() {
    let dir = fixture();
    let app = app(dir.path());
    call(&app, "POST", "/api/scan/batch", Some(json!({ "offset": 0 }))).await;

    let (status, body) = call(&app, "POST", "/api/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "TLS scan data has been reset." }));

    let (_, state) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(state, json!({ "state": "idle" }));

    let (status, results) = call(&app, "GET", "/api/results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((results["passing"].clone(), results["failing"].clone()), (json!(0), json!(0)));
}
