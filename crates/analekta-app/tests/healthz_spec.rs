use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use analekta_app::paths::AppPaths;
use analekta_app::server::{build_api_router, build_app_router};
use analekta_app::services::{
    AnalysisClient, AnalysisError, AnalysisPage, DocumentLocation, FeatureType, FsDocumentStore,
    JobStore, NotificationTarget, PipelineContext,
};

#[tokio::test]
async fn healthz_returns_ok_json() {
    let app = build_api_router();
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/healthz")
                .body(Body::empty())
                .expect("request builder should not fail"),
        )
        .await
        .expect("healthz handler should respond");

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .expect("content-type header present")
        .to_str()
        .expect("content-type must be valid utf-8");
    assert!(
        content_type.starts_with("application/json"),
        "content-type must indicate JSON: {content_type}"
    );

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes();
    let value: Value =
        serde_json::from_slice(body_bytes.as_ref()).expect("healthz response must be valid JSON");
    assert_eq!(value, json!({ "status": "ok" }));
}

/// Client double for routing tests; the notification below is orphaned, so
/// no call ever reaches it.
struct UnreachableClient;

#[async_trait::async_trait]
impl AnalysisClient for UnreachableClient {
    async fn start_analysis(
        &self,
        _location: &DocumentLocation,
        _features: &[FeatureType],
        _notification: &NotificationTarget,
    ) -> Result<String, AnalysisError> {
        unreachable!("no submissions in this test")
    }

    async fn get_analysis(
        &self,
        _job_id: &str,
        _next_token: Option<&str>,
    ) -> Result<AnalysisPage, AnalysisError> {
        unreachable!("no retrievals in this test")
    }
}

#[tokio::test]
async fn notification_endpoint_reports_the_batch_summary() {
    let temp = TempDir::new().expect("temp dir");
    let paths = AppPaths::new(temp.path().join("data")).expect("app paths");
    let jobs = JobStore::open(&paths).expect("open job store");
    let ctx = Arc::new(PipelineContext {
        paths,
        analysis: Arc::new(UnreachableClient),
        documents: Arc::new(FsDocumentStore::new(temp.path().join("objects"))),
        jobs: Arc::new(jobs),
        source_bucket: "source".to_string(),
        output_bucket: "outputs".to_string(),
        output_prefix: "processed/".to_string(),
    });

    let payload = serde_json::json!({"JobId": "job-unknown", "Status": "SUCCEEDED"}).to_string();
    let body = json!({
        "Records": [{"body": serde_json::json!({"Message": payload}).to_string()}]
    });

    let app = build_app_router(ctx);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/notifications")
                .header(axum::http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request builder should not fail"),
        )
        .await
        .expect("notification handler should respond");

    assert_eq!(response.status(), StatusCode::OK);

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes();
    let summary: Value =
        serde_json::from_slice(body_bytes.as_ref()).expect("summary must be valid JSON");
    assert_eq!(summary["processed"], 0);
    assert_eq!(summary["failed"], 1);
    assert_eq!(summary["failures"][0]["job_id"], "job-unknown");
}
