//! Integration tests for the pulse-churn API
//!
//! Exercises the full pipeline through the HTTP surface: organization
//! creation, dataset upload, feature processing, training, single and bulk
//! prediction, widget content, and job polling. Background stages really
//! run; tests poll the job endpoint the way a client would.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use futures::future::BoxFuture;
use pulse_common::config::{ServiceSettings, TomlConfig};
use pulse_common::RiskSegment;
use pulse_churn::services::generation_client::{ContentGenerator, GeneratorError, WidgetCopy};
use pulse_churn::storage::LocalDatasetStore;
use pulse_churn::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "pulse-test-boundary";

/// Deterministic generator standing in for the chat-completions API
struct FakeGenerator {
    calls: AtomicUsize,
}

impl FakeGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl ContentGenerator for FakeGenerator {
    fn generate<'a>(
        &'a self,
        segment: &'a str,
        risk_level: RiskSegment,
    ) -> BoxFuture<'a, Result<WidgetCopy, GeneratorError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(WidgetCopy {
                title: format!("{} offer", segment),
                message: format!("<strong>30% OFF</strong> for {} risk", risk_level),
                cta_text: "Claim Offer Now".to_string(),
                cta_link: "/offers/comeback".to_string(),
            })
        })
    }
}

struct TestApp {
    state: AppState,
    generator: Arc<FakeGenerator>,
    _data_dir: tempfile::TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let data_dir = tempfile::tempdir().expect("Should create temp dir");
        let db = pulse_churn::db::connect_in_memory()
            .await
            .expect("Should open in-memory database");
        let settings =
            ServiceSettings::from_toml(&TomlConfig::default(), data_dir.path().to_path_buf())
                .expect("Default settings should be valid");
        let store = Arc::new(LocalDatasetStore::new(data_dir.path()));
        let generator = Arc::new(FakeGenerator::new());

        let state = AppState::new(db, store, generator.clone(), settings);
        Self {
            state,
            generator,
            _data_dir: data_dir,
        }
    }

    fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.expect("Request should run");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Should read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Should parse JSON")
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn post_file(&self, uri: &str, filename: &str, content: &str) -> (StatusCode, Value) {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = filename,
            c = content,
        );
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    async fn create_org(&self) -> String {
        let (status, body) = self
            .post_json("/organizations", json!({"name": "Acme Retail"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().expect("Organization id").to_string()
    }

    /// Poll a job until it reaches a terminal state
    async fn wait_for_job(&self, org_id: &str, job_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self
                .get(&format!("/organizations/{}/jobs/{}", org_id, job_id))
                .await;
            assert_eq!(status, StatusCode::OK);
            match body["status"].as_str() {
                Some("succeeded") | Some("failed") => return body,
                _ => tokio::time::sleep(Duration::from_millis(25)).await,
            }
        }
        panic!("Job {} did not finish in time", job_id);
    }
}

/// Training dataset: even customers idle since February (churned under the
/// 30-day default), odd customers active through June
fn training_csv(customers: usize) -> String {
    let mut out = String::from("customer_id,event_date,amount\n");
    for i in 0..customers {
        if i % 2 == 0 {
            out.push_str(&format!("C{i},2024-01-0{},50.0\n", (i % 9) + 1, i = i));
            out.push_str(&format!("C{i},2024-02-0{},25.0\n", (i % 9) + 1, i = i));
        } else {
            out.push_str(&format!("C{i},2024-04-1{},80.0\n", i % 10, i = i));
            out.push_str(&format!("C{i},2024-05-2{},120.0\n", i % 10, i = i));
            out.push_str(&format!("C{i},2024-06-01,60.0\n", i = i));
        }
    }
    out
}

async fn run_pipeline_to_model(app: &TestApp, org_id: &str) {
    let (status, _) = app
        .post_file(
            &format!("/organizations/{}/datasets/upload", org_id),
            "transactions.csv",
            &training_csv(60),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post_json(
            &format!("/organizations/{}/datasets/process-features", org_id),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = app
        .wait_for_job(org_id, body["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "succeeded", "feature job: {:?}", job);

    let (status, body) = app
        .post_json(
            &format!(
                "/organizations/{}/train?model_type=logistic_regression",
                org_id
            ),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = app
        .wait_for_job(org_id, body["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "succeeded", "training job: {:?}", job);
}

// =============================================================================
// Health and organizations
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "pulse-churn");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_create_and_get_organization() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_json(
            "/organizations",
            json!({"name": "Acme", "churn_threshold_days": 45}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["churn_threshold_days"], 45);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = app.get(&format!("/organizations/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Acme");
}

#[tokio::test]
async fn test_unknown_organization_is_404() {
    let app = TestApp::new().await;
    let (status, body) = app
        .get("/organizations/00000000-0000-0000-0000-000000000000")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_organization_rejects_empty_name() {
    let app = TestApp::new().await;
    let (status, body) = app.post_json("/organizations", json!({"name": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_FORMAT");
}

// =============================================================================
// Dataset upload and feature processing
// =============================================================================

#[tokio::test]
async fn test_upload_rejects_missing_columns() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, body) = app
        .post_file(
            &format!("/organizations/{}/datasets/upload", org),
            "bad.csv",
            "customer_id,amount\nC1,10.0\n",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_FORMAT");
}

#[tokio::test]
async fn test_upload_with_label_flag_requires_label_column() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, _) = app
        .post_file(
            &format!(
                "/organizations/{}/datasets/upload?has_churn_label=true",
                org
            ),
            "unlabeled.csv",
            "customer_id,event_date\nC1,2024-01-01\n",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_returns_dataset_record() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, body) = app
        .post_file(
            &format!("/organizations/{}/datasets/upload", org),
            "transactions.csv",
            "customer_id,event_date,amount\nC1,2024-01-01,10.0\nC2,2024-02-01,20.0\n",
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "raw");
    assert_eq!(body["status"], "uploaded");
    assert_eq!(body["row_count"], 2);
    assert_eq!(body["active"], true);
    assert_eq!(body["filename"], "transactions.csv");
}

#[tokio::test]
async fn test_process_features_without_dataset_is_404() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, _) = app
        .post_json(
            &format!("/organizations/{}/datasets/process-features", org),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_feature_processing_is_exclusive_per_org() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    let org_id = org.parse().unwrap();

    app.post_file(
        &format!("/organizations/{}/datasets/upload", org),
        "t.csv",
        &training_csv(10),
    )
    .await;

    // Simulate an in-flight job from another request
    let mut job = pulse_churn::models::Job::new(org_id, pulse_churn::models::JobKind::FeatureProcessing);
    job.start();
    pulse_churn::db::jobs::insert(&app.state.db, &job).await.unwrap();
    pulse_churn::db::jobs::update(&app.state.db, &job).await.unwrap();

    let (status, body) = app
        .post_json(
            &format!("/organizations/{}/datasets/process-features", org),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_PROCESSING");
}

#[tokio::test]
async fn test_feature_processing_failure_marks_dataset_and_job() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    // Parses and has the required columns, but the only data row has an
    // invalid date, so the stage itself fails
    app.post_file(
        &format!("/organizations/{}/datasets/upload", org),
        "bad_dates.csv",
        "customer_id,event_date\nC1,not-a-date\n",
    )
    .await;

    let (status, body) = app
        .post_json(
            &format!("/organizations/{}/datasets/process-features", org),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let job = app
        .wait_for_job(&org, body["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "failed");
    assert!(job["error_message"].as_str().unwrap().contains("event_date"));
}

// =============================================================================
// Training
// =============================================================================

#[tokio::test]
async fn test_train_without_feature_set_is_conflict() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, body) = app
        .post_json(&format!("/organizations/{}/train", org), Value::Null)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "FEATURE_SET_NOT_READY");
}

#[tokio::test]
async fn test_train_rejects_unknown_algorithm() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, body) = app
        .post_json(
            &format!("/organizations/{}/train?model_type=neural_network", org),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_FORMAT");
}

#[tokio::test]
async fn test_full_pipeline_trains_and_deploys_model() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    run_pipeline_to_model(&app, &org).await;

    let (status, body) = app
        .get(&format!("/organizations/{}/training-status", org))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["latest_job"]["status"], "succeeded");

    let model = &body["current_model"];
    assert_eq!(model["algorithm"], "logistic_regression");
    let auc = model["metrics"]["roc_auc"].as_f64().unwrap();
    assert!(auc > 0.5, "Model should beat chance, got auc {}", auc);
}

#[tokio::test]
async fn test_training_exclusive_while_job_active() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    let org_id = org.parse().unwrap();
    let mut job = pulse_churn::models::Job::new(org_id, pulse_churn::models::JobKind::Training);
    job.start();
    pulse_churn::db::jobs::insert(&app.state.db, &job).await.unwrap();
    pulse_churn::db::jobs::update(&app.state.db, &job).await.unwrap();

    let (status, body) = app
        .post_json(&format!("/organizations/{}/train", org), Value::Null)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "TRAINING_IN_PROGRESS");
}

#[tokio::test]
async fn test_failed_training_keeps_previous_model() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    let (_, before) = app
        .get(&format!("/organizations/{}/training-status", org))
        .await;
    let model_before = before["current_model"]["id"].as_str().unwrap().to_string();

    // A tiny single-class dataset: feature processing succeeds but
    // training must fail
    app.post_file(
        &format!("/organizations/{}/datasets/upload", org),
        "tiny.csv",
        "customer_id,event_date\nC1,2024-06-01\nC2,2024-06-01\n",
    )
    .await;
    let (_, body) = app
        .post_json(
            &format!("/organizations/{}/datasets/process-features", org),
            Value::Null,
        )
        .await;
    app.wait_for_job(&org, body["job_id"].as_str().unwrap()).await;

    let (status, body) = app
        .post_json(&format!("/organizations/{}/train", org), Value::Null)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = app
        .wait_for_job(&org, body["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "failed");

    // The previous model still serves
    let (_, after) = app
        .get(&format!("/organizations/{}/training-status", org))
        .await;
    assert_eq!(after["current_model"]["id"], model_before.as_str());
}

// =============================================================================
// Prediction
// =============================================================================

#[tokio::test]
async fn test_predict_without_model_is_404() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, body) = app
        .post_json(
            &format!("/organizations/{}/predict", org),
            json!({
                "customer_id": "C1",
                "transactions": [{"event_date": "2024-01-01", "amount": 10.0}]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "MODEL_NOT_FOUND");
}

#[tokio::test]
async fn test_predict_scores_customer() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    let (status, body) = app
        .post_json(
            &format!("/organizations/{}/predict", org),
            json!({
                "customer_id": "X9",
                "transactions": [
                    {"event_date": "2024-05-01", "amount": 40.0},
                    {"event_date": "2024-06-01", "amount": 55.0}
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["customer_id"], "X9");

    let p = body["churn_probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&p));
    assert!(["Low", "Medium", "High", "Critical"]
        .contains(&body["risk_segment"].as_str().unwrap()));
}

#[tokio::test]
async fn test_predict_rejects_empty_transactions() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    let (status, _) = app
        .post_json(
            &format!("/organizations/{}/predict", org),
            json!({"customer_id": "C1", "transactions": []}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bulk_prediction_counts_partial_failures() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    // 4 scorable customers, one with an unparseable date
    let input = "customer_id,event_date,amount\n\
                 B1,2024-06-01,10.0\n\
                 B2,2024-05-15,20.0\n\
                 B3,bogus,30.0\n\
                 B4,2024-04-01,40.0\n\
                 B5,2024-03-01,50.0\n\
                 B1,2024-05-01,15.0\n";
    let (status, body) = app
        .post_file(
            &format!("/organizations/{}/predict-bulk", org),
            "batch.csv",
            input,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let batch_id = body["batch_id"].as_str().unwrap().to_string();

    let job = app
        .wait_for_job(&org, body["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "succeeded");

    let (status, batch) = app
        .get(&format!("/organizations/{}/batches/{}", org, batch_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["status"], "succeeded");
    // Distinct customers, not input rows
    assert_eq!(batch["rows_total"], 5);
    assert_eq!(batch["rows_succeeded"], 4);
    assert_eq!(batch["rows_failed"], 1);
    assert!(batch["avg_churn_probability"].is_number());
    assert!(batch["risk_distribution"].is_object());
}

#[tokio::test]
async fn test_batch_predictions_paginate_in_input_order() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    let input = "customer_id,event_date,amount\n\
                 B1,2024-06-01,10.0\n\
                 B2,2024-05-15,20.0\n\
                 B3,2024-05-01,30.0\n\
                 B4,2024-04-01,40.0\n";
    let (_, body) = app
        .post_file(
            &format!("/organizations/{}/predict-bulk", org),
            "batch.csv",
            input,
        )
        .await;
    let batch_id = body["batch_id"].as_str().unwrap().to_string();
    app.wait_for_job(&org, body["job_id"].as_str().unwrap()).await;

    let (status, page1) = app
        .get(&format!(
            "/organizations/{}/batches/{}/predictions?limit=2&offset=0",
            org, batch_id
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page1["total"], 4);
    let ids: Vec<&str> = page1["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["external_customer_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["B1", "B2"]);

    let (_, page2) = app
        .get(&format!(
            "/organizations/{}/batches/{}/predictions?limit=2&offset=2",
            org, batch_id
        ))
        .await;
    let ids: Vec<&str> = page2["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["external_customer_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["B3", "B4"]);
}

#[tokio::test]
async fn test_prediction_customers_filters_by_segment() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    let input = "customer_id,event_date,amount\n\
                 B1,2024-06-01,10.0\n\
                 B2,2024-02-01,20.0\n";
    let (_, body) = app
        .post_file(
            &format!("/organizations/{}/predict-bulk", org),
            "batch.csv",
            input,
        )
        .await;
    app.wait_for_job(&org, body["job_id"].as_str().unwrap()).await;

    let (status, all) = app
        .get(&format!("/organizations/{}/prediction-customers", org))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["total"], 2);

    // Every filtered listing only contains its own segment, and the
    // per-segment totals add up
    let mut filtered_total = 0;
    for segment in ["Low", "Medium", "High", "Critical"] {
        let (status, page) = app
            .get(&format!(
                "/organizations/{}/prediction-customers?risk_segment={}",
                org, segment
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        for item in page["items"].as_array().unwrap() {
            assert_eq!(item["risk_segment"], segment);
        }
        filtered_total += page["total"].as_i64().unwrap();
    }
    assert_eq!(filtered_total, 2);

    let (status, _) = app
        .get(&format!(
            "/organizations/{}/prediction-customers?risk_segment=Extreme",
            org
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bulk_without_model_is_404() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, body) = app
        .post_file(
            &format!("/organizations/{}/predict-bulk", org),
            "batch.csv",
            "customer_id,event_date\nB1,2024-06-01\n",
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "MODEL_NOT_FOUND");
}

// =============================================================================
// Widget content
// =============================================================================

#[tokio::test]
async fn test_widget_message_generates_then_serves_cached() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let uri = format!(
        "/organizations/{}/widget-message?segment=At%20Risk&risk_level=High",
        org
    );
    let (status, body) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "At Risk offer");
    assert_eq!(app.generator.calls.load(Ordering::SeqCst), 1);

    // Second request is a cache hit
    let (status, _) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.generator.calls.load(Ordering::SeqCst), 1);

    // A different risk level is a separate cache key
    let other = format!(
        "/organizations/{}/widget-message?segment=At%20Risk&risk_level=Low",
        org
    );
    let (status, _) = app.get(&other).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.generator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_widget_message_rejects_unknown_risk_level() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, _) = app
        .get(&format!(
            "/organizations/{}/widget-message?segment=Champions&risk_level=Severe",
            org
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Jobs
// =============================================================================

#[tokio::test]
async fn test_unknown_job_is_404() {
    let app = TestApp::new().await;
    let org = app.create_org().await;

    let (status, _) = app
        .get(&format!(
            "/organizations/{}/jobs/00000000-0000-0000-0000-000000000000",
            org
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_is_scoped_to_its_organization() {
    let app = TestApp::new().await;
    let org_a = app.create_org().await;
    let (_, body) = app
        .post_json("/organizations", json!({"name": "Other Org"}))
        .await;
    let org_b = body["id"].as_str().unwrap().to_string();

    app.post_file(
        &format!("/organizations/{}/datasets/upload", org_a),
        "t.csv",
        &training_csv(10),
    )
    .await;
    let (_, body) = app
        .post_json(
            &format!("/organizations/{}/datasets/process-features", org_a),
            Value::Null,
        )
        .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    app.wait_for_job(&org_a, &job_id).await;

    // The other organization cannot see it
    let (status, _) = app
        .get(&format!("/organizations/{}/jobs/{}", org_b, job_id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Restart recovery
// =============================================================================

#[tokio::test]
async fn test_restart_recovery_allows_feature_resubmission() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    let org_id: uuid::Uuid = org.parse().unwrap();

    let (_, uploaded) = app
        .post_file(
            &format!("/organizations/{}/datasets/upload", org),
            "t.csv",
            &training_csv(10),
        )
        .await;
    let dataset_id: uuid::Uuid = uploaded["id"].as_str().unwrap().parse().unwrap();

    // A crash mid-stage leaves a running job and a dataset stuck in
    // feature_processing
    let mut job =
        pulse_churn::models::Job::new(org_id, pulse_churn::models::JobKind::FeatureProcessing);
    job.start();
    pulse_churn::db::jobs::insert(&app.state.db, &job).await.unwrap();
    pulse_churn::db::datasets::set_status(
        &app.state.db,
        dataset_id,
        pulse_churn::models::DatasetStatus::FeatureProcessing,
        None,
    )
    .await
    .unwrap();

    // What startup does before serving
    assert_eq!(
        pulse_churn::db::jobs::cleanup_stale(&app.state.db).await.unwrap(),
        1
    );
    assert_eq!(
        pulse_churn::db::datasets::cleanup_stale(&app.state.db).await.unwrap(),
        1
    );
    pulse_churn::db::batches::cleanup_stale(&app.state.db).await.unwrap();

    // Resubmission is accepted and runs to completion
    let (status, body) = app
        .post_json(
            &format!("/organizations/{}/datasets/process-features", org),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = app
        .wait_for_job(&org, body["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "succeeded");
}

#[tokio::test]
async fn test_restart_marks_stale_batch_failed() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    let org_id: uuid::Uuid = org.parse().unwrap();

    let batch = pulse_churn::models::PredictionBatch::new(
        org_id,
        "stranded.csv".to_string(),
        "orphaned-key".to_string(),
        0,
    );
    pulse_churn::db::batches::insert(&app.state.db, &batch).await.unwrap();

    assert_eq!(
        pulse_churn::db::batches::cleanup_stale(&app.state.db).await.unwrap(),
        1
    );

    let (status, body) = app
        .get(&format!("/organizations/{}/batches/{}", org, batch.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert!(body["error_message"].as_str().unwrap().contains("restarted"));
}

#[tokio::test]
async fn test_schema_allows_one_active_job_per_kind() {
    let db = pulse_churn::db::connect_in_memory().await.unwrap();
    let org_id = uuid::Uuid::new_v4();

    let first =
        pulse_churn::models::Job::new(org_id, pulse_churn::models::JobKind::Training);
    pulse_churn::db::jobs::insert(&db, &first).await.unwrap();

    // A second active job of the same kind is rejected by the schema even
    // if the handler-level check were raced past
    let second =
        pulse_churn::models::Job::new(org_id, pulse_churn::models::JobKind::Training);
    assert!(pulse_churn::db::jobs::insert(&db, &second).await.is_err());

    // Other kinds are independent
    let bulk =
        pulse_churn::models::Job::new(org_id, pulse_churn::models::JobKind::BulkPrediction);
    pulse_churn::db::jobs::insert(&db, &bulk).await.unwrap();

    // Once the first reaches a terminal state, resubmission is possible
    let mut first = first;
    first.fail("interrupted");
    pulse_churn::db::jobs::update(&db, &first).await.unwrap();
    let third =
        pulse_churn::models::Job::new(org_id, pulse_churn::models::JobKind::Training);
    pulse_churn::db::jobs::insert(&db, &third).await.unwrap();
}

// =============================================================================
// Bulk edge cases
// =============================================================================

#[tokio::test]
async fn test_bulk_prediction_fails_when_no_rows_score() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    run_pipeline_to_model(&app, &org).await;

    // Every customer has at least one unparseable date, so nothing scores
    let input = "customer_id,event_date,amount\n\
                 B1,2024-06-01,10.0\n\
                 B1,bogus,15.0\n\
                 B2,also-bogus,20.0\n";
    let (status, body) = app
        .post_file(
            &format!("/organizations/{}/predict-bulk", org),
            "batch.csv",
            input,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let batch_id = body["batch_id"].as_str().unwrap().to_string();

    let job = app
        .wait_for_job(&org, body["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "failed");
    assert!(job["error_message"]
        .as_str()
        .unwrap()
        .contains("No rows could be scored"));

    let (_, batch) = app
        .get(&format!("/organizations/{}/batches/{}", org, batch_id))
        .await;
    assert_eq!(batch["status"], "failed");
    assert_eq!(batch["rows_total"], 2);
    assert_eq!(batch["rows_succeeded"], 0);
    assert_eq!(batch["rows_failed"], 2);
    assert!(batch["error_message"].is_string());
}

#[tokio::test]
async fn test_batch_pagination_stable_while_appending() {
    let app = TestApp::new().await;
    let org = app.create_org().await;
    let org_id: uuid::Uuid = org.parse().unwrap();
    run_pipeline_to_model(&app, &org).await;

    let input = "customer_id,event_date,amount\n\
                 B1,2024-06-01,10.0\n\
                 B2,2024-05-15,20.0\n\
                 B3,2024-05-01,30.0\n";
    let (_, body) = app
        .post_file(
            &format!("/organizations/{}/predict-bulk", org),
            "batch.csv",
            input,
        )
        .await;
    let batch_id = body["batch_id"].as_str().unwrap().to_string();
    app.wait_for_job(&org, body["job_id"].as_str().unwrap()).await;

    let page_uri = format!(
        "/organizations/{}/batches/{}/predictions?limit=2&offset=0",
        org, batch_id
    );
    let (_, before) = app.get(&page_uri).await;
    let first_page: Vec<String> = before["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["external_customer_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(first_page, vec!["B1", "B2"]);

    // More records arriving does not reorder what a client already paged
    let appended = pulse_churn::models::PredictionRecord {
        batch_id: batch_id.parse().unwrap(),
        seq: 3,
        organization_id: org_id,
        external_customer_id: "B4".to_string(),
        churn_probability: 0.5,
        risk_segment: RiskSegment::High,
        features: json!({}),
        predicted_at: chrono::Utc::now(),
    };
    pulse_churn::db::batches::insert_record(&app.state.db, &appended)
        .await
        .unwrap();

    let (_, after) = app.get(&page_uri).await;
    assert_eq!(after["total"], 4);
    let same_page: Vec<String> = after["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["external_customer_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(same_page, first_page);

    // The appended record shows up at the end, not in the middle
    let (_, tail) = app
        .get(&format!(
            "/organizations/{}/batches/{}/predictions?limit=2&offset=2",
            org, batch_id
        ))
        .await;
    let ids: Vec<&str> = tail["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["external_customer_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["B3", "B4"]);
}
