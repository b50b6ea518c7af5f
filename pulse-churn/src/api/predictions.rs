//! Prediction endpoints: single, bulk, and result listings

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use pulse_common::RiskSegment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::datasets::read_file_field;
use crate::api::organizations::require_organization;
use crate::api::Pagination;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{CustomerPayload, Job, JobKind, PredictionBatch, PredictionRecord};
use crate::services::{pipeline, predictor};
use crate::storage;
use crate::AppState;

/// POST /organizations/:org_id/predict
///
/// Synchronous single-customer scoring against the current model.
pub async fn predict(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(payload): Json<CustomerPayload>,
) -> ApiResult<Json<predictor::ScoredCustomer>> {
    require_organization(&state, org_id).await?;

    if payload.customer_id.trim().is_empty() {
        return Err(ApiError::InvalidFormat(
            "customer_id must not be empty".to_string(),
        ));
    }
    if payload.transactions.is_empty() {
        return Err(ApiError::InvalidFormat(
            "At least one transaction is required".to_string(),
        ));
    }

    let model = state.models.current(org_id).await.ok_or_else(|| {
        ApiError::ModelNotFound(
            "No trained model is deployed for this organization".to_string(),
        )
    })?;

    let scored = predictor::score_payload(
        &model.artifact,
        &payload,
        &state.settings.risk_thresholds,
        state.settings.lookback_days,
    )
    .map_err(|e| ApiError::InvalidFormat(e.to_string()))?;

    Ok(Json(scored))
}

/// Bulk submission query parameters
#[derive(Debug, Deserialize)]
pub struct BulkQuery {
    /// Display name for the batch; defaults to the uploaded filename
    pub name: Option<String>,
}

/// POST /organizations/:org_id/predict-bulk response
#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub batch_id: Uuid,
    pub job_id: Uuid,
}

/// POST /organizations/:org_id/predict-bulk
///
/// Multipart upload of a transaction CSV scored asynchronously. Returns 202
/// with the batch and job identifiers.
pub async fn predict_bulk(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<BulkQuery>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<BulkResponse>)> {
    require_organization(&state, org_id).await?;

    if state.models.current(org_id).await.is_none() {
        return Err(ApiError::ModelNotFound(
            "No trained model is deployed for this organization".to_string(),
        ));
    }
    if db::jobs::has_active(&state.db, org_id, JobKind::BulkPrediction).await? {
        return Err(ApiError::AlreadyProcessing(
            "A bulk prediction job is already queued or running for this organization".to_string(),
        ));
    }

    let (filename, bytes) = read_file_field(&mut multipart).await?;

    // Structural validation happens synchronously; per-row problems are
    // handled inside the stage
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| ApiError::InvalidFormat("File is not valid UTF-8".to_string()))?;
    let table = pulse_common::csv::parse(text).map_err(|e| ApiError::InvalidFormat(e.to_string()))?;
    table
        .require_columns(&["customer_id", "event_date"])
        .map_err(|e| ApiError::InvalidFormat(e.to_string()))?;
    if table.rows.is_empty() {
        return Err(ApiError::InvalidFormat("File has no data rows".to_string()));
    }

    let name = query.name.unwrap_or_else(|| filename.clone());
    let batch = PredictionBatch::new(org_id, name, String::new(), 0);
    let key = storage::bulk_input_key(org_id, batch.id);
    let batch = PredictionBatch {
        storage_key: key.clone(),
        ..batch
    };

    state.store.put(&key, bytes).await?;
    db::batches::insert(&state.db, &batch).await?;

    let job = Job::new(org_id, JobKind::BulkPrediction);
    db::jobs::insert(&state.db, &job).await?;

    let response = BulkResponse {
        batch_id: batch.id,
        job_id: job.id,
    };
    pipeline::spawn_bulk_prediction(state, job, batch);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Paginated listing envelope
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<T>,
}

/// GET /organizations/:org_id/batches
pub async fn list_batches(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<PredictionBatch>>> {
    require_organization(&state, org_id).await?;

    let (total, items) =
        db::batches::list(&state.db, org_id, page.limit(), page.offset()).await?;
    Ok(Json(Page {
        total,
        limit: page.limit(),
        offset: page.offset(),
        items,
    }))
}

/// GET /organizations/:org_id/batches/:batch_id
pub async fn get_batch(
    State(state): State<AppState>,
    Path((org_id, batch_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<PredictionBatch>> {
    require_organization(&state, org_id).await?;

    let batch = db::batches::get(&state.db, org_id, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch not found: {}", batch_id)))?;
    Ok(Json(batch))
}

/// GET /organizations/:org_id/batches/:batch_id/predictions
///
/// Records in input order; pagination is stable even while the batch is
/// still appending.
pub async fn list_batch_predictions(
    State(state): State<AppState>,
    Path((org_id, batch_id)): Path<(Uuid, Uuid)>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Page<PredictionRecord>>> {
    require_organization(&state, org_id).await?;

    db::batches::get(&state.db, org_id, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch not found: {}", batch_id)))?;

    let (total, items) =
        db::batches::list_records(&state.db, batch_id, page.limit(), page.offset()).await?;
    Ok(Json(Page {
        total,
        limit: page.limit(),
        offset: page.offset(),
        items,
    }))
}

/// Customer listing query parameters
#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    pub risk_segment: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /organizations/:org_id/prediction-customers
///
/// Cross-batch scored customers, newest first, optionally filtered by risk
/// segment.
pub async fn list_prediction_customers(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<CustomerQuery>,
) -> ApiResult<Json<Page<PredictionRecord>>> {
    require_organization(&state, org_id).await?;

    let risk_segment = query
        .risk_segment
        .as_deref()
        .map(|raw| {
            raw.parse::<RiskSegment>()
                .map_err(|e| ApiError::InvalidFormat(e.to_string()))
        })
        .transpose()?;

    let page = Pagination {
        limit: query.limit,
        offset: query.offset,
    };
    let (total, items) = db::batches::list_customers(
        &state.db,
        org_id,
        risk_segment,
        page.limit(),
        page.offset(),
    )
    .await?;

    Ok(Json(Page {
        total,
        limit: page.limit(),
        offset: page.offset(),
        items,
    }))
}

pub fn prediction_routes() -> Router<AppState> {
    Router::new()
        .route("/organizations/:org_id/predict", post(predict))
        .route("/organizations/:org_id/predict-bulk", post(predict_bulk))
        .route("/organizations/:org_id/batches", get(list_batches))
        .route("/organizations/:org_id/batches/:batch_id", get(get_batch))
        .route(
            "/organizations/:org_id/batches/:batch_id/predictions",
            get(list_batch_predictions),
        )
        .route(
            "/organizations/:org_id/prediction-customers",
            get(list_prediction_customers),
        )
}
