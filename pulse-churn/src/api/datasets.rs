//! Dataset upload and feature processing endpoints

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use pulse_common::csv;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::organizations::require_organization;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Dataset, DatasetKind, DatasetStatus, Job, JobKind};
use crate::services::pipeline;
use crate::storage;
use crate::AppState;

/// Upload query parameters
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Whether the file carries a ground-truth churn_label column
    #[serde(default)]
    pub has_churn_label: bool,
}

/// POST /organizations/:org_id/datasets/upload
///
/// Multipart upload of a raw transaction CSV. The file is validated
/// synchronously (parseable, required columns present) and stored as the
/// organization's active raw dataset, superseding any previous one.
pub async fn upload_dataset(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<Dataset>> {
    require_organization(&state, org_id).await?;

    let (filename, bytes) = read_file_field(&mut multipart).await?;

    let text = std::str::from_utf8(&bytes)
        .map_err(|_| ApiError::InvalidFormat("File is not valid UTF-8".to_string()))?;
    let table = csv::parse(text).map_err(|e| ApiError::InvalidFormat(e.to_string()))?;
    table
        .require_columns(&["customer_id", "event_date"])
        .map_err(|e| ApiError::InvalidFormat(e.to_string()))?;
    if query.has_churn_label {
        table
            .require_columns(&["churn_label"])
            .map_err(|e| ApiError::InvalidFormat(e.to_string()))?;
    }
    if table.rows.is_empty() {
        return Err(ApiError::InvalidFormat(
            "File has no data rows".to_string(),
        ));
    }

    let dataset = Dataset::new_raw(
        org_id,
        String::new(),
        filename,
        table.rows.len() as i64,
        query.has_churn_label,
    );
    let key = storage::raw_dataset_key(org_id, dataset.id);
    let dataset = Dataset {
        storage_key: key.clone(),
        ..dataset
    };

    state.store.put(&key, bytes).await?;
    db::datasets::insert_as_active(&state.db, &dataset).await?;

    tracing::info!(
        "Uploaded raw dataset {} for organization {} ({} rows)",
        dataset.id,
        org_id,
        dataset.row_count
    );
    Ok(Json(dataset))
}

/// POST /organizations/:org_id/datasets/process-features response
#[derive(Debug, Serialize)]
pub struct ProcessFeaturesResponse {
    pub job_id: Uuid,
    pub dataset_id: Uuid,
}

/// POST /organizations/:org_id/datasets/process-features
///
/// Start the feature-processing stage against the active raw dataset.
/// Returns 202; progress is observed via the job endpoint.
pub async fn process_features(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ProcessFeaturesResponse>)> {
    require_organization(&state, org_id).await?;

    let dataset = db::datasets::get_active(&state.db, org_id, DatasetKind::Raw)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound("No raw dataset has been uploaded for this organization".to_string())
        })?;

    if db::jobs::has_active(&state.db, org_id, JobKind::FeatureProcessing).await? {
        return Err(ApiError::AlreadyProcessing(
            "A feature-processing job is already queued or running for this organization"
                .to_string(),
        ));
    }
    if dataset.status == DatasetStatus::FeatureProcessing {
        return Err(ApiError::AlreadyProcessing(format!(
            "Dataset {} is already being processed",
            dataset.id
        )));
    }

    let job = Job::new(org_id, JobKind::FeatureProcessing);
    db::jobs::insert(&state.db, &job).await?;

    let response = ProcessFeaturesResponse {
        job_id: job.id,
        dataset_id: dataset.id,
    };
    pipeline::spawn_feature_processing(state, job, dataset);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Extract the uploaded file from a multipart body
pub async fn read_file_field(multipart: &mut Multipart) -> ApiResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidFormat(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .unwrap_or("upload.csv")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidFormat(format!("Failed to read upload: {}", e)))?;
        if bytes.is_empty() {
            return Err(ApiError::InvalidFormat("Uploaded file is empty".to_string()));
        }
        return Ok((filename, bytes.to_vec()));
    }

    Err(ApiError::InvalidFormat(
        "Multipart body must contain a 'file' field".to_string(),
    ))
}

pub fn dataset_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/organizations/:org_id/datasets/upload",
            post(upload_dataset),
        )
        .route(
            "/organizations/:org_id/datasets/process-features",
            post(process_features),
        )
}
