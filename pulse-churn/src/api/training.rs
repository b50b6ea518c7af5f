//! Model training endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::organizations::require_organization;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{DatasetKind, DatasetStatus, Job, JobKind, ModelAlgorithm, TrainedModel};
use crate::services::pipeline;
use crate::AppState;

/// Training query parameters
#[derive(Debug, Deserialize)]
pub struct TrainQuery {
    /// Algorithm to fit; defaults to logistic regression
    pub model_type: Option<String>,
}

/// POST /organizations/:org_id/train response
#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub job_id: Uuid,
    pub algorithm: ModelAlgorithm,
    pub feature_set_id: Uuid,
}

/// POST /organizations/:org_id/train
///
/// Start a training job against the active feature set. Returns 202; the
/// current model keeps serving until the new one is published.
pub async fn start_training(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<TrainQuery>,
) -> ApiResult<(StatusCode, Json<TrainResponse>)> {
    require_organization(&state, org_id).await?;

    let algorithm = match query.model_type.as_deref() {
        Some(raw) => raw
            .parse::<ModelAlgorithm>()
            .map_err(|e| ApiError::InvalidFormat(e.to_string()))?,
        None => ModelAlgorithm::LogisticRegression,
    };

    let feature_set = db::datasets::get_active(&state.db, org_id, DatasetKind::Features)
        .await?
        .filter(|d| d.status == DatasetStatus::Ready)
        .ok_or_else(|| {
            ApiError::FeatureSetNotReady(
                "No processed feature set is available; run feature processing first".to_string(),
            )
        })?;

    if db::jobs::has_active(&state.db, org_id, JobKind::Training).await? {
        return Err(ApiError::TrainingInProgress);
    }

    let job = Job::new(org_id, JobKind::Training);
    db::jobs::insert(&state.db, &job).await?;

    let response = TrainResponse {
        job_id: job.id,
        algorithm,
        feature_set_id: feature_set.id,
    };
    pipeline::spawn_training(state, job, feature_set, algorithm);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /organizations/:org_id/training-status response
#[derive(Debug, Serialize)]
pub struct TrainingStatusResponse {
    /// Most recent training job, if any was ever submitted
    pub latest_job: Option<Job>,
    /// Currently deployed model, if training has ever succeeded
    pub current_model: Option<TrainedModel>,
}

/// GET /organizations/:org_id/training-status
pub async fn training_status(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<TrainingStatusResponse>> {
    require_organization(&state, org_id).await?;

    let latest_job = db::jobs::get_latest(&state.db, org_id, JobKind::Training).await?;
    let current_model = state
        .models
        .current(org_id)
        .await
        .map(|loaded| loaded.meta.clone());

    Ok(Json(TrainingStatusResponse {
        latest_job,
        current_model,
    }))
}

pub fn training_routes() -> Router<AppState> {
    Router::new()
        .route("/organizations/:org_id/train", post(start_training))
        .route(
            "/organizations/:org_id/training-status",
            get(training_status),
        )
}
