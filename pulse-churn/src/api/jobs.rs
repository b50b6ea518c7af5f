//! Job polling endpoint
//!
//! All three background stages surface the same job record shape; clients
//! poll here after receiving 202 from a submission endpoint.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::api::organizations::require_organization;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::Job;
use crate::AppState;

/// GET /organizations/:org_id/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path((org_id, job_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Job>> {
    require_organization(&state, org_id).await?;

    let job = db::jobs::get(&state.db, job_id)
        .await?
        .filter(|j| j.organization_id == org_id)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    Ok(Json(job))
}

pub fn job_routes() -> Router<AppState> {
    Router::new().route("/organizations/:org_id/jobs/:job_id", get(get_job))
}
