//! Organization endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db;
use crate::db::organizations::Organization;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Default inactivity window for derived churn labels
const DEFAULT_CHURN_THRESHOLD_DAYS: i64 = 30;

/// POST /organizations request
#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub churn_threshold_days: Option<i64>,
}

/// POST /organizations
pub async fn create_organization(
    State(state): State<AppState>,
    Json(request): Json<CreateOrganizationRequest>,
) -> ApiResult<Json<Organization>> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidFormat(
            "Organization name must not be empty".to_string(),
        ));
    }
    let churn_threshold_days = request
        .churn_threshold_days
        .unwrap_or(DEFAULT_CHURN_THRESHOLD_DAYS);
    if churn_threshold_days < 1 {
        return Err(ApiError::InvalidFormat(
            "churn_threshold_days must be at least 1".to_string(),
        ));
    }

    let org = Organization {
        id: Uuid::new_v4(),
        name: name.to_string(),
        churn_threshold_days,
        current_model_id: None,
        created_at: Utc::now(),
    };
    db::organizations::insert(&state.db, &org).await?;

    tracing::info!("Created organization {} ({})", org.id, org.name);
    Ok(Json(org))
}

/// GET /organizations/:org_id
pub async fn get_organization(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Organization>> {
    let org = db::organizations::get(&state.db, org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Organization not found: {}", org_id)))?;
    Ok(Json(org))
}

pub fn organization_routes() -> Router<AppState> {
    Router::new()
        .route("/organizations", post(create_organization))
        .route("/organizations/:org_id", get(get_organization))
}

/// Load an organization or map its absence to 404
pub async fn require_organization(state: &AppState, org_id: Uuid) -> ApiResult<Organization> {
    db::organizations::get(&state.db, org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Organization not found: {}", org_id)))
}
