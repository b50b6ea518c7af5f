//! Generated widget content endpoint

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use pulse_common::RiskSegment;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::organizations::require_organization;
use crate::error::{ApiError, ApiResult};
use crate::services::content_cache;
use crate::services::generation_client::WidgetCopy;
use crate::AppState;

/// Widget message query parameters
#[derive(Debug, Deserialize)]
pub struct WidgetQuery {
    pub segment: String,
    pub risk_level: String,
}

/// GET /organizations/:org_id/widget-message
///
/// Cached generated copy for a (segment, risk level) pair; generates on
/// miss or expiry. 404 when nothing can be produced (generator unavailable
/// and no cached entry).
pub async fn widget_message(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<WidgetQuery>,
) -> ApiResult<Json<WidgetCopy>> {
    require_organization(&state, org_id).await?;

    let segment = query.segment.trim();
    if segment.is_empty() {
        return Err(ApiError::InvalidFormat(
            "segment must not be empty".to_string(),
        ));
    }
    let risk_level = query
        .risk_level
        .parse::<RiskSegment>()
        .map_err(|e| ApiError::InvalidFormat(e.to_string()))?;

    let result = content_cache::get_or_generate(
        &state.db,
        state.generator.as_ref(),
        org_id,
        segment,
        risk_level,
        state.settings.cache_ttl_days,
    )
    .await?;

    match result {
        Some((copy, _)) => Ok(Json(copy)),
        None => Err(ApiError::NotFound(format!(
            "No widget message available for {}/{}",
            segment, risk_level
        ))),
    }
}

pub fn content_routes() -> Router<AppState> {
    Router::new().route(
        "/organizations/:org_id/widget-message",
        get(widget_message),
    )
}
