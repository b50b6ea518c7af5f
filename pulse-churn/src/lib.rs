//! pulse-churn library interface
//!
//! Exposes the API surface and services for integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use pulse_common::config::ServiceSettings;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::generation_client::ContentGenerator;
use crate::services::model_store::ModelRegistry;
use crate::storage::DatasetStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Object storage for uploaded and derived files
    pub store: Arc<dyn DatasetStore>,
    /// External content generator for widget copy
    pub generator: Arc<dyn ContentGenerator>,
    /// Per-organization current models
    pub models: ModelRegistry,
    /// Resolved service configuration
    pub settings: Arc<ServiceSettings>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        store: Arc<dyn DatasetStore>,
        generator: Arc<dyn ContentGenerator>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            db,
            store,
            generator,
            models: ModelRegistry::new(),
            settings: Arc::new(settings),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::organization_routes())
        .merge(api::dataset_routes())
        .merge(api::training_routes())
        .merge(api::prediction_routes())
        .merge(api::content_routes())
        .merge(api::job_routes())
        .merge(api::health_routes())
        .with_state(state)
}
