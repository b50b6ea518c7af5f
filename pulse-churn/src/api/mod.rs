//! HTTP API handlers

pub mod content;
pub mod datasets;
pub mod health;
pub mod jobs;
pub mod organizations;
pub mod predictions;
pub mod training;

pub use content::content_routes;
pub use datasets::dataset_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use organizations::organization_routes;
pub use predictions::prediction_routes;
pub use training::training_routes;

/// Pagination query parameters shared by the listing endpoints
#[derive(Debug, serde::Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    const DEFAULT_LIMIT: i64 = 50;
    const MAX_LIMIT: i64 = 500;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
