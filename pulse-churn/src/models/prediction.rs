//! Prediction batches and records

use super::job::JobStatus;
use chrono::{DateTime, NaiveDate, Utc};
use pulse_common::RiskSegment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One transaction in a single-prediction payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInput {
    /// Transaction date (YYYY-MM-DD)
    pub event_date: NaiveDate,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub event_type: Option<String>,
}

/// Single-prediction request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerPayload {
    pub customer_id: String,
    pub transactions: Vec<TransactionInput>,
}

/// Bulk-prediction job record
///
/// Reuses the job status vocabulary; a batch is the stage-specific face of a
/// bulk-prediction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionBatch {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Object key of the uploaded input file
    pub storage_key: String,
    pub status: JobStatus,
    /// Distinct customers in the input file
    pub rows_total: i64,
    pub rows_succeeded: i64,
    pub rows_failed: i64,
    pub avg_churn_probability: Option<f64>,
    /// Count of records per risk segment
    pub risk_distribution: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PredictionBatch {
    pub fn new(organization_id: Uuid, name: String, storage_key: String, rows_total: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            storage_key,
            status: JobStatus::Queued,
            rows_total,
            rows_succeeded: 0,
            rows_failed: 0,
            avg_churn_probability: None,
            risk_distribution: None,
            error_message: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// One customer's scored result inside a batch
///
/// Immutable after creation. `seq` is the input-file order and gives stable
/// pagination while the batch is still appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub batch_id: Uuid,
    pub seq: i64,
    pub organization_id: Uuid,
    pub external_customer_id: String,
    pub churn_probability: f64,
    pub risk_segment: RiskSegment,
    /// Feature snapshot used for this score
    pub features: serde_json::Value,
    pub predicted_at: DateTime<Utc>,
}
