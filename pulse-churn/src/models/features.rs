//! Canonical per-customer feature schema
//!
//! The fixed 8-column vector every trained model expects, in this order.
//! Training and scoring both go through this type, so the column ordering is
//! defined exactly once.

use serde::{Deserialize, Serialize};

/// Feature column names in model input order
pub const FEATURE_COLUMNS: [&str; 8] = [
    "recency_score",
    "frequency_score",
    "monetary_score",
    "engagement_score",
    "tenure_days",
    "activity_trend",
    "avg_transaction_value",
    "days_between_transactions",
];

/// Derived numeric representation of one customer's transaction history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Days since last activity, normalized to 0-100 (higher = more recent)
    pub recency_score: f64,
    /// Transaction count in the lookback window, normalized to 0-100
    pub frequency_score: f64,
    /// Spend in the lookback window against the dataset's p95 reference
    pub monetary_score: f64,
    /// Composite of recent activity, tenure, and trend, 0-100
    pub engagement_score: f64,
    /// Days between first and last transaction
    pub tenure_days: f64,
    /// Slope of daily activity over the last 30 days
    pub activity_trend: f64,
    pub avg_transaction_value: f64,
    pub days_between_transactions: f64,
}

impl FeatureVector {
    /// Values in [`FEATURE_COLUMNS`] order
    pub fn to_array(&self) -> [f64; 8] {
        [
            self.recency_score,
            self.frequency_score,
            self.monetary_score,
            self.engagement_score,
            self.tenure_days,
            self.activity_trend,
            self.avg_transaction_value,
            self.days_between_transactions,
        ]
    }

    pub fn from_array(values: [f64; 8]) -> Self {
        Self {
            recency_score: values[0],
            frequency_score: values[1],
            monetary_score: values[2],
            engagement_score: values[3],
            tenure_days: values[4],
            activity_trend: values[5],
            avg_transaction_value: values[6],
            days_between_transactions: values[7],
        }
    }

    /// All-zero vector for customers with no usable transactions
    pub fn zeroed() -> Self {
        Self::from_array([0.0; 8])
    }
}

/// One customer's feature row in a feature set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub customer_id: String,
    pub features: FeatureVector,
    /// Ground-truth churn label when the source dataset carries one
    pub label: Option<bool>,
}
