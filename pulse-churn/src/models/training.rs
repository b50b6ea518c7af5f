//! Training algorithm selection and trained model metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of supported classifier algorithms
///
/// Resolved to a concrete trainer at call time; there is no open-ended
/// plugin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAlgorithm {
    /// Logistic regression on standardized features
    LogisticRegression,
    /// Bagged decision trees
    RandomForest,
    /// Gradient-boosted stumps
    GradientBoosting,
}

impl ModelAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelAlgorithm::LogisticRegression => "logistic_regression",
            ModelAlgorithm::RandomForest => "random_forest",
            ModelAlgorithm::GradientBoosting => "gradient_boosting",
        }
    }

    pub const ALL: [ModelAlgorithm; 3] = [
        ModelAlgorithm::LogisticRegression,
        ModelAlgorithm::RandomForest,
        ModelAlgorithm::GradientBoosting,
    ];
}

impl fmt::Display for ModelAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelAlgorithm {
    type Err = pulse_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logistic_regression" => Ok(ModelAlgorithm::LogisticRegression),
            "random_forest" => Ok(ModelAlgorithm::RandomForest),
            "gradient_boosting" => Ok(ModelAlgorithm::GradientBoosting),
            other => Err(pulse_common::Error::InvalidInput(format!(
                "Invalid model_type '{}'. Must be one of: logistic_regression, random_forest, gradient_boosting",
                other
            ))),
        }
    }
}

/// Held-out evaluation metrics for a trained model
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub roc_auc: f64,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Positive-class fraction across the whole feature set
    pub churn_rate: f64,
}

/// Immutable trained model row
///
/// The fitted artifact itself is the serialized
/// [`crate::services::model::ModelArtifact`]; this struct carries its
/// identity and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub algorithm: ModelAlgorithm,
    /// Feature column names, in the order the artifact expects
    pub feature_columns: Vec<String>,
    pub metrics: ModelMetrics,
    pub trained_at: DateTime<Utc>,
}
