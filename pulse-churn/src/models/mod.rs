//! Domain model types for the churn pipeline

pub mod dataset;
pub mod features;
pub mod job;
pub mod prediction;
pub mod training;

pub use dataset::{Dataset, DatasetKind, DatasetStatus};
pub use features::{FeatureRow, FeatureVector, FEATURE_COLUMNS};
pub use job::{Job, JobKind, JobStatus};
pub use prediction::{CustomerPayload, PredictionBatch, PredictionRecord, TransactionInput};
pub use training::{ModelAlgorithm, ModelMetrics, TrainedModel};
