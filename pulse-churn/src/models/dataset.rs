//! Uploaded dataset lifecycle
//!
//! A raw dataset progresses uploaded → feature_processing → ready (or
//! failed). Exactly one raw dataset per organization is active at a time;
//! uploading a new one supersedes the previous, which is retained for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What a dataset row holds: raw transactions or a derived feature set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Raw,
    Features,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Raw => "raw",
            DatasetKind::Features => "features",
        }
    }
}

impl FromStr for DatasetKind {
    type Err = pulse_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(DatasetKind::Raw),
            "features" => Ok(DatasetKind::Features),
            other => Err(pulse_common::Error::Decode(format!(
                "Unknown dataset kind: {}",
                other
            ))),
        }
    }
}

/// Dataset processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    Uploaded,
    FeatureProcessing,
    Ready,
    Failed,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Uploaded => "uploaded",
            DatasetStatus::FeatureProcessing => "feature_processing",
            DatasetStatus::Ready => "ready",
            DatasetStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetStatus {
    type Err = pulse_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DatasetStatus::Uploaded),
            "feature_processing" => Ok(DatasetStatus::FeatureProcessing),
            "ready" => Ok(DatasetStatus::Ready),
            "failed" => Ok(DatasetStatus::Failed),
            other => Err(pulse_common::Error::Decode(format!(
                "Unknown dataset status: {}",
                other
            ))),
        }
    }
}

/// One uploaded snapshot of customer transaction history (or its derived
/// feature set)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub kind: DatasetKind,
    /// Object key in the dataset store
    pub storage_key: String,
    pub filename: String,
    pub row_count: i64,
    pub has_label: bool,
    pub status: DatasetStatus,
    pub error_message: Option<String>,
    /// Whether this is the organization's active dataset of its kind
    pub active: bool,
    pub uploaded_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new_raw(
        organization_id: Uuid,
        storage_key: String,
        filename: String,
        row_count: i64,
        has_label: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            kind: DatasetKind::Raw,
            storage_key,
            filename,
            row_count,
            has_label,
            status: DatasetStatus::Uploaded,
            error_message: None,
            active: true,
            uploaded_at: Utc::now(),
        }
    }

    pub fn new_features(
        organization_id: Uuid,
        storage_key: String,
        filename: String,
        row_count: i64,
        has_label: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            kind: DatasetKind::Features,
            storage_key,
            filename,
            row_count,
            has_label,
            status: DatasetStatus::Ready,
            error_message: None,
            active: true,
            uploaded_at: Utc::now(),
        }
    }
}
