//! Background job state machine
//!
//! One generic record shape for all three long-running stage kinds:
//! feature processing, model training, and bulk prediction. Jobs progress
//! queued → running → succeeded | failed; terminal states are final and
//! there are no automatic retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stage kind a job executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FeatureProcessing,
    Training,
    BulkPrediction,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::FeatureProcessing => "feature_processing",
            JobKind::Training => "training",
            JobKind::BulkPrediction => "bulk_prediction",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = pulse_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feature_processing" => Ok(JobKind::FeatureProcessing),
            "training" => Ok(JobKind::Training),
            "bulk_prediction" => Ok(JobKind::BulkPrediction),
            other => Err(pulse_common::Error::Decode(format!(
                "Unknown job kind: {}",
                other
            ))),
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = pulse_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(pulse_common::Error::Decode(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }
}

/// One background stage execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Total work items, once known (0 until the stage counts its input)
    pub total_items: i64,
    pub processed_items: i64,
    /// Items that failed without failing the whole stage
    pub failed_items: i64,
    /// Stage-specific output on success (metrics, batch summary, ...)
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(organization_id: Uuid, kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            kind,
            status: JobStatus::Queued,
            total_items: 0,
            processed_items: 0,
            failed_items: 0,
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Transition queued → running
    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition to succeeded with stage-specific output
    pub fn succeed(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Succeeded;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    /// Transition to failed with a retained error message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = Job::new(Uuid::new_v4(), JobKind::Training);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(!job.is_terminal());

        job.start();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(!job.is_terminal());

        job.succeed(serde_json::json!({"accuracy": 0.9}));
        assert!(job.is_terminal());
        assert!(job.finished_at.is_some());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_job_failure_retains_message() {
        let mut job = Job::new(Uuid::new_v4(), JobKind::FeatureProcessing);
        job.start();
        job.fail("dataset disappeared");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("dataset disappeared"));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            JobKind::FeatureProcessing,
            JobKind::Training,
            JobKind::BulkPrediction,
        ] {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
    }
}
