//! Churn risk segmentation
//!
//! Maps churn probabilities to discrete risk segments via configurable
//! thresholds. Segments are used both for prediction display and as part of
//! the generated-content cache key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discretized churn-probability bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskSegment {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskSegment::Low => "Low",
            RiskSegment::Medium => "Medium",
            RiskSegment::High => "High",
            RiskSegment::Critical => "Critical",
        }
    }

    /// All segments, lowest risk first
    pub const ALL: [RiskSegment; 4] = [
        RiskSegment::Low,
        RiskSegment::Medium,
        RiskSegment::High,
        RiskSegment::Critical,
    ];
}

impl fmt::Display for RiskSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskSegment {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(RiskSegment::Low),
            "Medium" => Ok(RiskSegment::Medium),
            "High" => Ok(RiskSegment::High),
            "Critical" => Ok(RiskSegment::Critical),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown risk segment: {}",
                other
            ))),
        }
    }
}

/// Probability thresholds for risk segmentation
///
/// A probability p maps to:
/// - Critical when p >= critical
/// - High when p >= high
/// - Medium when p >= medium
/// - Low otherwise
///
/// Thresholds must satisfy 0 < medium < high < critical < 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.5,
            critical: 0.7,
        }
    }
}

impl RiskThresholds {
    /// Validate threshold ordering
    pub fn validate(&self) -> crate::Result<()> {
        let ordered = 0.0 < self.medium
            && self.medium < self.high
            && self.high < self.critical
            && self.critical < 1.0;
        if ordered {
            Ok(())
        } else {
            Err(crate::Error::Config(format!(
                "Risk thresholds must satisfy 0 < medium < high < critical < 1, got {:?}",
                self
            )))
        }
    }

    /// Map a churn probability to its risk segment (total step function)
    pub fn segment_for(&self, probability: f64) -> RiskSegment {
        if probability >= self.critical {
            RiskSegment::Critical
        } else if probability >= self.high {
            RiskSegment::High
        } else if probability >= self.medium {
            RiskSegment::Medium
        } else {
            RiskSegment::Low
        }
    }
}
