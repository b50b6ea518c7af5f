//! Scoring customers against the current model
//!
//! The single-prediction path: derive features from the submitted
//! transaction history, run the artifact, map the probability to a risk
//! segment. Bulk scoring goes through the pipeline module but converges on
//! the same probability rounding and segment mapping here.

use pulse_common::{Result, RiskSegment, RiskThresholds};
use serde::Serialize;

use crate::models::{CustomerPayload, FeatureVector};
use crate::services::feature_engineering;
use crate::services::model::ModelArtifact;

/// One scored customer
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCustomer {
    pub customer_id: String,
    pub churn_probability: f64,
    pub risk_segment: RiskSegment,
    pub features: FeatureVector,
}

/// Probabilities are reported with 4 decimal places
pub fn round_probability(p: f64) -> f64 {
    (p * 10_000.0).round() / 10_000.0
}

/// Score a feature vector that has already been derived
pub fn score_features(
    artifact: &ModelArtifact,
    customer_id: &str,
    features: FeatureVector,
    thresholds: &RiskThresholds,
) -> ScoredCustomer {
    let probability = round_probability(artifact.predict_proba(&features.to_array()));
    ScoredCustomer {
        customer_id: customer_id.to_string(),
        churn_probability: probability,
        risk_segment: thresholds.segment_for(probability),
        features,
    }
}

/// Score one customer from their raw transaction history
pub fn score_payload(
    artifact: &ModelArtifact,
    payload: &CustomerPayload,
    thresholds: &RiskThresholds,
    lookback_days: i64,
) -> Result<ScoredCustomer> {
    let transactions: Vec<_> = payload
        .transactions
        .iter()
        .map(|t| (t.event_date, t.amount.unwrap_or(0.0)))
        .collect();
    let features = feature_engineering::single_customer_features(&transactions, lookback_days)?;
    Ok(score_features(
        artifact,
        &payload.customer_id,
        features,
        thresholds,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionInput;
    use crate::services::model::Standardizer;
    use chrono::NaiveDate;

    fn recency_model() -> ModelArtifact {
        // High recency pushes probability down
        let mut weights = vec![0.0; 8];
        weights[0] = -0.1;
        ModelArtifact::Logistic {
            scaler: Standardizer {
                means: vec![0.0; 8],
                stds: vec![1.0; 8],
            },
            weights,
            bias: 2.0,
        }
    }

    fn payload(dates: &[&str]) -> CustomerPayload {
        CustomerPayload {
            customer_id: "C1".to_string(),
            transactions: dates
                .iter()
                .map(|d| TransactionInput {
                    event_date: NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap(),
                    amount: Some(10.0),
                    event_type: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_score_payload_maps_segment() {
        let model = recency_model();
        let thresholds = RiskThresholds::default();
        let scored =
            score_payload(&model, &payload(&["2024-01-01", "2024-02-01"]), &thresholds, 90)
                .unwrap();
        assert_eq!(scored.customer_id, "C1");
        assert!(scored.churn_probability >= 0.0 && scored.churn_probability <= 1.0);
        assert_eq!(
            scored.risk_segment,
            thresholds.segment_for(scored.churn_probability)
        );
    }

    #[test]
    fn test_empty_transactions_rejected() {
        let model = recency_model();
        let thresholds = RiskThresholds::default();
        let empty = CustomerPayload {
            customer_id: "C1".to_string(),
            transactions: vec![],
        };
        assert!(score_payload(&model, &empty, &thresholds, 90).is_err());
    }

    #[test]
    fn test_probability_is_rounded() {
        assert_eq!(round_probability(0.123456), 0.1235);
        assert_eq!(round_probability(1.0), 1.0);
    }
}
