//! Fitted model artifacts
//!
//! The serializable form of a trained classifier. Artifacts are
//! self-contained: everything needed to score a feature vector (including
//! the fitted scaler for logistic models) serializes to JSON and round-trips
//! through the models table. Scoring is pure and infallible.

use serde::{Deserialize, Serialize};

/// Per-feature standardization fitted on the training split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardizer {
    /// Fit means and standard deviations over rows of feature vectors
    pub fn fit(rows: &[[f64; 8]]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; 8];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut stds = vec![0.0; 8];
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m) * (v - m) / n;
            }
        }
        for s in &mut stds {
            *s = s.sqrt();
            // Constant columns pass through unscaled
            if *s == 0.0 {
                *s = 1.0;
            }
        }
        Self { means, stds }
    }

    pub fn transform(&self, x: &[f64; 8]) -> [f64; 8] {
        let mut out = [0.0; 8];
        for i in 0..8 {
            out[i] = (x[i] - self.means[i]) / self.stds[i];
        }
        out
    }
}

/// One decision tree, stored as a recursive node structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Churn probability at a leaf
    Leaf { value: f64 },
    /// Binary split: `feature <= threshold` goes left
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn predict(&self, x: &[f64; 8]) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if x[*feature] <= *threshold {
                    left.predict(x)
                } else {
                    right.predict(x)
                }
            }
        }
    }
}

/// Depth-one regression tree used as a boosting weak learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    /// Additive log-odds adjustment when `feature <= threshold`
    pub left_value: f64,
    pub right_value: f64,
}

impl Stump {
    pub fn predict(&self, x: &[f64; 8]) -> f64 {
        if x[self.feature] <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

/// Serialized form of a fitted classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Logistic {
        scaler: Standardizer,
        weights: Vec<f64>,
        bias: f64,
    },
    Forest {
        trees: Vec<TreeNode>,
    },
    Boosted {
        /// Log-odds of the training base rate
        base_score: f64,
        learning_rate: f64,
        stumps: Vec<Stump>,
    },
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl ModelArtifact {
    /// Churn probability in [0, 1] for one feature vector
    pub fn predict_proba(&self, x: &[f64; 8]) -> f64 {
        match self {
            ModelArtifact::Logistic {
                scaler,
                weights,
                bias,
            } => {
                let scaled = scaler.transform(x);
                let z: f64 = scaled
                    .iter()
                    .zip(weights)
                    .map(|(v, w)| v * w)
                    .sum::<f64>()
                    + bias;
                sigmoid(z)
            }
            ModelArtifact::Forest { trees } => {
                if trees.is_empty() {
                    return 0.5;
                }
                trees.iter().map(|t| t.predict(x)).sum::<f64>() / trees.len() as f64
            }
            ModelArtifact::Boosted {
                base_score,
                learning_rate,
                stumps,
            } => {
                let z = base_score
                    + learning_rate * stumps.iter().map(|s| s.predict(x)).sum::<f64>();
                sigmoid(z)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardizer_centers_and_scales() {
        let rows = vec![[0.0; 8], [2.0; 8]];
        let s = Standardizer::fit(&rows);
        assert_eq!(s.means[0], 1.0);
        assert_eq!(s.stds[0], 1.0);
        let t = s.transform(&[2.0; 8]);
        assert_eq!(t[0], 1.0);
    }

    #[test]
    fn test_standardizer_constant_column_passes_through() {
        let rows = vec![[5.0; 8], [5.0; 8]];
        let s = Standardizer::fit(&rows);
        let t = s.transform(&[5.0; 8]);
        assert_eq!(t[0], 0.0);
    }

    #[test]
    fn test_tree_routes_on_threshold() {
        let tree = TreeNode::Split {
            feature: 2,
            threshold: 10.0,
            left: Box::new(TreeNode::Leaf { value: 0.1 }),
            right: Box::new(TreeNode::Leaf { value: 0.9 }),
        };
        let mut x = [0.0; 8];
        x[2] = 5.0;
        assert_eq!(tree.predict(&x), 0.1);
        x[2] = 15.0;
        assert_eq!(tree.predict(&x), 0.9);
    }

    #[test]
    fn test_logistic_probability_bounds() {
        let artifact = ModelArtifact::Logistic {
            scaler: Standardizer {
                means: vec![0.0; 8],
                stds: vec![1.0; 8],
            },
            weights: vec![10.0; 8],
            bias: 0.0,
        };
        let p = artifact.predict_proba(&[100.0; 8]);
        assert!(p > 0.999 && p <= 1.0);
        let p = artifact.predict_proba(&[-100.0; 8]);
        assert!(p < 0.001 && p >= 0.0);
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let artifact = ModelArtifact::Boosted {
            base_score: -0.4,
            learning_rate: 0.1,
            stumps: vec![Stump {
                feature: 0,
                threshold: 50.0,
                left_value: 1.2,
                right_value: -0.8,
            }],
        };
        let json = serde_json::to_string(&artifact).unwrap();
        let back: ModelArtifact = serde_json::from_str(&json).unwrap();
        let x = [25.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(artifact.predict_proba(&x), back.predict_proba(&x));
    }
}
