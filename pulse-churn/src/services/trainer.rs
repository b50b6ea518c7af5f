//! Model fitting and evaluation
//!
//! Trains one of the three supported classifiers on a labeled feature set
//! and evaluates it on a held-out split. All randomness (shuffling,
//! bootstrap sampling, feature subsets) flows from the configured seed, so
//! training the same feature set twice produces the same artifact and the
//! same metrics.

use pulse_common::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::models::{FeatureRow, ModelAlgorithm, ModelMetrics};
use crate::services::model::{sigmoid, ModelArtifact, Standardizer, Stump, TreeNode};

/// Fewer labeled samples than this cannot produce a meaningful split
const MIN_TRAINING_SAMPLES: usize = 10;

const FOREST_TREES: usize = 100;
const FOREST_MAX_DEPTH: usize = 10;
const FOREST_MIN_SPLIT: usize = 5;
const FEATURES_PER_SPLIT: usize = 3;

const BOOSTING_ROUNDS: usize = 100;
const BOOSTING_LEARNING_RATE: f64 = 0.1;

const LOGISTIC_EPOCHS: usize = 500;
const LOGISTIC_LEARNING_RATE: f64 = 0.1;
const LOGISTIC_L2: f64 = 1e-4;

/// Train a classifier and evaluate it on a stratified held-out split
pub fn train(
    rows: &[FeatureRow],
    algorithm: ModelAlgorithm,
    test_fraction: f64,
    seed: u64,
) -> Result<(ModelArtifact, ModelMetrics)> {
    let mut x: Vec<[f64; 8]> = Vec::with_capacity(rows.len());
    let mut y: Vec<bool> = Vec::with_capacity(rows.len());
    for row in rows {
        let label = row.label.ok_or_else(|| {
            Error::InvalidInput(format!(
                "Feature row for customer {} has no churn label",
                row.customer_id
            ))
        })?;
        x.push(row.features.to_array());
        y.push(label);
    }

    if x.len() < MIN_TRAINING_SAMPLES {
        return Err(Error::InvalidInput(format!(
            "Insufficient data for training: need at least {} labeled samples, got {}",
            MIN_TRAINING_SAMPLES,
            x.len()
        )));
    }
    let positives = y.iter().filter(|l| **l).count();
    if positives == 0 || positives == y.len() {
        return Err(Error::InvalidInput(
            "Training data must contain both churned and retained customers".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let (train_idx, test_idx) = stratified_split(&y, test_fraction, &mut rng);

    let train_x: Vec<[f64; 8]> = train_idx.iter().map(|&i| x[i]).collect();
    let train_y: Vec<bool> = train_idx.iter().map(|&i| y[i]).collect();
    let test_x: Vec<[f64; 8]> = test_idx.iter().map(|&i| x[i]).collect();
    let test_y: Vec<bool> = test_idx.iter().map(|&i| y[i]).collect();

    let artifact = match algorithm {
        ModelAlgorithm::LogisticRegression => fit_logistic(&train_x, &train_y),
        ModelAlgorithm::RandomForest => fit_forest(&train_x, &train_y, &mut rng),
        ModelAlgorithm::GradientBoosting => fit_boosted(&train_x, &train_y),
    };

    let scores: Vec<f64> = test_x.iter().map(|v| artifact.predict_proba(v)).collect();
    let churn_rate = positives as f64 / y.len() as f64;
    let metrics = evaluate(&scores, &test_y, train_x.len(), test_x.len(), churn_rate);

    Ok((artifact, metrics))
}

/// Shuffle within each class, then hold out a fraction of each
///
/// Every class keeps at least one sample on each side when it has two or
/// more, so the test split is never single-class by construction.
fn stratified_split(
    y: &[bool],
    test_fraction: f64,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [false, true] {
        let mut indices: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        indices.shuffle(rng);

        let mut n_test = ((indices.len() as f64) * test_fraction).round() as usize;
        if indices.len() >= 2 {
            n_test = n_test.clamp(1, indices.len() - 1);
        } else {
            n_test = 0;
        }

        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Full-batch gradient descent with balanced class weights
fn fit_logistic(x: &[[f64; 8]], y: &[bool]) -> ModelArtifact {
    let scaler = Standardizer::fit(x);
    let scaled: Vec<[f64; 8]> = x.iter().map(|v| scaler.transform(v)).collect();

    let n = y.len() as f64;
    let n_pos = y.iter().filter(|l| **l).count() as f64;
    let n_neg = n - n_pos;
    let w_pos = n / (2.0 * n_pos.max(1.0));
    let w_neg = n / (2.0 * n_neg.max(1.0));

    let mut weights = vec![0.0; 8];
    let mut bias = 0.0;

    for _ in 0..LOGISTIC_EPOCHS {
        let mut grad_w = vec![0.0; 8];
        let mut grad_b = 0.0;

        for (row, &label) in scaled.iter().zip(y) {
            let z: f64 = row.iter().zip(&weights).map(|(v, w)| v * w).sum::<f64>() + bias;
            let p = sigmoid(z);
            let target = if label { 1.0 } else { 0.0 };
            let class_weight = if label { w_pos } else { w_neg };
            let err = class_weight * (p - target);
            for (g, v) in grad_w.iter_mut().zip(row) {
                *g += err * v;
            }
            grad_b += err;
        }

        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= LOGISTIC_LEARNING_RATE * (g / n + LOGISTIC_L2 * *w);
        }
        bias -= LOGISTIC_LEARNING_RATE * grad_b / n;
    }

    ModelArtifact::Logistic {
        scaler,
        weights,
        bias,
    }
}

/// Bagged depth-limited trees on bootstrap resamples
fn fit_forest(x: &[[f64; 8]], y: &[bool], rng: &mut StdRng) -> ModelArtifact {
    let mut trees = Vec::with_capacity(FOREST_TREES);
    for _ in 0..FOREST_TREES {
        let sample: Vec<usize> = (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
        trees.push(build_tree(x, y, &sample, 0, rng));
    }
    ModelArtifact::Forest { trees }
}

fn build_tree(
    x: &[[f64; 8]],
    y: &[bool],
    indices: &[usize],
    depth: usize,
    rng: &mut StdRng,
) -> TreeNode {
    let positives = indices.iter().filter(|&&i| y[i]).count();
    let value = positives as f64 / indices.len().max(1) as f64;

    if depth >= FOREST_MAX_DEPTH
        || indices.len() < FOREST_MIN_SPLIT
        || positives == 0
        || positives == indices.len()
    {
        return TreeNode::Leaf { value };
    }

    // Random feature subset, best gini split among them
    let mut features: Vec<usize> = (0..8).collect();
    features.shuffle(rng);
    features.truncate(FEATURES_PER_SPLIT);

    let mut best: Option<(f64, usize, f64)> = None;
    for &feature in &features {
        for threshold in candidate_thresholds(x, indices, feature) {
            let (left_pos, left_n): (usize, usize) = indices
                .iter()
                .filter(|&&i| x[i][feature] <= threshold)
                .fold((0, 0), |(p, n), &i| (p + usize::from(y[i]), n + 1));
            let right_n = indices.len() - left_n;
            if left_n == 0 || right_n == 0 {
                continue;
            }
            let right_pos = positives - left_pos;
            let impurity = weighted_gini(left_pos, left_n, right_pos, right_n);
            if best.map_or(true, |(b, _, _)| impurity < b) {
                best = Some((impurity, feature, threshold));
            }
        }
    }

    let Some((_, feature, threshold)) = best else {
        return TreeNode::Leaf { value };
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| x[i][feature] <= threshold);

    TreeNode::Split {
        feature,
        threshold,
        left: Box::new(build_tree(x, y, &left_idx, depth + 1, rng)),
        right: Box::new(build_tree(x, y, &right_idx, depth + 1, rng)),
    }
}

/// Midpoints between distinct sorted values, thinned to a bounded set
fn candidate_thresholds(x: &[[f64; 8]], indices: &[usize], feature: usize) -> Vec<f64> {
    let mut values: Vec<f64> = indices.iter().map(|&i| x[i][feature]).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();

    let mut midpoints: Vec<f64> = values
        .windows(2)
        .map(|pair| (pair[0] + pair[1]) / 2.0)
        .collect();

    const MAX_CANDIDATES: usize = 32;
    if midpoints.len() > MAX_CANDIDATES {
        let step = midpoints.len() as f64 / MAX_CANDIDATES as f64;
        midpoints = (0..MAX_CANDIDATES)
            .map(|i| midpoints[(i as f64 * step) as usize])
            .collect();
    }
    midpoints
}

fn weighted_gini(left_pos: usize, left_n: usize, right_pos: usize, right_n: usize) -> f64 {
    let gini = |pos: usize, n: usize| {
        let p = pos as f64 / n as f64;
        2.0 * p * (1.0 - p)
    };
    let total = (left_n + right_n) as f64;
    (left_n as f64 / total) * gini(left_pos, left_n)
        + (right_n as f64 / total) * gini(right_pos, right_n)
}

/// Gradient boosting with log loss and depth-one stumps
///
/// Each round fits a stump to the loss gradient and takes a Newton step per
/// leaf. The base score is the log-odds of the training churn rate.
fn fit_boosted(x: &[[f64; 8]], y: &[bool]) -> ModelArtifact {
    let n = y.len();
    let pos = y.iter().filter(|l| **l).count() as f64;
    let rate = (pos / n as f64).clamp(1e-6, 1.0 - 1e-6);
    let base_score = (rate / (1.0 - rate)).ln();

    let mut scores = vec![base_score; n];
    let mut stumps = Vec::with_capacity(BOOSTING_ROUNDS);
    let all: Vec<usize> = (0..n).collect();

    for _ in 0..BOOSTING_ROUNDS {
        let grads: Vec<f64> = scores
            .iter()
            .zip(y)
            .map(|(&s, &label)| (if label { 1.0 } else { 0.0 }) - sigmoid(s))
            .collect();
        let hess: Vec<f64> = scores
            .iter()
            .map(|&s| {
                let p = sigmoid(s);
                (p * (1.0 - p)).max(1e-9)
            })
            .collect();

        let Some(stump) = fit_stump(x, &all, &grads, &hess) else {
            break;
        };

        for (score, row) in scores.iter_mut().zip(x) {
            *score += BOOSTING_LEARNING_RATE * stump.predict(row);
        }
        stumps.push(stump);
    }

    ModelArtifact::Boosted {
        base_score,
        learning_rate: BOOSTING_LEARNING_RATE,
        stumps,
    }
}

/// Best single split by Newton gain over all features
fn fit_stump(x: &[[f64; 8]], indices: &[usize], grads: &[f64], hess: &[f64]) -> Option<Stump> {
    let total_grad: f64 = indices.iter().map(|&i| grads[i]).sum();
    let total_hess: f64 = indices.iter().map(|&i| hess[i]).sum();

    let mut best: Option<(f64, Stump)> = None;
    for feature in 0..8 {
        for threshold in candidate_thresholds(x, indices, feature) {
            let mut left_grad = 0.0;
            let mut left_hess = 0.0;
            for &i in indices {
                if x[i][feature] <= threshold {
                    left_grad += grads[i];
                    left_hess += hess[i];
                }
            }
            let right_grad = total_grad - left_grad;
            let right_hess = total_hess - left_hess;
            if left_hess < 1e-9 || right_hess < 1e-9 {
                continue;
            }

            let gain = left_grad * left_grad / left_hess + right_grad * right_grad / right_hess
                - total_grad * total_grad / total_hess;
            if best.as_ref().map_or(gain > 0.0, |(b, _)| gain > *b) {
                best = Some((
                    gain,
                    Stump {
                        feature,
                        threshold,
                        left_value: left_grad / left_hess,
                        right_value: right_grad / right_hess,
                    },
                ));
            }
        }
    }

    best.map(|(_, stump)| stump)
}

/// Classification metrics at the 0.5 threshold plus rank-based ROC-AUC
fn evaluate(
    scores: &[f64],
    labels: &[bool],
    train_samples: usize,
    test_samples: usize,
    churn_rate: f64,
) -> ModelMetrics {
    let mut tp: f64 = 0.0;
    let mut fp: f64 = 0.0;
    let mut tn: f64 = 0.0;
    let mut fn_: f64 = 0.0;
    for (&score, &label) in scores.iter().zip(labels) {
        let predicted = score >= 0.5;
        match (predicted, label) {
            (true, true) => tp += 1.0,
            (true, false) => fp += 1.0,
            (false, false) => tn += 1.0,
            (false, true) => fn_ += 1.0,
        }
    }

    let total = (tp + fp + tn + fn_).max(1.0);
    let accuracy = (tp + tn) / total;
    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1_score = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ModelMetrics {
        accuracy: round4(accuracy),
        precision: round4(precision),
        recall: round4(recall),
        f1_score: round4(f1_score),
        roc_auc: round4(roc_auc(scores, labels)),
        train_samples,
        test_samples,
        churn_rate: round4(churn_rate),
    }
}

/// Mann-Whitney ROC-AUC with average ranks for tied scores
///
/// Zero when the test split has only one class, matching the convention of
/// reporting 0.0 rather than failing.
fn roc_auc(scores: &[f64], labels: &[bool]) -> f64 {
    let n_pos = labels.iter().filter(|l| **l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = ((i + 1 + j + 1) as f64) / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(l, _)| **l)
        .map(|(_, r)| r)
        .sum();
    let u = rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    u / (n_pos * n_neg) as f64
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
