//! Background stage runners
//!
//! Each long-running stage (feature processing, training, bulk prediction)
//! runs as a spawned task after its submission endpoint has validated
//! preconditions and persisted a queued job. Runners own the job record
//! from start to terminal state; nothing restarts them, so any failure path
//! must end in a failed job rather than a panic.

use chrono::Utc;
use pulse_common::{csv, Result};
use serde_json::json;
use tracing::{error, info};

use crate::db;
use crate::models::{
    Dataset, DatasetStatus, Job, ModelAlgorithm, PredictionBatch, PredictionRecord,
};
use crate::services::feature_engineering;
use crate::services::predictor;
use crate::storage;
use crate::AppState;
use pulse_common::RiskSegment;

/// Persist job progress every this many processed customers
const PROGRESS_INTERVAL: i64 = 100;

/// How often to persist bulk progress, in processed customers
///
/// Batches smaller than the interval persist every row, so polling clients
/// see partial progress instead of 0 until terminal.
fn progress_stride(rows_total: i64) -> i64 {
    if rows_total < PROGRESS_INTERVAL {
        1
    } else {
        PROGRESS_INTERVAL
    }
}

/// Spawn the feature-processing stage for an uploaded raw dataset
pub fn spawn_feature_processing(state: AppState, job: Job, dataset: Dataset) {
    tokio::spawn(async move {
        let job_id = job.id;
        if let Err(e) = run_feature_processing(state, job, dataset).await {
            error!("Feature processing job {} failed to record outcome: {}", job_id, e);
        }
    });
}

async fn run_feature_processing(state: AppState, mut job: Job, dataset: Dataset) -> Result<()> {
    info!("Starting feature processing for dataset {}", dataset.id);
    job.start();
    db::jobs::update(&state.db, &job).await?;
    db::datasets::set_status(&state.db, dataset.id, DatasetStatus::FeatureProcessing, None).await?;

    let org = match db::organizations::get(&state.db, dataset.organization_id).await? {
        Some(org) => org,
        None => {
            return fail_feature_processing(&state, &mut job, &dataset, "Organization no longer exists")
                .await;
        }
    };

    let outcome: Result<(uuid::Uuid, usize)> = async {
        let bytes = state.store.get(&dataset.storage_key).await?;
        let text = String::from_utf8(bytes).map_err(|_| {
            pulse_common::Error::InvalidInput("Dataset is not valid UTF-8".to_string())
        })?;
        let table = csv::parse(&text)?;

        let rows = feature_engineering::derive_features(
            &table,
            dataset.has_label,
            state.settings.lookback_days,
            org.churn_threshold_days,
        )?;

        let feature_set = Dataset::new_features(
            dataset.organization_id,
            String::new(),
            format!("features_{}.csv", dataset.id),
            rows.len() as i64,
            true,
        );
        let key = storage::feature_set_key(dataset.organization_id, feature_set.id);
        let feature_set = Dataset {
            storage_key: key.clone(),
            ..feature_set
        };

        let csv_text = feature_engineering::write_feature_csv(&rows);
        state.store.put(&key, csv_text.into_bytes()).await?;
        db::datasets::insert_as_active(&state.db, &feature_set).await?;

        Ok((feature_set.id, rows.len()))
    }
    .await;

    match outcome {
        Ok((feature_set_id, customers)) => {
            db::datasets::set_status(&state.db, dataset.id, DatasetStatus::Ready, None).await?;
            job.total_items = customers as i64;
            job.processed_items = customers as i64;
            job.succeed(json!({
                "feature_set_id": feature_set_id,
                "customers": customers,
            }));
            db::jobs::update(&state.db, &job).await?;
            info!(
                "Feature processing for dataset {} produced {} customers",
                dataset.id, customers
            );
            Ok(())
        }
        Err(e) => fail_feature_processing(&state, &mut job, &dataset, &e.to_string()).await,
    }
}

async fn fail_feature_processing(
    state: &AppState,
    job: &mut Job,
    dataset: &Dataset,
    message: &str,
) -> Result<()> {
    error!("Feature processing for dataset {} failed: {}", dataset.id, message);
    db::datasets::set_status(&state.db, dataset.id, DatasetStatus::Failed, Some(message)).await?;
    job.fail(message);
    db::jobs::update(&state.db, job).await?;
    Ok(())
}

/// Spawn the training stage against the active feature set
pub fn spawn_training(state: AppState, job: Job, feature_set: Dataset, algorithm: ModelAlgorithm) {
    tokio::spawn(async move {
        let job_id = job.id;
        if let Err(e) = run_training(state, job, feature_set, algorithm).await {
            error!("Training job {} failed to record outcome: {}", job_id, e);
        }
    });
}

async fn run_training(
    state: AppState,
    mut job: Job,
    feature_set: Dataset,
    algorithm: ModelAlgorithm,
) -> Result<()> {
    info!(
        "Starting {} training on feature set {}",
        algorithm, feature_set.id
    );
    job.start();
    db::jobs::update(&state.db, &job).await?;

    let outcome: Result<serde_json::Value> = async {
        let bytes = state.store.get(&feature_set.storage_key).await?;
        let text = String::from_utf8(bytes).map_err(|_| {
            pulse_common::Error::InvalidInput("Feature set is not valid UTF-8".to_string())
        })?;
        let rows = feature_engineering::read_feature_csv(&text)?;

        let (artifact, metrics) = crate::services::trainer::train(
            &rows,
            algorithm,
            state.settings.test_fraction,
            state.settings.training_seed,
        )?;

        let model = crate::models::TrainedModel {
            id: uuid::Uuid::new_v4(),
            organization_id: feature_set.organization_id,
            algorithm,
            feature_columns: crate::models::FEATURE_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            metrics,
            trained_at: Utc::now(),
        };
        let model_id = model.id;

        // Publishing persists the model and advances the current-model
        // pointer; the previous model keeps serving until this succeeds
        state.models.publish(&state.db, model, artifact).await?;

        Ok(json!({
            "model_id": model_id,
            "algorithm": algorithm.as_str(),
            "metrics": metrics,
        }))
    }
    .await;

    match outcome {
        Ok(result) => {
            job.total_items = feature_set.row_count;
            job.processed_items = feature_set.row_count;
            job.succeed(result);
            db::jobs::update(&state.db, &job).await?;
            info!("Training job {} succeeded", job.id);
            Ok(())
        }
        Err(e) => {
            error!("Training job {} failed: {}", job.id, e);
            job.fail(e.to_string());
            db::jobs::update(&state.db, &job).await?;
            Ok(())
        }
    }
}

/// Spawn the bulk-prediction stage for an uploaded batch
pub fn spawn_bulk_prediction(state: AppState, job: Job, batch: PredictionBatch) {
    tokio::spawn(async move {
        let job_id = job.id;
        if let Err(e) = run_bulk_prediction(state, job, batch).await {
            error!("Bulk prediction job {} failed to record outcome: {}", job_id, e);
        }
    });
}

async fn run_bulk_prediction(state: AppState, mut job: Job, mut batch: PredictionBatch) -> Result<()> {
    info!("Starting bulk prediction batch {}", batch.id);
    job.start();
    batch.status = job.status;
    db::jobs::update(&state.db, &job).await?;
    db::batches::update(&state.db, &batch).await?;

    let model = match state.models.current(batch.organization_id).await {
        Some(model) => model,
        None => {
            return fail_bulk(&state, &mut job, &mut batch, "No trained model is deployed").await;
        }
    };

    let customers = match load_bulk_customers(&state, &batch).await {
        Ok(customers) => customers,
        Err(e) => return fail_bulk(&state, &mut job, &mut batch, &e.to_string()).await,
    };

    batch.rows_total = customers.len() as i64;
    job.total_items = batch.rows_total;
    db::batches::update(&state.db, &batch).await?;
    db::jobs::update(&state.db, &job).await?;

    let mut seq: i64 = 0;
    let mut probability_sum = 0.0;
    let mut distribution: [i64; 4] = [0; 4];
    let stride = progress_stride(batch.rows_total);

    for customer in &customers {
        match &customer.outcome {
            Ok(features) => {
                let scored = predictor::score_features(
                    &model.artifact,
                    &customer.customer_id,
                    *features,
                    &state.settings.risk_thresholds,
                );
                let record = PredictionRecord {
                    batch_id: batch.id,
                    seq,
                    organization_id: batch.organization_id,
                    external_customer_id: scored.customer_id.clone(),
                    churn_probability: scored.churn_probability,
                    risk_segment: scored.risk_segment,
                    features: serde_json::to_value(&scored.features).unwrap_or(json!({})),
                    predicted_at: Utc::now(),
                };
                if let Err(e) = db::batches::insert_record(&state.db, &record).await {
                    error!(
                        "Batch {}: failed to persist record for {}: {}",
                        batch.id, customer.customer_id, e
                    );
                    batch.rows_failed += 1;
                } else {
                    seq += 1;
                    batch.rows_succeeded += 1;
                    probability_sum += scored.churn_probability;
                    distribution[segment_index(scored.risk_segment)] += 1;
                }
            }
            Err(reason) => {
                info!("Batch {}: skipping {}: {}", batch.id, customer.customer_id, reason);
                batch.rows_failed += 1;
            }
        }

        job.processed_items = batch.rows_succeeded + batch.rows_failed;
        job.failed_items = batch.rows_failed;
        if job.processed_items % stride == 0 {
            db::jobs::update(&state.db, &job).await?;
            db::batches::update(&state.db, &batch).await?;
        }
    }

    if batch.rows_succeeded == 0 {
        return fail_bulk(&state, &mut job, &mut batch, "No rows could be scored").await;
    }

    batch.avg_churn_probability =
        Some(predictor::round_probability(probability_sum / batch.rows_succeeded as f64));
    batch.risk_distribution = Some(json!({
        "Low": distribution[0],
        "Medium": distribution[1],
        "High": distribution[2],
        "Critical": distribution[3],
    }));
    batch.finished_at = Some(Utc::now());

    job.succeed(json!({
        "batch_id": batch.id,
        "rows_total": batch.rows_total,
        "rows_succeeded": batch.rows_succeeded,
        "rows_failed": batch.rows_failed,
    }));
    batch.status = job.status;
    db::jobs::update(&state.db, &job).await?;
    db::batches::update(&state.db, &batch).await?;

    info!(
        "Bulk prediction batch {} finished: {} scored, {} failed",
        batch.id, batch.rows_succeeded, batch.rows_failed
    );
    Ok(())
}

async fn load_bulk_customers(
    state: &AppState,
    batch: &PredictionBatch,
) -> Result<Vec<feature_engineering::BulkCustomer>> {
    let bytes = state.store.get(&batch.storage_key).await?;
    let text = String::from_utf8(bytes).map_err(|_| {
        pulse_common::Error::InvalidInput("Batch input is not valid UTF-8".to_string())
    })?;
    let table = csv::parse(&text)?;
    feature_engineering::derive_features_tolerant(&table, state.settings.lookback_days)
}

async fn fail_bulk(
    state: &AppState,
    job: &mut Job,
    batch: &mut PredictionBatch,
    message: &str,
) -> Result<()> {
    error!("Bulk prediction batch {} failed: {}", batch.id, message);
    job.fail(message);
    batch.status = job.status;
    batch.error_message = Some(message.to_string());
    batch.finished_at = Some(Utc::now());
    db::jobs::update(&state.db, job).await?;
    db::batches::update(&state.db, batch).await?;
    Ok(())
}

fn segment_index(segment: RiskSegment) -> usize {
    match segment {
        RiskSegment::Low => 0,
        RiskSegment::Medium => 1,
        RiskSegment::High => 2,
        RiskSegment::Critical => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_batches_persist_progress_every_row() {
        assert_eq!(progress_stride(1), 1);
        assert_eq!(progress_stride(50), 1);
        assert_eq!(progress_stride(PROGRESS_INTERVAL - 1), 1);
    }

    #[test]
    fn test_large_batches_persist_progress_at_interval() {
        assert_eq!(progress_stride(PROGRESS_INTERVAL), PROGRESS_INTERVAL);
        assert_eq!(progress_stride(10_000), PROGRESS_INTERVAL);
    }
}
