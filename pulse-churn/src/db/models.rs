//! Trained model persistence
//!
//! Model rows are immutable: inserted once on training success, never
//! updated. The fitted artifact travels as serialized JSON; decoding it back
//! into a scorer is the model store's concern.

use crate::models::{ModelMetrics, TrainedModel};
use chrono::{DateTime, Utc};
use pulse_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn insert(pool: &SqlitePool, model: &TrainedModel, artifact_json: &str) -> Result<()> {
    let feature_columns = serde_json::to_string(&model.feature_columns)
        .map_err(|e| Error::Encode(format!("Failed to serialize feature columns: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO models (
            id, organization_id, algorithm, artifact, feature_columns,
            accuracy, precision, recall, f1_score, roc_auc,
            train_samples, test_samples, churn_rate, trained_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(model.id.to_string())
    .bind(model.organization_id.to_string())
    .bind(model.algorithm.as_str())
    .bind(artifact_json)
    .bind(feature_columns)
    .bind(model.metrics.accuracy)
    .bind(model.metrics.precision)
    .bind(model.metrics.recall)
    .bind(model.metrics.f1_score)
    .bind(model.metrics.roc_auc)
    .bind(model.metrics.train_samples as i64)
    .bind(model.metrics.test_samples as i64)
    .bind(model.metrics.churn_rate)
    .bind(model.trained_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a model row together with its serialized artifact
pub async fn get_with_artifact(
    pool: &SqlitePool,
    id: Uuid,
) -> Result<Option<(TrainedModel, String)>> {
    let row = sqlx::query(
        r#"
        SELECT id, organization_id, algorithm, artifact, feature_columns,
               accuracy, precision, recall, f1_score, roc_auc,
               train_samples, test_samples, churn_rate, trained_at
        FROM models
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let artifact: String = row.get("artifact");
            Ok(Some((decode(row)?, artifact)))
        }
        None => Ok(None),
    }
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<TrainedModel>> {
    Ok(get_with_artifact(pool, id).await?.map(|(model, _)| model))
}

fn decode(row: sqlx::sqlite::SqliteRow) -> Result<TrainedModel> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Decode(format!("Failed to parse model id: {}", e)))?;

    let organization_id: String = row.get("organization_id");
    let organization_id = Uuid::parse_str(&organization_id)
        .map_err(|e| Error::Decode(format!("Failed to parse organization_id: {}", e)))?;

    let algorithm: String = row.get("algorithm");

    let feature_columns: String = row.get("feature_columns");
    let feature_columns: Vec<String> = serde_json::from_str(&feature_columns)
        .map_err(|e| Error::Decode(format!("Failed to parse feature columns: {}", e)))?;

    let trained_at: String = row.get("trained_at");
    let trained_at = DateTime::parse_from_rfc3339(&trained_at)
        .map_err(|e| Error::Decode(format!("Failed to parse trained_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(TrainedModel {
        id,
        organization_id,
        algorithm: algorithm.parse()?,
        feature_columns,
        metrics: ModelMetrics {
            accuracy: row.get("accuracy"),
            precision: row.get("precision"),
            recall: row.get("recall"),
            f1_score: row.get("f1_score"),
            roc_auc: row.get("roc_auc"),
            train_samples: row.get::<i64, _>("train_samples") as usize,
            test_samples: row.get::<i64, _>("test_samples") as usize,
            churn_rate: row.get("churn_rate"),
        },
        trained_at,
    })
}
