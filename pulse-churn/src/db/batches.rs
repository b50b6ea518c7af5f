//! Prediction batch and record persistence
//!
//! Records are append-only with a per-batch sequence number assigned in
//! input order; pagination reads `ORDER BY seq`, so already-written rows are
//! never reordered while a batch is still appending.

use crate::models::{JobStatus, PredictionBatch, PredictionRecord};
use chrono::{DateTime, Utc};
use pulse_common::{Error, Result, RiskSegment};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn insert(pool: &SqlitePool, batch: &PredictionBatch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO prediction_batches (
            id, organization_id, name, storage_key, status,
            rows_total, rows_succeeded, rows_failed,
            avg_churn_probability, risk_distribution, error_message,
            created_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(batch.organization_id.to_string())
    .bind(&batch.name)
    .bind(&batch.storage_key)
    .bind(batch.status.as_str())
    .bind(batch.rows_total)
    .bind(batch.rows_succeeded)
    .bind(batch.rows_failed)
    .bind(batch.avg_churn_probability)
    .bind(batch.risk_distribution.as_ref().map(|v| v.to_string()))
    .bind(&batch.error_message)
    .bind(batch.created_at.to_rfc3339())
    .bind(batch.finished_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update(pool: &SqlitePool, batch: &PredictionBatch) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE prediction_batches SET
            status = ?, rows_total = ?, rows_succeeded = ?, rows_failed = ?,
            avg_churn_probability = ?, risk_distribution = ?, error_message = ?,
            finished_at = ?
        WHERE id = ?
        "#,
    )
    .bind(batch.status.as_str())
    .bind(batch.rows_total)
    .bind(batch.rows_succeeded)
    .bind(batch.rows_failed)
    .bind(batch.avg_churn_probability)
    .bind(batch.risk_distribution.as_ref().map(|v| v.to_string()))
    .bind(&batch.error_message)
    .bind(batch.finished_at.map(|t| t.to_rfc3339()))
    .bind(batch.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark batches left non-terminal by a previous run as failed
pub async fn cleanup_stale(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE prediction_batches
        SET status = 'failed',
            error_message = 'Service restarted while the batch was in flight',
            finished_at = ?
        WHERE status IN ('queued', 'running')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

pub async fn get(pool: &SqlitePool, org_id: Uuid, batch_id: Uuid) -> Result<Option<PredictionBatch>> {
    let row = sqlx::query(
        r#"
        SELECT id, organization_id, name, storage_key, status,
               rows_total, rows_succeeded, rows_failed,
               avg_churn_probability, risk_distribution, error_message,
               created_at, finished_at
        FROM prediction_batches
        WHERE id = ? AND organization_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .bind(org_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(decode_batch).transpose()
}

/// Batches for an organization, newest first
pub async fn list(
    pool: &SqlitePool,
    org_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<PredictionBatch>)> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM prediction_batches WHERE organization_id = ?")
            .bind(org_id.to_string())
            .fetch_one(pool)
            .await?;

    let rows = sqlx::query(
        r#"
        SELECT id, organization_id, name, storage_key, status,
               rows_total, rows_succeeded, rows_failed,
               avg_churn_probability, risk_distribution, error_message,
               created_at, finished_at
        FROM prediction_batches
        WHERE organization_id = ?
        ORDER BY created_at DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(org_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let batches = rows.into_iter().map(decode_batch).collect::<Result<_>>()?;
    Ok((total, batches))
}

/// Append one scored record at the next sequence position
pub async fn insert_record(pool: &SqlitePool, record: &PredictionRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO prediction_records (
            batch_id, seq, organization_id, external_customer_id,
            churn_probability, risk_segment, features, predicted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.batch_id.to_string())
    .bind(record.seq)
    .bind(record.organization_id.to_string())
    .bind(&record.external_customer_id)
    .bind(record.churn_probability)
    .bind(record.risk_segment.as_str())
    .bind(record.features.to_string())
    .bind(record.predicted_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Paginated records for a batch in insertion order
pub async fn list_records(
    pool: &SqlitePool,
    batch_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<PredictionRecord>)> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM prediction_records WHERE batch_id = ?")
            .bind(batch_id.to_string())
            .fetch_one(pool)
            .await?;

    let rows = sqlx::query(
        r#"
        SELECT batch_id, seq, organization_id, external_customer_id,
               churn_probability, risk_segment, features, predicted_at
        FROM prediction_records
        WHERE batch_id = ?
        ORDER BY seq
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(batch_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let records = rows.into_iter().map(decode_record).collect::<Result<_>>()?;
    Ok((total, records))
}

/// Cross-batch customer listing, optionally filtered by risk segment
///
/// Newest predictions first, then batch/seq for a stable tiebreak.
pub async fn list_customers(
    pool: &SqlitePool,
    org_id: Uuid,
    risk_segment: Option<RiskSegment>,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<PredictionRecord>)> {
    let (total, rows) = match risk_segment {
        Some(segment) => {
            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM prediction_records WHERE organization_id = ? AND risk_segment = ?",
            )
            .bind(org_id.to_string())
            .bind(segment.as_str())
            .fetch_one(pool)
            .await?;

            let rows = sqlx::query(
                r#"
                SELECT batch_id, seq, organization_id, external_customer_id,
                       churn_probability, risk_segment, features, predicted_at
                FROM prediction_records
                WHERE organization_id = ? AND risk_segment = ?
                ORDER BY predicted_at DESC, batch_id, seq
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(org_id.to_string())
            .bind(segment.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

            (total, rows)
        }
        None => {
            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM prediction_records WHERE organization_id = ?",
            )
            .bind(org_id.to_string())
            .fetch_one(pool)
            .await?;

            let rows = sqlx::query(
                r#"
                SELECT batch_id, seq, organization_id, external_customer_id,
                       churn_probability, risk_segment, features, predicted_at
                FROM prediction_records
                WHERE organization_id = ?
                ORDER BY predicted_at DESC, batch_id, seq
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(org_id.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

            (total, rows)
        }
    };

    let records = rows.into_iter().map(decode_record).collect::<Result<_>>()?;
    Ok((total, records))
}

fn decode_batch(row: sqlx::sqlite::SqliteRow) -> Result<PredictionBatch> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Decode(format!("Failed to parse batch id: {}", e)))?;

    let organization_id: String = row.get("organization_id");
    let organization_id = Uuid::parse_str(&organization_id)
        .map_err(|e| Error::Decode(format!("Failed to parse organization_id: {}", e)))?;

    let status: String = row.get("status");

    let risk_distribution: Option<String> = row.get("risk_distribution");
    let risk_distribution = risk_distribution
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Decode(format!("Failed to parse risk distribution: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Decode(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    let finished_at: Option<String> = row.get("finished_at");
    let finished_at = finished_at
        .map(|s| DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Decode(format!("Failed to parse finished_at: {}", e)))?
        .map(|dt| dt.with_timezone(&Utc));

    Ok(PredictionBatch {
        id,
        organization_id,
        name: row.get("name"),
        storage_key: row.get("storage_key"),
        status: status.parse::<JobStatus>()?,
        rows_total: row.get("rows_total"),
        rows_succeeded: row.get("rows_succeeded"),
        rows_failed: row.get("rows_failed"),
        avg_churn_probability: row.get("avg_churn_probability"),
        risk_distribution,
        error_message: row.get("error_message"),
        created_at,
        finished_at,
    })
}

fn decode_record(row: sqlx::sqlite::SqliteRow) -> Result<PredictionRecord> {
    let batch_id: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_id)
        .map_err(|e| Error::Decode(format!("Failed to parse batch_id: {}", e)))?;

    let organization_id: String = row.get("organization_id");
    let organization_id = Uuid::parse_str(&organization_id)
        .map_err(|e| Error::Decode(format!("Failed to parse organization_id: {}", e)))?;

    let risk_segment: String = row.get("risk_segment");
    let risk_segment: RiskSegment = risk_segment.parse()?;

    let features: String = row.get("features");
    let features = serde_json::from_str(&features)
        .map_err(|e| Error::Decode(format!("Failed to parse features: {}", e)))?;

    let predicted_at: String = row.get("predicted_at");
    let predicted_at = DateTime::parse_from_rfc3339(&predicted_at)
        .map_err(|e| Error::Decode(format!("Failed to parse predicted_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(PredictionRecord {
        batch_id,
        seq: row.get("seq"),
        organization_id,
        external_customer_id: row.get("external_customer_id"),
        churn_probability: row.get("churn_probability"),
        risk_segment,
        features,
        predicted_at,
    })
}
