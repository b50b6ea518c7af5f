//! Dataset persistence

use crate::models::{Dataset, DatasetKind, DatasetStatus};
use chrono::{DateTime, Utc};
use pulse_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a dataset, superseding any prior active dataset of the same kind
///
/// The old dataset rows are retained (audit), only their `active` flag is
/// cleared, inside one transaction.
pub async fn insert_as_active(pool: &SqlitePool, dataset: &Dataset) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE datasets SET active = 0 WHERE organization_id = ? AND kind = ? AND active = 1",
    )
    .bind(dataset.organization_id.to_string())
    .bind(dataset.kind.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO datasets (
            id, organization_id, kind, storage_key, filename, row_count,
            has_label, status, error_message, active, uploaded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(dataset.id.to_string())
    .bind(dataset.organization_id.to_string())
    .bind(dataset.kind.as_str())
    .bind(&dataset.storage_key)
    .bind(&dataset.filename)
    .bind(dataset.row_count)
    .bind(dataset.has_label as i64)
    .bind(dataset.status.as_str())
    .bind(&dataset.error_message)
    .bind(dataset.active as i64)
    .bind(dataset.uploaded_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Dataset>> {
    let row = sqlx::query(
        r#"
        SELECT id, organization_id, kind, storage_key, filename, row_count,
               has_label, status, error_message, active, uploaded_at
        FROM datasets
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// The organization's active dataset of the given kind, if any
pub async fn get_active(
    pool: &SqlitePool,
    org_id: Uuid,
    kind: DatasetKind,
) -> Result<Option<Dataset>> {
    let row = sqlx::query(
        r#"
        SELECT id, organization_id, kind, storage_key, filename, row_count,
               has_label, status, error_message, active, uploaded_at
        FROM datasets
        WHERE organization_id = ? AND kind = ? AND active = 1
        "#,
    )
    .bind(org_id.to_string())
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Transition a dataset's status, retaining the error message on failure
pub async fn set_status(
    pool: &SqlitePool,
    id: Uuid,
    status: DatasetStatus,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE datasets SET status = ?, error_message = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error_message)
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Mark datasets left mid feature-processing by a previous run as failed
///
/// Pairs with [`crate::db::jobs::cleanup_stale`]: the runner that owned the
/// transition died with the process, and a dataset stuck in
/// `feature_processing` would otherwise block every resubmission.
pub async fn cleanup_stale(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE datasets
        SET status = 'failed',
            error_message = 'Service restarted while feature processing was in flight'
        WHERE status = 'feature_processing'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

fn decode(row: sqlx::sqlite::SqliteRow) -> Result<Dataset> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Decode(format!("Failed to parse dataset id: {}", e)))?;

    let organization_id: String = row.get("organization_id");
    let organization_id = Uuid::parse_str(&organization_id)
        .map_err(|e| Error::Decode(format!("Failed to parse organization_id: {}", e)))?;

    let kind: String = row.get("kind");
    let status: String = row.get("status");

    let uploaded_at: String = row.get("uploaded_at");
    let uploaded_at = DateTime::parse_from_rfc3339(&uploaded_at)
        .map_err(|e| Error::Decode(format!("Failed to parse uploaded_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(Dataset {
        id,
        organization_id,
        kind: kind.parse()?,
        storage_key: row.get("storage_key"),
        filename: row.get("filename"),
        row_count: row.get("row_count"),
        has_label: row.get::<i64, _>("has_label") != 0,
        status: status.parse()?,
        error_message: row.get("error_message"),
        active: row.get::<i64, _>("active") != 0,
        uploaded_at,
    })
}
