//! Job record persistence

use crate::models::{Job, JobKind, JobStatus};
use chrono::{DateTime, Utc};
use pulse_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn insert(pool: &SqlitePool, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, organization_id, kind, status, total_items, processed_items,
            failed_items, result, error_message, created_at, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.organization_id.to_string())
    .bind(job.kind.as_str())
    .bind(job.status.as_str())
    .bind(job.total_items)
    .bind(job.processed_items)
    .bind(job.failed_items)
    .bind(job.result.as_ref().map(|v| v.to_string()))
    .bind(&job.error_message)
    .bind(job.created_at.to_rfc3339())
    .bind(job.started_at.map(|t| t.to_rfc3339()))
    .bind(job.finished_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the full mutable state of a job (status, progress, outcome)
pub async fn update(pool: &SqlitePool, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs SET
            status = ?, total_items = ?, processed_items = ?, failed_items = ?,
            result = ?, error_message = ?, started_at = ?, finished_at = ?
        WHERE id = ?
        "#,
    )
    .bind(job.status.as_str())
    .bind(job.total_items)
    .bind(job.processed_items)
    .bind(job.failed_items)
    .bind(job.result.as_ref().map(|v| v.to_string()))
    .bind(&job.error_message)
    .bind(job.started_at.map(|t| t.to_rfc3339()))
    .bind(job.finished_at.map(|t| t.to_rfc3339()))
    .bind(job.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(
        r#"
        SELECT id, organization_id, kind, status, total_items, processed_items,
               failed_items, result, error_message, created_at, started_at, finished_at
        FROM jobs
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Whether a non-terminal job of the given kind exists for the organization
///
/// This is the stage-exclusivity check: submissions are rejected, never
/// queued behind an in-flight job.
pub async fn has_active(pool: &SqlitePool, org_id: Uuid, kind: JobKind) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM jobs
        WHERE organization_id = ? AND kind = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(org_id.to_string())
    .bind(kind.as_str())
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Latest job of a kind for an organization, newest first
pub async fn get_latest(pool: &SqlitePool, org_id: Uuid, kind: JobKind) -> Result<Option<Job>> {
    let row = sqlx::query(
        r#"
        SELECT id, organization_id, kind, status, total_items, processed_items,
               failed_items, result, error_message, created_at, started_at, finished_at
        FROM jobs
        WHERE organization_id = ? AND kind = ?
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(org_id.to_string())
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Mark non-terminal jobs from a previous process run as failed
///
/// A job not in a terminal state at startup belongs to a run whose background
/// task died with the process; it will never progress. No automatic retry:
/// callers must re-submit.
pub async fn cleanup_stale(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed',
            error_message = 'Service restarted while job was in flight',
            finished_at = ?
        WHERE status IN ('queued', 'running')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

fn decode(row: sqlx::sqlite::SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let id =
        Uuid::parse_str(&id).map_err(|e| Error::Decode(format!("Failed to parse job id: {}", e)))?;

    let organization_id: String = row.get("organization_id");
    let organization_id = Uuid::parse_str(&organization_id)
        .map_err(|e| Error::Decode(format!("Failed to parse organization_id: {}", e)))?;

    let kind: String = row.get("kind");
    let status: String = row.get("status");

    let result: Option<String> = row.get("result");
    let result = result
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Decode(format!("Failed to parse job result: {}", e)))?;

    Ok(Job {
        id,
        organization_id,
        kind: kind.parse()?,
        status: status.parse::<JobStatus>()?,
        total_items: row.get("total_items"),
        processed_items: row.get("processed_items"),
        failed_items: row.get("failed_items"),
        result,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(row.get("created_at"))?,
        started_at: parse_optional_timestamp(row.get("started_at"))?,
        finished_at: parse_optional_timestamp(row.get("finished_at"))?,
    })
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("Failed to parse timestamp: {}", e)))
}

fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_timestamp).transpose()
}
