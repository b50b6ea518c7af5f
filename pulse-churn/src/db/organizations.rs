//! Organization rows and the current-model pointer

use chrono::{DateTime, Utc};
use pulse_common::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Tenant record
#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Inactivity window used to derive churn labels for unlabeled datasets
    pub churn_threshold_days: i64,
    pub current_model_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert(pool: &SqlitePool, org: &Organization) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO organizations (id, name, churn_threshold_days, current_model_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(org.id.to_string())
    .bind(&org.name)
    .bind(org.churn_threshold_days)
    .bind(org.current_model_id.map(|id| id.to_string()))
    .bind(org.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Organization>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, churn_threshold_days, current_model_id, created_at
        FROM organizations
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Advance the organization's current-model pointer
///
/// Only the training stage calls this, and only after the new model row is
/// committed.
pub async fn set_current_model(pool: &SqlitePool, org_id: Uuid, model_id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE organizations SET current_model_id = ? WHERE id = ?")
        .bind(model_id.to_string())
        .bind(org_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Organization {}", org_id)));
    }
    Ok(())
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Organization>> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, churn_threshold_days, current_model_id, created_at
        FROM organizations
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(decode).collect()
}

fn decode(row: sqlx::sqlite::SqliteRow) -> Result<Organization> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Decode(format!("Failed to parse organization id: {}", e)))?;

    let current_model_id: Option<String> = row.get("current_model_id");
    let current_model_id = current_model_id
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| Error::Decode(format!("Failed to parse current_model_id: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Decode(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(Organization {
        id,
        name: row.get("name"),
        churn_threshold_days: row.get("churn_threshold_days"),
        current_model_id,
        created_at,
    })
}
