//! Generated-content cache persistence
//!
//! Entries are keyed (organization, segment, risk level) and upserted
//! last-writer-wins; expiry is checked by the caller against `expires_at`.

use chrono::{DateTime, Utc};
use pulse_common::{Error, Result, RiskSegment};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// One cached generated-content entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub organization_id: Uuid,
    pub segment: String,
    pub risk_level: RiskSegment,
    pub title: String,
    pub message: String,
    pub cta_text: String,
    pub cta_link: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub async fn get(
    pool: &SqlitePool,
    org_id: Uuid,
    segment: &str,
    risk_level: RiskSegment,
) -> Result<Option<CacheEntry>> {
    let row = sqlx::query(
        r#"
        SELECT organization_id, segment, risk_level, title, message,
               cta_text, cta_link, generated_at, expires_at
        FROM content_cache
        WHERE organization_id = ? AND segment = ? AND risk_level = ?
        "#,
    )
    .bind(org_id.to_string())
    .bind(segment)
    .bind(risk_level.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Insert or replace the entry for this key (last-writer-wins)
pub async fn upsert(pool: &SqlitePool, entry: &CacheEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO content_cache (
            organization_id, segment, risk_level, title, message,
            cta_text, cta_link, generated_at, expires_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(organization_id, segment, risk_level) DO UPDATE SET
            title = excluded.title,
            message = excluded.message,
            cta_text = excluded.cta_text,
            cta_link = excluded.cta_link,
            generated_at = excluded.generated_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(entry.organization_id.to_string())
    .bind(&entry.segment)
    .bind(entry.risk_level.as_str())
    .bind(&entry.title)
    .bind(&entry.message)
    .bind(&entry.cta_text)
    .bind(&entry.cta_link)
    .bind(entry.generated_at.to_rfc3339())
    .bind(entry.expires_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

fn decode(row: sqlx::sqlite::SqliteRow) -> Result<CacheEntry> {
    let organization_id: String = row.get("organization_id");
    let organization_id = Uuid::parse_str(&organization_id)
        .map_err(|e| Error::Decode(format!("Failed to parse organization_id: {}", e)))?;

    let risk_level: String = row.get("risk_level");
    let risk_level: RiskSegment = risk_level.parse()?;

    let generated_at: String = row.get("generated_at");
    let generated_at = DateTime::parse_from_rfc3339(&generated_at)
        .map_err(|e| Error::Decode(format!("Failed to parse generated_at: {}", e)))?
        .with_timezone(&Utc);

    let expires_at: String = row.get("expires_at");
    let expires_at = DateTime::parse_from_rfc3339(&expires_at)
        .map_err(|e| Error::Decode(format!("Failed to parse expires_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(CacheEntry {
        organization_id,
        segment: row.get("segment"),
        risk_level,
        title: row.get("title"),
        message: row.get("message"),
        cta_text: row.get("cta_text"),
        cta_link: row.get("cta_link"),
        generated_at,
        expires_at,
    })
}
