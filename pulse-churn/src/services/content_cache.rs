//! Generated-content cache
//!
//! Widget copy is cached per (organization, segment, risk level) with a
//! fixed TTL. Expired entries stay on disk until successfully replaced, so
//! a generator outage degrades to slightly stale copy rather than no copy.
//! Concurrent misses on the same key may both call the generator; the upsert
//! is last-writer-wins and both writers produce equivalent copy.

use chrono::{Duration, Utc};
use pulse_common::{Result, RiskSegment};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::cache::{self, CacheEntry};
use crate::services::generation_client::{ContentGenerator, GeneratorError, WidgetCopy};

/// Cache outcome for observability and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    /// Freshly generated (miss or expired entry replaced)
    Generated,
    /// Generator failed; an expired entry was served instead
    StaleFallback,
}

/// Fetch cached widget copy, generating and caching on miss or expiry
pub async fn get_or_generate(
    pool: &SqlitePool,
    generator: &dyn ContentGenerator,
    org_id: Uuid,
    segment: &str,
    risk_level: RiskSegment,
    ttl_days: i64,
) -> Result<Option<(WidgetCopy, CacheOutcome)>> {
    let now = Utc::now();
    let existing = cache::get(pool, org_id, segment, risk_level).await?;

    if let Some(entry) = &existing {
        if !entry.is_expired(now) {
            debug!(segment = %segment, risk = %risk_level, "Content cache hit");
            return Ok(Some((copy_of(entry), CacheOutcome::Hit)));
        }
    }

    debug!(segment = %segment, risk = %risk_level, "Content cache miss, generating");
    match generator.generate(segment, risk_level).await {
        Ok(copy) => {
            let entry = CacheEntry {
                organization_id: org_id,
                segment: segment.to_string(),
                risk_level,
                title: copy.title.clone(),
                message: copy.message.clone(),
                cta_text: copy.cta_text.clone(),
                cta_link: copy.cta_link.clone(),
                generated_at: now,
                expires_at: now + Duration::days(ttl_days),
            };
            cache::upsert(pool, &entry).await?;
            Ok(Some((copy, CacheOutcome::Generated)))
        }
        Err(GeneratorError::NotConfigured) => {
            // Not an error worth logging on every request
            Ok(existing.map(|e| (copy_of(&e), CacheOutcome::StaleFallback)))
        }
        Err(e) => {
            warn!(segment = %segment, risk = %risk_level, "Content generation failed: {}", e);
            Ok(existing.map(|e| (copy_of(&e), CacheOutcome::StaleFallback)))
        }
    }
}

fn copy_of(entry: &CacheEntry) -> WidgetCopy {
    WidgetCopy {
        title: entry.title.clone(),
        message: entry.message.clone(),
        cta_text: entry.cta_text.clone(),
        cta_link: entry.cta_link.clone(),
    }
}
