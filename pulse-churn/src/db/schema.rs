//! Database schema
//!
//! Created idempotently on startup. UUIDs and timestamps are stored as TEXT
//! (RFC 3339); JSON payloads as serialized TEXT columns.

use pulse_common::Result;
use sqlx::SqlitePool;

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        churn_threshold_days INTEGER NOT NULL DEFAULT 30,
        current_model_id TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS datasets (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        storage_key TEXT NOT NULL,
        filename TEXT NOT NULL,
        row_count INTEGER NOT NULL,
        has_label INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        active INTEGER NOT NULL,
        uploaded_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_datasets_org_kind
        ON datasets(organization_id, kind, active)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        total_items INTEGER NOT NULL DEFAULT 0,
        processed_items INTEGER NOT NULL DEFAULT 0,
        failed_items INTEGER NOT NULL DEFAULT 0,
        result TEXT,
        error_message TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_jobs_org_kind_status
        ON jobs(organization_id, kind, status)
    "#,
    // At most one queued-or-running job per organization and kind; closes
    // the race between the submission-time exclusivity check and insert
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_one_active
        ON jobs(organization_id, kind)
        WHERE status IN ('queued', 'running')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS models (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        algorithm TEXT NOT NULL,
        artifact TEXT NOT NULL,
        feature_columns TEXT NOT NULL,
        accuracy REAL NOT NULL,
        precision REAL NOT NULL,
        recall REAL NOT NULL,
        f1_score REAL NOT NULL,
        roc_auc REAL NOT NULL,
        train_samples INTEGER NOT NULL,
        test_samples INTEGER NOT NULL,
        churn_rate REAL NOT NULL,
        trained_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prediction_batches (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        name TEXT NOT NULL,
        storage_key TEXT NOT NULL,
        status TEXT NOT NULL,
        rows_total INTEGER NOT NULL DEFAULT 0,
        rows_succeeded INTEGER NOT NULL DEFAULT 0,
        rows_failed INTEGER NOT NULL DEFAULT 0,
        avg_churn_probability REAL,
        risk_distribution TEXT,
        error_message TEXT,
        created_at TEXT NOT NULL,
        finished_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prediction_records (
        batch_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        organization_id TEXT NOT NULL,
        external_customer_id TEXT NOT NULL,
        churn_probability REAL NOT NULL,
        risk_segment TEXT NOT NULL,
        features TEXT NOT NULL,
        predicted_at TEXT NOT NULL,
        PRIMARY KEY (batch_id, seq)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_records_org_segment
        ON prediction_records(organization_id, risk_segment, predicted_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_cache (
        organization_id TEXT NOT NULL,
        segment TEXT NOT NULL,
        risk_level TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        cta_text TEXT NOT NULL,
        cta_link TEXT NOT NULL,
        generated_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        PRIMARY KEY (organization_id, segment, risk_level)
    )
    "#,
];

/// Create all tables and indexes if they do not exist
pub async fn init(pool: &SqlitePool) -> Result<()> {
    for statement in CREATE_TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
