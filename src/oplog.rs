//! Append-only migration log (`ops.migration_log`).
//!
//! Every step execution writes a `started` row up front and a terminal row
//! (`completed|failed|skipped`) when it ends; rows are never mutated, so an
//! interrupted run stays diagnosable and a later run can resume from here.

use std::collections::HashSet;

use anyhow::Result;

use crate::db::Db;
use crate::model::MigrationLogEntry;

/// Create the ops bookkeeping tables when absent. Idempotent; run_all calls
/// this so logging works even before the full DDL set has been applied.
pub async fn ensure_ops_tables(db: &Db) -> Result<()> {
    sqlx::raw_sql(
        "CREATE SCHEMA IF NOT EXISTS ops;
         CREATE TABLE IF NOT EXISTS ops.migration_log (
            id            BIGSERIAL PRIMARY KEY,
            run_id        UUID NOT NULL,
            step          TEXT NOT NULL,
            source_table  TEXT NOT NULL,
            target_table  TEXT NOT NULL,
            started_at    TIMESTAMPTZ NOT NULL,
            finished_at   TIMESTAMPTZ,
            rows_read     BIGINT NOT NULL DEFAULT 0,
            rows_migrated BIGINT NOT NULL DEFAULT 0,
            rows_skipped  BIGINT NOT NULL DEFAULT 0,
            rows_rejected BIGINT NOT NULL DEFAULT 0,
            status        TEXT NOT NULL,
            error         TEXT,
            notes         TEXT
         );
         CREATE INDEX IF NOT EXISTS migration_log_step_idx
            ON ops.migration_log (step, status);
         CREATE TABLE IF NOT EXISTS ops.validation_results (
            id         BIGSERIAL PRIMARY KEY,
            category   TEXT NOT NULL,
            name       TEXT NOT NULL,
            condition  TEXT NOT NULL,
            expected   TEXT NOT NULL,
            actual     TEXT NOT NULL,
            status     TEXT NOT NULL,
            checked_at TIMESTAMPTZ NOT NULL DEFAULT now()
         );",
    )
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Append one log row. Never updates existing rows.
pub async fn append(db: &Db, entry: &MigrationLogEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO ops.migration_log
            (run_id, step, source_table, target_table, started_at, finished_at,
             rows_read, rows_migrated, rows_skipped, rows_rejected, status, error, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .persistent(false)
    .bind(entry.run_id)
    .bind(&entry.step)
    .bind(&entry.source_table)
    .bind(&entry.target_table)
    .bind(entry.started_at)
    .bind(entry.finished_at)
    .bind(entry.counts.rows_read)
    .bind(entry.counts.rows_migrated)
    .bind(entry.counts.rows_skipped)
    .bind(entry.counts.rows_rejected)
    .bind(entry.status.as_str())
    .bind(&entry.error)
    .bind(&entry.notes)
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Step names with at least one `completed` entry, across all prior runs.
/// Input to the orchestrator's resume decision.
pub async fn completed_steps(db: &Db) -> Result<HashSet<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT step FROM ops.migration_log WHERE status = 'completed'",
    )
    .persistent(false)
    .fetch_all(&db.pool)
    .await?;
    Ok(names.into_iter().collect())
}
