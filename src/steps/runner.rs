//! Executes one migration step as an idempotent, logged unit of work.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{mappers, StepSpec};
use crate::db::{table_exists, Db};
use crate::error::MigrateError;
use crate::model::{MigrationLogEntry, StepCounts, StepStatus};
use crate::oplog;
use crate::resolver::GameResolver;

pub const NOTE_SOURCE_MISSING: &str = "source table does not exist";

fn base_entry(spec: &StepSpec, run_id: Uuid) -> MigrationLogEntry {
    MigrationLogEntry {
        run_id,
        step: spec.name.to_string(),
        source_table: spec.source_table.to_string(),
        target_table: spec.target_table.to_string(),
        started_at: Utc::now(),
        finished_at: None,
        counts: StepCounts::default(),
        status: StepStatus::Started,
        error: None,
        notes: None,
    }
}

/// Append a `skipped` entry without touching any data. Used by the
/// orchestrator for resume and dependency skips.
pub async fn skip_step(
    db: &Db,
    spec: &StepSpec,
    run_id: Uuid,
    note: &str,
) -> Result<MigrationLogEntry> {
    let mut entry = base_entry(spec, run_id);
    entry.status = StepStatus::Skipped;
    entry.notes = Some(note.to_string());
    entry.finished_at = Some(Utc::now());
    oplog::append(db, &entry).await?;
    info!(step = spec.name, note, "step skipped");
    Ok(entry)
}

/// Run one step end to end.
///
/// A missing source table is a `skipped` outcome, not an error (expected in
/// partially-deployed environments). A missing target table is `failed`:
/// the step could not run at all. Row-level problems never surface here;
/// they are counted in `rows_rejected` by the mapper.
pub async fn run_step(
    db: &Db,
    resolver: &GameResolver,
    spec: &StepSpec,
    run_id: Uuid,
) -> Result<MigrationLogEntry> {
    let started = base_entry(spec, run_id);
    oplog::append(db, &started).await?;

    let mut entry = started;

    if !table_exists(db, spec.target_table).await? {
        entry.status = StepStatus::Failed;
        entry.error = Some(format!(
            "target table {} does not exist",
            spec.target_table
        ));
        entry.finished_at = Some(Utc::now());
        oplog::append(db, &entry).await?;
        warn!(
            step = spec.name,
            target = spec.target_table,
            "target table missing; step failed"
        );
        return Ok(entry);
    }

    match mappers::transfer(db, resolver, spec).await {
        Ok(counts) => {
            entry.counts = counts;
            entry.status = StepStatus::Completed;
        }
        // Expected in partially-deployed environments; skip, don't fail.
        Err(MigrateError::SourceMissing { .. }) => {
            entry.status = StepStatus::Skipped;
            entry.notes = Some(NOTE_SOURCE_MISSING.to_string());
            info!(
                step = spec.name,
                source = spec.source_table,
                "source table missing; step skipped"
            );
        }
        Err(e) => {
            entry.status = StepStatus::Failed;
            entry.error = Some(e.to_string());
            warn!(step = spec.name, error = %e, "step failed");
        }
    }
    entry.finished_at = Some(Utc::now());
    oplog::append(db, &entry).await?;
    info!(
        step = spec.name,
        status = entry.status.as_str(),
        rows_read = entry.counts.rows_read,
        rows_migrated = entry.counts.rows_migrated,
        rows_skipped = entry.counts.rows_skipped,
        rows_rejected = entry.counts.rows_rejected,
        "step finished"
    );
    Ok(entry)
}
