//! Migration orchestrator: tier-ordered, failure-tolerant, resumable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::error::MigrateError;
use crate::model::{MigrationLogEntry, MigrationSummary, StepCounts, StepStatus};
use crate::oplog;
use crate::resolver::GameResolver;
use crate::steps::{runner, StepSpec, Tier};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Skip steps that already have a `completed` entry in the migration
    /// log. Idempotent upserts make re-execution safe either way; resume
    /// just avoids re-reading finished sources.
    pub resume: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { resume: true }
    }
}

/// Execute every step, raw tier first, then core, analytics, operational.
///
/// Steps within a tier run concurrently. A failed step never aborts the
/// run; steps depending on a failed step are skipped with a note citing the
/// dependency. Re-running after a full run is a no-op with respect to
/// already-migrated rows.
pub async fn run_all(
    db: &Db,
    resolver: Arc<GameResolver>,
    specs: &[StepSpec],
    opts: &RunOptions,
) -> Result<MigrationSummary> {
    oplog::ensure_ops_tables(db).await?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, steps = specs.len(), resume = opts.resume, "migration run starting");

    let previously_completed: HashSet<String> = if opts.resume {
        oplog::completed_steps(db).await?
    } else {
        HashSet::new()
    };

    let mut summary = MigrationSummary {
        run_id,
        started_at,
        finished_at: started_at,
        totals: StepCounts::default(),
        steps: Vec::new(),
    };
    let mut statuses: HashMap<String, StepStatus> = HashMap::new();

    for tier in Tier::ORDER {
        let tier_specs: Vec<&StepSpec> = specs.iter().filter(|s| s.tier == tier).collect();
        if tier_specs.is_empty() {
            continue;
        }
        info!(tier = tier.as_str(), steps = tier_specs.len(), "tier starting");

        let mut join: JoinSet<Result<MigrationLogEntry>> = JoinSet::new();
        for spec in tier_specs {
            if previously_completed.contains(spec.name) {
                let entry =
                    runner::skip_step(db, spec, run_id, "already completed in prior run").await?;
                statuses.insert(entry.step.clone(), entry.status);
                summary.record(entry);
                continue;
            }
            if let Some(dep) = spec
                .depends_on
                .iter()
                .find(|d| statuses.get(**d).copied() == Some(StepStatus::Failed))
            {
                let note = MigrateError::DependencyFailed {
                    dependency: dep.to_string(),
                }
                .to_string();
                let entry = runner::skip_step(db, spec, run_id, &note).await?;
                statuses.insert(entry.step.clone(), entry.status);
                summary.record(entry);
                continue;
            }

            let db = db.clone();
            let resolver = Arc::clone(&resolver);
            let spec = spec.clone();
            join.spawn(async move { runner::run_step(&db, &resolver, &spec, run_id).await });
        }

        while let Some(joined) = join.join_next().await {
            let entry = joined.context("step task panicked")??;
            statuses.insert(entry.step.clone(), entry.status);
            summary.record(entry);
        }
    }

    summary.finished_at = Utc::now();
    let failed = summary.failed_steps();
    if failed.is_empty() {
        info!(
            %run_id,
            rows_migrated = summary.totals.rows_migrated,
            rows_rejected = summary.totals.rows_rejected,
            skipped = summary.skipped_steps().len(),
            "migration run finished"
        );
    } else {
        warn!(
            %run_id,
            failed = ?failed,
            rows_migrated = summary.totals.rows_migrated,
            "migration run finished with failures"
        );
    }
    Ok(summary)
}
