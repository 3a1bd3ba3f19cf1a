use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One row of `core.games`, the canonical game entity.
///
/// At most one row exists per (home_team, away_team, game_date). External
/// reference ids are unique within their own source namespace and stay NULL
/// when that source never reported the game.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CanonicalGame {
    pub id: i64,
    pub home_team: String,
    pub away_team: String,
    pub game_date: NaiveDate,
    pub game_time: Option<DateTime<Utc>>,
    pub status: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub sbr_game_id: Option<String>,
    pub mlb_stats_id: Option<String>,
    pub odds_api_id: Option<String>,
    pub action_network_id: Option<String>,
    pub data_tier: i16,
    /// Set when the row was ever matched through a reversed home/away pair;
    /// downstream review decides whether the flip was legitimate.
    pub review_flag: bool,
}

/// Terminal status of one step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

/// Row accounting for one step execution.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StepCounts {
    pub rows_read: i64,
    /// Inserted or actually changed by the idempotency-key upsert.
    pub rows_migrated: i64,
    /// Already present with identical key values; untouched.
    pub rows_skipped: i64,
    /// Rejected per-row (type coercion failure, unresolved team).
    pub rows_rejected: i64,
}

impl StepCounts {
    pub fn absorb(&mut self, other: StepCounts) {
        self.rows_read += other.rows_read;
        self.rows_migrated += other.rows_migrated;
        self.rows_skipped += other.rows_skipped;
        self.rows_rejected += other.rows_rejected;
    }
}

/// One append-only entry of `ops.migration_log`.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationLogEntry {
    pub run_id: Uuid,
    pub step: String,
    pub source_table: String,
    pub target_table: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: StepCounts,
    pub status: StepStatus,
    pub error: Option<String>,
    pub notes: Option<String>,
}

/// Aggregated result of one `run_all` invocation.
#[derive(Debug, Serialize)]
pub struct MigrationSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: StepCounts,
    pub steps: Vec<MigrationLogEntry>,
}

impl MigrationSummary {
    pub fn record(&mut self, entry: MigrationLogEntry) {
        self.totals.absorb(entry.counts);
        self.steps.push(entry);
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|e| e.status == StepStatus::Failed)
            .map(|e| e.step.as_str())
            .collect()
    }

    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|e| e.status == StepStatus::Skipped)
            .map(|e| e.step.as_str())
            .collect()
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|e| e.status == StepStatus::Completed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: &str, status: StepStatus, migrated: i64) -> MigrationLogEntry {
        MigrationLogEntry {
            run_id: Uuid::nil(),
            step: step.to_string(),
            source_table: "betting.x".into(),
            target_table: "core.y".into(),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            counts: StepCounts {
                rows_read: migrated,
                rows_migrated: migrated,
                ..Default::default()
            },
            status,
            error: None,
            notes: None,
        }
    }

    #[test]
    fn summary_aggregates_counts_and_partitions_statuses() {
        let mut summary = MigrationSummary {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            totals: StepCounts::default(),
            steps: Vec::new(),
        };
        summary.record(entry("a", StepStatus::Completed, 10));
        summary.record(entry("b", StepStatus::Failed, 0));
        summary.record(entry("c", StepStatus::Skipped, 0));
        summary.record(entry("d", StepStatus::Completed, 5));

        assert_eq!(summary.totals.rows_migrated, 15);
        assert_eq!(summary.failed_steps(), vec!["b"]);
        assert_eq!(summary.skipped_steps(), vec!["c"]);
        assert_eq!(summary.completed_steps(), 2);
    }
}
