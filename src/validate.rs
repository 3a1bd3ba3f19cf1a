//! Quantitative validation of the migrated state.
//!
//! Every run clears the previous results and re-evaluates the full check
//! set against the live database, so `ops.validation_results` always
//! reflects current truth. No check aborts the sweep; the cleanup gate
//! consumes the persisted rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{count_rows_lenient, table_exists, Db};
use crate::oplog;

/// Floor for `migration_ready`: guards against an empty or vacuous
/// validation run silently "passing".
pub const DEFAULT_MIN_PASSED: usize = 12;

#[derive(Debug, Clone)]
pub enum CheckKind {
    /// Target row count >= source row count, minus an explicit tolerance
    /// for steps that intentionally collapse duplicates.
    CountParity {
        source: &'static str,
        target: &'static str,
        target_filter: Option<&'static str>,
        tolerance_pct: f64,
    },
    /// No child row references a missing parent.
    ReferentialIntegrity {
        table: &'static str,
        fk_column: &'static str,
        parent_table: &'static str,
        parent_column: &'static str,
    },
    /// Table exists and holds at least `min_rows` rows.
    Structural {
        table: &'static str,
        min_rows: i64,
    },
}

#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub category: &'static str,
    pub name: &'static str,
    pub kind: CheckKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub category: String,
    pub name: String,
    pub condition: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub checked_at: DateTime<Utc>,
    pub outcomes: Vec<ValidationOutcome>,
}

impl ValidationReport {
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed).count()
    }

    /// Ready for destructive cleanup: nothing failed and enough checks
    /// actually ran and passed.
    pub fn migration_ready(&self, min_passed: usize) -> bool {
        self.failed_count() == 0 && self.passed_count() >= min_passed
    }
}

/// The default check set covering every target table of the step registry.
pub fn default_checks() -> Vec<CheckSpec> {
    let mut checks = vec![
        CheckSpec {
            category: "count_parity",
            name: "raw_game_boards",
            kind: CheckKind::CountParity {
                source: "scraped.game_boards",
                target: "raw.game_boards",
                target_filter: None,
                tolerance_pct: 0.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "odds_sbr_moneyline",
            kind: CheckKind::CountParity {
                source: "betting.sbr_moneyline",
                target: "core.odds",
                target_filter: Some("market = 'moneyline' AND source_tag = 'sbr'"),
                // identical (game, book) lines across sbr snapshots collapse
                tolerance_pct: 10.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "odds_sbr_spread",
            kind: CheckKind::CountParity {
                source: "betting.sbr_spreads",
                target: "core.odds",
                target_filter: Some("market = 'spread' AND source_tag = 'sbr'"),
                tolerance_pct: 10.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "odds_sbr_total",
            kind: CheckKind::CountParity {
                source: "betting.sbr_totals",
                target: "core.odds",
                target_filter: Some("market = 'total' AND source_tag = 'sbr'"),
                tolerance_pct: 10.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "odds_action_network",
            kind: CheckKind::CountParity {
                source: "betting.action_network_odds",
                target: "core.odds",
                target_filter: Some("source_tag = 'action_network'"),
                tolerance_pct: 10.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "odds_api_lines",
            kind: CheckKind::CountParity {
                source: "betting.odds_api_lines",
                target: "core.odds",
                target_filter: Some("source_tag = 'odds_api'"),
                tolerance_pct: 10.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "recommendations",
            kind: CheckKind::CountParity {
                source: "tracking.recommendations",
                target: "analytics.recommendations",
                target_filter: None,
                tolerance_pct: 0.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "model_performance",
            kind: CheckKind::CountParity {
                source: "tracking.model_performance",
                target: "analytics.model_performance",
                target_filter: None,
                tolerance_pct: 0.0,
            },
        },
        CheckSpec {
            category: "count_parity",
            name: "scrape_log",
            kind: CheckKind::CountParity {
                source: "tracking.scrape_log",
                target: "ops.scrape_log",
                target_filter: None,
                tolerance_pct: 0.0,
            },
        },
        CheckSpec {
            category: "referential_integrity",
            name: "odds_game_fk",
            kind: CheckKind::ReferentialIntegrity {
                table: "core.odds",
                fk_column: "game_id",
                parent_table: "core.games",
                parent_column: "id",
            },
        },
        CheckSpec {
            category: "referential_integrity",
            name: "recommendations_game_fk",
            kind: CheckKind::ReferentialIntegrity {
                table: "analytics.recommendations",
                fk_column: "game_id",
                parent_table: "core.games",
                parent_column: "id",
            },
        },
        CheckSpec {
            category: "structural",
            name: "games_present",
            kind: CheckKind::Structural {
                table: "core.games",
                min_rows: 1,
            },
        },
    ];
    for (name, table) in [
        ("odds_table", "core.odds"),
        ("game_boards_table", "raw.game_boards"),
        ("recommendations_table", "analytics.recommendations"),
        ("performance_table", "analytics.model_performance"),
        ("scrape_log_table", "ops.scrape_log"),
        ("migration_log_table", "ops.migration_log"),
    ] {
        checks.push(CheckSpec {
            category: "structural",
            name,
            kind: CheckKind::Structural {
                table,
                min_rows: 0,
            },
        });
    }
    checks
}

async fn evaluate(db: &Db, check: &CheckSpec) -> Result<ValidationOutcome> {
    let (condition, expected, actual, passed) = match &check.kind {
        CheckKind::CountParity {
            source,
            target,
            target_filter,
            tolerance_pct,
        } => {
            let source_count = count_rows_lenient(db, source).await?;
            let target_count = match target_filter {
                Some(filter) => {
                    sqlx::query_scalar::<_, i64>(&format!(
                        "SELECT COUNT(*) FROM {target} WHERE {filter}"
                    ))
                    .persistent(false)
                    .fetch_one(&db.pool)
                    .await?
                }
                None => count_rows_lenient(db, target).await?,
            };
            let floor = ((source_count as f64) * (1.0 - tolerance_pct / 100.0)).ceil() as i64;
            let condition = match target_filter {
                Some(f) => format!(
                    "count({target} where {f}) >= count({source}) - {tolerance_pct}%"
                ),
                None => format!("count({target}) >= count({source}) - {tolerance_pct}%"),
            };
            (
                condition,
                format!(">= {floor}"),
                format!("{target_count} (source={source_count})"),
                target_count >= floor,
            )
        }
        CheckKind::ReferentialIntegrity {
            table,
            fk_column,
            parent_table,
            parent_column,
        } => {
            let orphans: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {table} c
                 LEFT JOIN {parent_table} p ON p.{parent_column} = c.{fk_column}
                 WHERE c.{fk_column} IS NOT NULL AND p.{parent_column} IS NULL"
            ))
            .persistent(false)
            .fetch_one(&db.pool)
            .await?;
            (
                format!("{table}.{fk_column} -> {parent_table}.{parent_column} has no orphans"),
                "0 orphans".to_string(),
                format!("{orphans} orphans"),
                orphans == 0,
            )
        }
        CheckKind::Structural { table, min_rows } => {
            let exists = table_exists(db, table).await?;
            let rows = if exists {
                count_rows_lenient(db, table).await?
            } else {
                0
            };
            (
                format!("{table} exists with >= {min_rows} rows"),
                format!("exists, >= {min_rows} rows"),
                if exists {
                    format!("exists, {rows} rows")
                } else {
                    "missing".to_string()
                },
                exists && rows >= *min_rows,
            )
        }
    };
    Ok(ValidationOutcome {
        category: check.category.to_string(),
        name: check.name.to_string(),
        condition,
        expected,
        actual,
        passed,
    })
}

/// Run every declared check, persist the outcomes, return the full report.
pub async fn run_validation(db: &Db, checks: &[CheckSpec]) -> Result<ValidationReport> {
    oplog::ensure_ops_tables(db).await?;

    // Previous results are stale history, not state; drop them first.
    sqlx::query("DELETE FROM ops.validation_results")
        .persistent(false)
        .execute(&db.pool)
        .await?;

    let checked_at = Utc::now();
    let mut outcomes = Vec::with_capacity(checks.len());
    for check in checks {
        let outcome = match evaluate(db, check).await {
            Ok(o) => o,
            // A check that cannot evaluate is a failed check, not an
            // aborted sweep.
            Err(e) => ValidationOutcome {
                category: check.category.to_string(),
                name: check.name.to_string(),
                condition: "check evaluates".to_string(),
                expected: "evaluation succeeds".to_string(),
                actual: format!("error: {e}"),
                passed: false,
            },
        };
        if outcome.passed {
            info!(check = outcome.name, actual = %outcome.actual, "check passed");
        } else {
            warn!(
                check = outcome.name,
                expected = %outcome.expected,
                actual = %outcome.actual,
                "check failed"
            );
        }
        sqlx::query(
            "INSERT INTO ops.validation_results
                (category, name, condition, expected, actual, status, checked_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .persistent(false)
        .bind(&outcome.category)
        .bind(&outcome.name)
        .bind(&outcome.condition)
        .bind(&outcome.expected)
        .bind(&outcome.actual)
        .bind(if outcome.passed { "passed" } else { "failed" })
        .bind(checked_at)
        .execute(&db.pool)
        .await?;
        outcomes.push(outcome);
    }

    // Surface reversed-pair matches for the data owner; informational only.
    if let Ok(flagged) =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM core.games WHERE review_flag")
            .persistent(false)
            .fetch_one(&db.pool)
            .await
    {
        if flagged > 0 {
            warn!(flagged, "games matched via reversed home/away pairs await review");
        }
    }

    let report = ValidationReport {
        checked_at,
        outcomes,
    };
    info!(
        passed = report.passed_count(),
        failed = report.failed_count(),
        "validation sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(passed: bool) -> ValidationOutcome {
        ValidationOutcome {
            category: "structural".into(),
            name: "x".into(),
            condition: "c".into(),
            expected: "e".into(),
            actual: "a".into(),
            passed,
        }
    }

    #[test]
    fn ready_requires_zero_failures_and_a_floor() {
        let mut report = ValidationReport {
            checked_at: Utc::now(),
            outcomes: vec![outcome(true); 12],
        };
        assert!(report.migration_ready(12));
        assert!(!report.migration_ready(13));

        report.outcomes.push(outcome(false));
        assert!(!report.migration_ready(12));
    }

    #[test]
    fn empty_report_is_never_ready_with_a_floor() {
        let report = ValidationReport {
            checked_at: Utc::now(),
            outcomes: Vec::new(),
        };
        assert!(!report.migration_ready(1));
    }

    #[test]
    fn default_checks_cover_every_target_table() {
        let checks = default_checks();
        assert!(checks.len() >= DEFAULT_MIN_PASSED);
        let structural: Vec<&str> = checks
            .iter()
            .filter_map(|c| match &c.kind {
                CheckKind::Structural { table, .. } => Some(*table),
                _ => None,
            })
            .collect();
        for table in [
            "core.games",
            "core.odds",
            "raw.game_boards",
            "analytics.recommendations",
            "analytics.model_performance",
            "ops.scrape_log",
        ] {
            assert!(structural.contains(&table), "missing structural check for {table}");
        }
    }
}
