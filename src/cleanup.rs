//! Validation-gated removal of the legacy schemas.
//!
//! This is the only irreversible operation in the engine and the only place
//! where an unmet precondition is a hard stop: the gate re-reads the
//! persisted validation results and refuses to touch anything unless every
//! check passed and enough checks ran. There is no compensating
//! transaction.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{count_rows_lenient, is_undefined_table_error, Db};
use crate::error::MigrateError;

/// Legacy schemas eligible for removal.
#[derive(Debug, Clone)]
pub struct CleanupTargets {
    pub schemas: Vec<String>,
}

impl CleanupTargets {
    pub fn default_legacy() -> Self {
        Self {
            schemas: vec!["scraped".into(), "betting".into(), "tracking".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupStatus {
    Success,
    Partial,
}

#[derive(Debug, Serialize)]
pub struct DroppedTable {
    pub table: String,
    /// Row count captured for the audit trail just before the drop.
    pub rows_at_drop: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub status: CleanupStatus,
    pub dropped_tables: Vec<DroppedTable>,
    pub dropped_schemas: Vec<String>,
    pub errors: Vec<String>,
}

// Enforced precondition, not advisory: latest persisted validation results
// must show zero failures and at least `min_passed` passes.
async fn assert_validation_satisfied(db: &Db, min_passed: usize) -> Result<(), MigrateError> {
    let rows: Vec<(String, i64)> = match sqlx::query_as(
        "SELECT status, COUNT(*) FROM ops.validation_results GROUP BY status",
    )
    .persistent(false)
    .fetch_all(&db.pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) if is_undefined_table_error(&e) => {
            return Err(MigrateError::ValidationNotSatisfied {
                reason: "no validation results recorded; run validate first".to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let mut passed = 0i64;
    let mut failed = 0i64;
    for (status, count) in rows {
        match status.as_str() {
            "passed" => passed = count,
            "failed" => failed = count,
            _ => {}
        }
    }
    if failed > 0 {
        return Err(MigrateError::ValidationNotSatisfied {
            reason: format!("{failed} validation check(s) failed"),
        });
    }
    if passed < min_passed as i64 {
        return Err(MigrateError::ValidationNotSatisfied {
            reason: format!(
                "only {passed} validation check(s) passed; need at least {min_passed}"
            ),
        });
    }
    Ok(())
}

/// Drop every table in each legacy schema, then the schema itself.
///
/// Individual drop failures (e.g. a dependent view) are recorded and the
/// gate continues; the report is then `partial` and nothing is retried.
pub async fn run_cleanup(
    db: &Db,
    targets: &CleanupTargets,
    min_passed: usize,
) -> Result<CleanupReport, MigrateError> {
    assert_validation_satisfied(db, min_passed).await?;

    let mut report = CleanupReport {
        status: CleanupStatus::Success,
        dropped_tables: Vec::new(),
        dropped_schemas: Vec::new(),
        errors: Vec::new(),
    };

    for schema in &targets.schemas {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .persistent(false)
        .bind(schema)
        .fetch_one(&db.pool)
        .await?;
        if !exists {
            info!(schema, "legacy schema already absent; nothing to drop");
            continue;
        }

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .persistent(false)
        .bind(schema)
        .fetch_all(&db.pool)
        .await?;

        let mut schema_clean = true;
        for table in tables {
            let qualified = format!("{schema}.{table}");
            let rows_at_drop = count_rows_lenient(db, &qualified).await.ok();
            info!(table = %qualified, rows = ?rows_at_drop, "dropping legacy table");
            match sqlx::raw_sql(&format!("DROP TABLE {qualified}"))
                .execute(&db.pool)
                .await
            {
                Ok(_) => report.dropped_tables.push(DroppedTable {
                    table: qualified,
                    rows_at_drop,
                    error: None,
                }),
                Err(e) => {
                    schema_clean = false;
                    let err = MigrateError::DestructiveOperation {
                        object: qualified.clone(),
                        reason: e.to_string(),
                    };
                    error!(table = %qualified, error = %err, "drop failed; continuing");
                    report.errors.push(err.to_string());
                    report.dropped_tables.push(DroppedTable {
                        table: qualified,
                        rows_at_drop,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if schema_clean {
            match sqlx::raw_sql(&format!("DROP SCHEMA {schema}"))
                .execute(&db.pool)
                .await
            {
                Ok(_) => {
                    info!(schema, "legacy schema dropped");
                    report.dropped_schemas.push(schema.clone());
                }
                Err(e) => {
                    let err = MigrateError::DestructiveOperation {
                        object: schema.clone(),
                        reason: e.to_string(),
                    };
                    error!(schema, error = %err, "schema drop failed; continuing");
                    report.errors.push(err.to_string());
                }
            }
        } else {
            warn!(schema, "schema retained: some tables could not be dropped");
        }
    }

    if !report.errors.is_empty() {
        report.status = CleanupStatus::Partial;
    }
    info!(
        status = ?report.status,
        tables = report.dropped_tables.len(),
        schemas = report.dropped_schemas.len(),
        errors = report.errors.len(),
        "cleanup finished"
    );
    Ok(report)
}
