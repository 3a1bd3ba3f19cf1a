use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use oddsbase::cleanup::{self, CleanupStatus, CleanupTargets};
use oddsbase::cli::db_counts::{self, DbCountsConfig};
use oddsbase::cli::schema_audit::{self, SchemaAuditConfig};
use oddsbase::db::Db;
use oddsbase::migrate::{self, RunOptions};
use oddsbase::resolver::GameResolver;
use oddsbase::steps;
use oddsbase::util::env as env_util;
use oddsbase::validate::{self, DEFAULT_MIN_PASSED};

#[derive(Parser, Debug)]
#[command(name = "ob", version, about = "oddsbase migration admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run every registered migration step in dependency order
    Migrate {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Re-run steps even when a prior run completed them
        #[arg(long, default_value_t = false)]
        no_resume: bool,
        /// Apply the canonical-schema DDL before migrating
        #[arg(long, default_value_t = false)]
        apply_ddl: bool,
        /// Override max pool connections
        #[arg(long)]
        max_connections: Option<u32>,
    },
    /// Run the validation sweep and persist the report
    Validate {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Minimum passed checks required for migration-ready
        #[arg(long)]
        min_passed: Option<usize>,
    },
    /// Drop the legacy schemas (refused unless validation is satisfied)
    Cleanup {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Minimum passed checks required before dropping anything
        #[arg(long)]
        min_passed: Option<usize>,
        /// Optional comma-separated override of the legacy schemas to drop
        #[arg(long, value_delimiter = ',')]
        schemas: Option<Vec<String>>,
        /// Required acknowledgement that the drop is irreversible
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Print row counts for canonical and legacy tables
    DbCounts {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Force printing of recent games (otherwise follows env)
        #[arg(long, default_value_t = false)]
        recent_games: bool,
        /// Override RECENT_GAMES_LIMIT (defaults to env/20)
        #[arg(long)]
        recent_games_limit: Option<i64>,
    },
    /// Emit a structural audit of the canonical schemas
    SchemaAudit {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Optional comma-separated filter of tables
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,
        /// Override max pool connections
        #[arg(long)]
        max_connections: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    oddsbase::tracing::init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            db_url,
            no_resume,
            apply_ddl,
            max_connections,
        } => {
            env_util::preflight_check(
                "ob migrate",
                &[],
                &["OB_DATABASE_URL", "DATABASE_URL", "AUTO_MIGRATE"],
            )
            .ok();
            let url = resolve_url(db_url)?;
            let db = Db::connect(&url, max_connections.unwrap_or(10)).await?;
            if apply_ddl {
                db.apply_migrations().await?;
            }
            let resolver = Arc::new(GameResolver::new(db.clone()));
            let specs = steps::registry();
            let opts = RunOptions { resume: !no_resume };
            let summary = migrate::run_all(&db, resolver, &specs, &opts).await?;

            println!("run {}", summary.run_id);
            for entry in &summary.steps {
                println!(
                    "  {:<28} {:<9} read={} migrated={} skipped={} rejected={}{}",
                    entry.step,
                    entry.status.as_str(),
                    entry.counts.rows_read,
                    entry.counts.rows_migrated,
                    entry.counts.rows_skipped,
                    entry.counts.rows_rejected,
                    entry
                        .notes
                        .as_deref()
                        .map(|n| format!(" ({n})"))
                        .unwrap_or_default(),
                );
            }
            println!(
                "totals: read={} migrated={} skipped={} rejected={}",
                summary.totals.rows_read,
                summary.totals.rows_migrated,
                summary.totals.rows_skipped,
                summary.totals.rows_rejected,
            );
            let failed = summary.failed_steps();
            if !failed.is_empty() {
                bail!("{} step(s) failed: {:?}", failed.len(), failed);
            }
        }
        Commands::Validate { db_url, min_passed } => {
            let url = resolve_url(db_url)?;
            let db = Db::connect_no_migrate(&url, 5).await?;
            let report = validate::run_validation(&db, &validate::default_checks()).await?;
            for o in &report.outcomes {
                println!(
                    "  [{}] {:<28} {} (expected {}, actual {})",
                    if o.passed { "pass" } else { "FAIL" },
                    o.name,
                    o.condition,
                    o.expected,
                    o.actual,
                );
            }
            let min = min_passed.unwrap_or(DEFAULT_MIN_PASSED);
            if report.migration_ready(min) {
                println!(
                    "migration-ready: {} passed, 0 failed (min {})",
                    report.passed_count(),
                    min
                );
            } else {
                bail!(
                    "not migration-ready: {} passed, {} failed (min {})",
                    report.passed_count(),
                    report.failed_count(),
                    min
                );
            }
        }
        Commands::Cleanup {
            db_url,
            min_passed,
            schemas,
            confirm,
        } => {
            if !confirm {
                bail!("cleanup drops the legacy schemas irreversibly; re-run with --confirm");
            }
            let url = resolve_url(db_url)?;
            let db = Db::connect_no_migrate(&url, 5).await?;
            let targets = match schemas {
                Some(s) if !s.is_empty() => CleanupTargets { schemas: s },
                _ => CleanupTargets::default_legacy(),
            };
            let report =
                cleanup::run_cleanup(&db, &targets, min_passed.unwrap_or(DEFAULT_MIN_PASSED))
                    .await?;
            for t in &report.dropped_tables {
                match &t.error {
                    None => println!("  dropped {} (rows={:?})", t.table, t.rows_at_drop),
                    Some(e) => println!("  FAILED  {} ({e})", t.table),
                }
            }
            for s in &report.dropped_schemas {
                println!("  dropped schema {s}");
            }
            if report.status == CleanupStatus::Partial {
                bail!("cleanup partial: {} error(s)", report.errors.len());
            }
            println!("cleanup complete");
        }
        Commands::DbCounts {
            db_url,
            recent_games,
            recent_games_limit,
        } => {
            db_counts::run(DbCountsConfig {
                database_url: db_url,
                show_recent_games: if recent_games { Some(true) } else { None },
                recent_games_limit,
            })
            .await?;
        }
        Commands::SchemaAudit {
            db_url,
            tables,
            max_connections,
        } => {
            schema_audit::run(SchemaAuditConfig {
                database_url: db_url,
                table_filter: tables,
                max_connections,
            })
            .await?;
        }
    }
    Ok(())
}

fn resolve_url(explicit: Option<String>) -> Result<String> {
    match explicit {
        Some(url) => Ok(url),
        None => env_util::db_url_prefer_session(),
    }
}
