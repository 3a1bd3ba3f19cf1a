use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::util::env::env_flag;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect_no_migrate(database_url, max_connections).await?;

        // Optional auto-migrate gate (default: OFF).
        // Default off because this engine must safely run against legacy/partial
        // schemas owned by other producers. Enable explicitly with AUTO_MIGRATE=1.
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on, custom runner)");
            db.apply_migrations().await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    // Variant that NEVER runs migrations regardless of env (for read/validate paths).
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect_no_migrate(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        // Ensure TLS is enabled when the DSN asks for it.
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    let _ = sqlx::query("SET application_name = 'oddsbase'")
                        .persistent(false)
                        .execute(&mut *conn)
                        .await;
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Apply the numbered `./migrations/*.sql` files that have not been
    /// applied yet. Public so the CLI can force DDL without the env gate.
    pub async fn apply_migrations(&self) -> Result<()> {
        Self::run_migrations(&self.pool).await
    }
}

impl Db {
    // Custom lightweight migration runner; ignores non-numeric filenames and
    // records a sha256 checksum per applied file.
    async fn run_migrations(pool: &PgPool) -> Result<()> {
        use std::{fs, path::Path};
        let dir = Path::new("./migrations");
        if !dir.exists() {
            return Ok(());
        }
        // Ensure tracking table exists (raw_sql avoids prepared statements under PgBouncer)
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now(),
                checksum BYTEA
             )",
        )
        .execute(pool)
        .await?;
        let applied_rows = sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
            .fetch_all(pool)
            .await?;
        use std::collections::HashSet;
        let mut applied: HashSet<i64> = HashSet::new();
        for r in applied_rows {
            applied.insert(r.try_get::<i64, _>(0)?);
        }
        // Collect candidate migration files: digits '_' rest '.sql'
        let mut candidates: Vec<(i64, String, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(fname) = path.file_name().and_then(|s| s.to_str()) {
                let num_str: String = fname.chars().take_while(|c| c.is_ascii_digit()).collect();
                if num_str.is_empty() || !fname.ends_with(".sql") {
                    continue;
                }
                if let Some(rest) = fname
                    .strip_prefix(num_str.as_str())
                    .and_then(|s| s.strip_prefix('_'))
                {
                    if let Ok(version) = num_str.parse::<i64>() {
                        candidates.push((version, rest.trim_end_matches(".sql").to_string(), path));
                    }
                }
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);
        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)?;
            let checksum = Sha256::digest(sql.as_bytes());
            info!(version, file=?path, "applying migration (two-phase)");

            // Phase 1: strip CREATE INDEX CONCURRENTLY statements so they are
            // not executed inside an implicit transaction (which Postgres
            // forbids). Line-oriented scan; statements end at the first ';'.
            let mut transactional = String::with_capacity(sql.len());
            let mut concurrent_indexes: Vec<String> = Vec::new();
            let mut capturing = false;
            let mut buf = String::new();
            for line in sql.lines() {
                let lt = line.trim_start().to_lowercase();
                if !capturing && lt.starts_with("create index concurrently") {
                    capturing = true;
                    buf.clear();
                    buf.push_str(line);
                    buf.push('\n');
                    if line.contains(';') {
                        capturing = false;
                        concurrent_indexes.push(buf.clone());
                        buf.clear();
                    }
                    continue;
                }
                if capturing {
                    buf.push_str(line);
                    buf.push('\n');
                    if line.contains(';') {
                        capturing = false;
                        concurrent_indexes.push(buf.clone());
                        buf.clear();
                    }
                    continue;
                }
                transactional.push_str(line);
                transactional.push('\n');
            }
            let trimmed = transactional.trim();
            if !trimmed.is_empty() {
                sqlx::raw_sql(trimmed).execute(pool).await?;
            }
            // Phase 2: run each CREATE INDEX CONCURRENTLY individually in
            // autocommit context.
            for stmt in concurrent_indexes {
                let stmt_trim = stmt.trim();
                if stmt_trim.is_empty() {
                    continue;
                }
                info!(migration_version = version, index_stmt = %stmt_trim, "creating concurrent index");
                if let Err(e) = sqlx::raw_sql(stmt_trim).execute(pool).await {
                    warn!(migration_version = version, error = %e, "concurrent index creation failed");
                    return Err(e.into());
                }
            }
            sqlx::query(
                "INSERT INTO _sqlx_migrations(version, description, checksum) VALUES ($1, $2, $3)
                 ON CONFLICT (version) DO UPDATE SET checksum = EXCLUDED.checksum",
            )
            .persistent(false)
            .bind(version)
            .bind(&desc)
            .bind(checksum.as_slice())
            .execute(pool)
            .await?;
            applied.insert(version);
        }
        if let Ok(r) = sqlx::raw_sql(
            "SELECT version, description FROM _sqlx_migrations ORDER BY version DESC LIMIT 1",
        )
        .fetch_one(pool)
        .await
        {
            let version: i64 = r.try_get(0).unwrap_or_default();
            let desc: String = r
                .try_get::<Option<String>, _>(1)
                .ok()
                .flatten()
                .unwrap_or_default();
            info!(version, desc, "migrations up-to-date (custom)");
        }
        Ok(())
    }
}

/// Whether `name` resolves to a relation visible on the current search_path.
///
/// We intentionally check *visibility* via to_regclass rather than
/// information_schema: to_regclass reflects what an unqualified (or
/// schema-qualified) reference will actually hit at runtime.
pub async fn table_exists(db: &Db, name: &str) -> Result<bool, sqlx::Error> {
    let visible: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .persistent(false)
        .bind(name)
        .fetch_one(&db.pool)
        .await?;
    Ok(visible)
}

/// Lenient row count: missing table counts as zero instead of erroring.
/// Legacy environments routinely lack some of the audited tables.
pub async fn count_rows_lenient(db: &Db, table: &str) -> Result<i64> {
    match sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
        .persistent(false)
        .fetch_one(&db.pool)
        .await
    {
        Ok(val) => Ok(val),
        Err(e) if is_undefined_table_error(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub fn is_undefined_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
        _ => false,
    }
}
