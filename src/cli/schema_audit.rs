//! Structural dump of the canonical schemas for operator eyeballs.

use std::fmt::Write as _;
use std::io::{self, Write};

use anyhow::{Context, Result};
use sqlx::Row;

use crate::db::Db;
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct SchemaAuditConfig {
    pub database_url: Option<String>,
    pub table_filter: Option<Vec<String>>,
    pub max_connections: Option<u32>,
}

const AUDITED_TABLES: [&str; 9] = [
    "core.games",
    "core.odds",
    "raw.game_boards",
    "analytics.recommendations",
    "analytics.model_performance",
    "ops.scrape_log",
    "ops.migration_log",
    "ops.validation_results",
    "public._sqlx_migrations",
];

pub async fn run(cfg: SchemaAuditConfig) -> Result<()> {
    env_util::init_env();
    safe_println("[schema_audit] starting");

    let db_url = match cfg.database_url.clone() {
        Some(url) => url,
        None => env_util::db_url_prefer_session()?,
    };
    let max_conns = cfg
        .max_connections
        .or_else(|| env_util::env_parse_opt("SCHEMA_AUDIT_MAX_CONNS"))
        .unwrap_or(4);
    let db = Db::connect_no_migrate(&db_url, max_conns).await?;

    let mut tables: Vec<&str> = AUDITED_TABLES.to_vec();
    if let Some(filter) = &cfg.table_filter {
        let wanted: Vec<String> = filter.iter().map(|t| t.trim().to_ascii_lowercase()).collect();
        tables.retain(|&t| {
            let bare = t.rsplit('.').next().unwrap_or(t);
            wanted.iter().any(|w| w.as_str() == t || w.as_str() == bare)
        });
    }

    let mut out = String::new();
    writeln!(out, "SCHEMA AUDIT — total tables: {}", tables.len()).ok();

    for qualified in tables {
        let (schema, table) = qualified
            .split_once('.')
            .unwrap_or(("public", qualified));

        let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .persistent(false)
            .bind(qualified)
            .fetch_optional(&db.pool)
            .await?
            .flatten();
        if exists.is_none() {
            writeln!(out, "\n=== {qualified} ===\n  (missing: not present in schema)").ok();
            continue;
        }

        writeln!(out, "\n=== {qualified} ===").ok();
        emit_columns(&mut out, &db, schema, table).await?;
        emit_pk(&mut out, &db, schema, table).await?;
        emit_unique_constraints(&mut out, &db, schema, table).await?;
        emit_foreign_keys(&mut out, &db, schema, table).await?;
    }

    std::fs::write("schema_audit.out", &out).context("failed to write schema_audit.out")?;
    safe_println(&out);
    Ok(())
}

async fn emit_columns(out: &mut String, db: &Db, schema: &str, table: &str) -> Result<()> {
    let rows = sqlx::query(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns
         WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
    )
    .persistent(false)
    .bind(schema)
    .bind(table)
    .fetch_all(&db.pool)
    .await?;

    writeln!(out, "Columns (name:type:null):").ok();
    for row in rows {
        let name: String = row.get("column_name");
        let dt: String = row.get("data_type");
        let nul: String = row.get("is_nullable");
        writeln!(
            out,
            "  {name}:{dt}:{}",
            if nul == "YES" { "null" } else { "not-null" }
        )
        .ok();
    }
    Ok(())
}

async fn emit_pk(out: &mut String, db: &Db, schema: &str, table: &str) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT c.conname, pg_get_constraintdef(c.oid) AS def
        FROM pg_constraint c
        JOIN pg_class t ON t.oid = c.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'p'"#,
    )
    .persistent(false)
    .bind(schema)
    .bind(table)
    .fetch_all(&db.pool)
    .await?;

    if rows.is_empty() {
        writeln!(out, "Primary Key: (none)").ok();
    } else {
        for row in rows {
            let name: String = row.get("conname");
            let def: String = row.get("def");
            writeln!(out, "Primary Key: {name} {def}").ok();
        }
    }
    Ok(())
}

async fn emit_unique_constraints(out: &mut String, db: &Db, schema: &str, table: &str) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT c.conname, pg_get_constraintdef(c.oid) AS def
        FROM pg_constraint c
        JOIN pg_class t ON t.oid = c.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'u'"#,
    )
    .persistent(false)
    .bind(schema)
    .bind(table)
    .fetch_all(&db.pool)
    .await?;

    if rows.is_empty() {
        writeln!(out, "Unique Constraints: (none)").ok();
    } else {
        writeln!(out, "Unique Constraints:").ok();
        for row in rows {
            let name: String = row.get("conname");
            let def: String = row.get("def");
            writeln!(out, "  {name} {def}").ok();
        }
    }
    Ok(())
}

async fn emit_foreign_keys(out: &mut String, db: &Db, schema: &str, table: &str) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT c.conname, pg_get_constraintdef(c.oid) AS def
        FROM pg_constraint c
        JOIN pg_class t ON t.oid = c.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'f'"#,
    )
    .persistent(false)
    .bind(schema)
    .bind(table)
    .fetch_all(&db.pool)
    .await?;

    if rows.is_empty() {
        writeln!(out, "Foreign Keys: (none)").ok();
    } else {
        writeln!(out, "Foreign Keys:").ok();
        for row in rows {
            let name: String = row.get("conname");
            let def: String = row.get("def");
            writeln!(out, "  {name} {def}").ok();
        }
    }
    Ok(())
}

fn safe_println(s: &str) {
    let mut stdout = io::stdout();
    let _ = writeln!(stdout, "{}", s);
}
