use anyhow::Result;
use sqlx::Row;

use crate::db::{count_rows_lenient, is_undefined_table_error, Db};
use crate::model::CanonicalGame;
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct DbCountsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// Force whether recent games should be displayed (defaults to env RECENT_GAMES).
    pub show_recent_games: Option<bool>,
    /// Override the recent games LIMIT (defaults to env RECENT_GAMES_LIMIT or 20).
    pub recent_games_limit: Option<i64>,
}

const CANONICAL_TABLES: [&str; 8] = [
    "core.games",
    "core.odds",
    "raw.game_boards",
    "analytics.recommendations",
    "analytics.model_performance",
    "ops.scrape_log",
    "ops.migration_log",
    "ops.validation_results",
];

const LEGACY_TABLES: [&str; 10] = [
    "scraped.game_boards",
    "scraped.mlb_api_games",
    "betting.sbr_moneyline",
    "betting.sbr_spreads",
    "betting.sbr_totals",
    "betting.action_network_odds",
    "betting.odds_api_lines",
    "tracking.recommendations",
    "tracking.model_performance",
    "tracking.scrape_log",
];

pub async fn run(cfg: DbCountsConfig) -> Result<()> {
    env_util::init_env();
    let db_url = match cfg.database_url.clone() {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let db = Db::connect_no_migrate(&db_url, 5).await?;

    println!("== canonical tables ==");
    for table in CANONICAL_TABLES {
        let n = count_rows_lenient(&db, table).await?;
        println!("{table:<36} {n:>10}");
    }

    println!("\n== legacy tables ==");
    for table in LEGACY_TABLES {
        let n = count_rows_lenient(&db, table).await?;
        println!("{table:<36} {n:>10}");
    }

    // Migration log rollup; absent before the first run.
    match sqlx::query("SELECT status, COUNT(*) AS n FROM ops.migration_log GROUP BY status")
        .persistent(false)
        .fetch_all(&db.pool)
        .await
    {
        Ok(rows) => {
            println!("\n== migration log ==");
            for r in rows {
                let status: String = r.get("status");
                let n: i64 = r.get("n");
                println!("{status:<36} {n:>10}");
            }
        }
        Err(e) if is_undefined_table_error(&e) => {
            println!("\n(ops.migration_log not present yet)");
        }
        Err(e) => return Err(e.into()),
    }

    let flagged = match sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM core.games WHERE review_flag",
    )
    .persistent(false)
    .fetch_one(&db.pool)
    .await
    {
        Ok(n) => n,
        Err(e) if is_undefined_table_error(&e) => 0,
        Err(e) => return Err(e.into()),
    };
    if flagged > 0 {
        println!("\ngames flagged for reversed-pair review: {flagged}");
    }

    let show_recent = cfg
        .show_recent_games
        .unwrap_or_else(|| env_util::env_flag("RECENT_GAMES", false));
    if show_recent {
        let limit = cfg
            .recent_games_limit
            .or_else(|| env_util::env_parse_opt("RECENT_GAMES_LIMIT"))
            .unwrap_or(20);
        let games: Vec<CanonicalGame> =
            sqlx::query_as("SELECT * FROM core.games ORDER BY game_date DESC, id DESC LIMIT $1")
                .persistent(false)
                .bind(limit)
                .fetch_all(&db.pool)
                .await?;
        println!("\n== recent games ==");
        for g in games {
            let refs = [
                ("sbr", &g.sbr_game_id),
                ("mlb", &g.mlb_stats_id),
                ("odds", &g.odds_api_id),
                ("an", &g.action_network_id),
            ]
            .iter()
            .filter(|(_, v)| v.is_some())
            .map(|(k, _)| *k)
            .collect::<Vec<_>>()
            .join(",");
            let flag = if g.review_flag { " REVIEW" } else { "" };
            println!(
                "#{:<7} {} {} @ {} [{}] refs=[{refs}]{flag}",
                g.id, g.game_date, g.away_team, g.home_team, g.status
            );
        }
    }

    Ok(())
}
