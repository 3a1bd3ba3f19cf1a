//! Column-mapping functions: one legacy row in, one idempotent upsert out.
//!
//! Every mapper pages its source with keyset pagination, rejects
//! unconvertible rows individually, and counts a row as migrated only when
//! the upsert actually inserted or changed something, so re-running a
//! completed step reports zero migrated rows.

use sqlx::postgres::PgRow;
use tracing::{debug, info, warn};

use super::row;
use super::{StepKind, StepSpec};
use crate::db::{table_exists, Db};
use crate::error::MigrateError;
use crate::model::StepCounts;
use crate::resolver::{GameResolver, SourceTag};
use crate::util::env::env_parse;

fn conv(spec: &StepSpec, legacy_id: i64, reason: String) -> MigrateError {
    MigrateError::RowConversion {
        table: spec.source_table.to_string(),
        legacy_id,
        reason,
    }
}

async fn fetch_chunk(
    db: &Db,
    table: &str,
    last_id: i64,
    chunk: i64,
) -> Result<Vec<PgRow>, sqlx::Error> {
    sqlx::query(&format!(
        "SELECT * FROM {table} WHERE id > $1 ORDER BY id LIMIT $2"
    ))
    .persistent(false)
    .bind(last_id)
    .bind(chunk)
    .fetch_all(&db.pool)
    .await
}

/// Run the full source scan for one step. Row-level errors reject the row
/// and continue; anything else aborts the step.
pub async fn transfer(
    db: &Db,
    resolver: &GameResolver,
    spec: &StepSpec,
) -> Result<StepCounts, MigrateError> {
    if !table_exists(db, spec.source_table).await? {
        return Err(MigrateError::SourceMissing {
            table: spec.source_table.to_string(),
        });
    }

    let chunk = env_parse("OB_STEP_CHUNK", 500i64).max(1);
    let mut counts = StepCounts::default();
    let mut last_id = 0i64;

    loop {
        let rows = fetch_chunk(db, spec.source_table, last_id, chunk).await?;
        if rows.is_empty() {
            break;
        }
        debug!(
            step = spec.name,
            chunk_size = rows.len(),
            last_id,
            "chunk loaded"
        );
        for r in &rows {
            // The keyset cursor needs a readable id; a source without one
            // cannot be paged and fails the whole step.
            let legacy_id = row::req_i64(r, "id")
                .map_err(|reason| conv(spec, last_id, format!("unpageable source: {reason}")))?;
            last_id = legacy_id;
            counts.rows_read += 1;

            let outcome = match spec.kind {
                StepKind::GameBoards => board_row(db, spec, r, legacy_id).await,
                StepKind::GameEnrichment => enrichment_row(db, resolver, spec, r, legacy_id).await,
                StepKind::Odds { market, source } => {
                    odds_row(db, resolver, spec, r, legacy_id, market, source).await
                }
                StepKind::Recommendations => {
                    recommendation_row(db, resolver, spec, r, legacy_id).await
                }
                StepKind::Performance => performance_row(db, spec, r, legacy_id).await,
                StepKind::ScrapeLog => scrape_log_row(db, spec, r, legacy_id).await,
            };
            match outcome {
                Ok(true) => counts.rows_migrated += 1,
                Ok(false) => counts.rows_skipped += 1,
                Err(e) if e.is_row_level() => {
                    counts.rows_rejected += 1;
                    warn!(step = spec.name, legacy_id, error = %e, "row rejected");
                }
                Err(e) => return Err(e),
            }
        }
    }

    info!(
        step = spec.name,
        rows_read = counts.rows_read,
        rows_migrated = counts.rows_migrated,
        rows_skipped = counts.rows_skipped,
        rows_rejected = counts.rows_rejected,
        "transfer finished"
    );
    Ok(counts)
}

// scraped.game_boards -> raw.game_boards: payload copied verbatim.
async fn board_row(
    db: &Db,
    spec: &StepSpec,
    r: &PgRow,
    legacy_id: i64,
) -> Result<bool, MigrateError> {
    let source_tag = row::opt_text(r, "source").unwrap_or_else(|| "unknown".into());
    let payload = row::opt_json(r, "payload");
    let scraped_at = row::opt_ts(r, "scraped_at").map_err(|e| conv(spec, legacy_id, e))?;

    let res = sqlx::query(
        "INSERT INTO raw.game_boards (source_tag, legacy_id, payload, scraped_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (source_tag, legacy_id) DO NOTHING",
    )
    .persistent(false)
    .bind(&source_tag)
    .bind(legacy_id)
    .bind(&payload)
    .bind(scraped_at)
    .execute(&db.pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

fn normalize_status(raw: &str) -> &'static str {
    match raw.trim().to_ascii_lowercase().as_str() {
        "final" | "completed" | "complete" | "game over" => "final",
        "scheduled" | "preview" | "pre-game" | "pregame" => "scheduled",
        "live" | "in progress" | "in_progress" => "live",
        "postponed" | "suspended" => "postponed",
        _ => "unknown",
    }
}

// Games confirmed by the stats API rank above odds-only rows.
const MLB_DATA_TIER: i16 = 2;

// scraped.mlb_api_games -> core.games enrichment. Only NULL/unknown fields
// are written so operator edits survive re-runs.
async fn enrichment_row(
    db: &Db,
    resolver: &GameResolver,
    spec: &StepSpec,
    r: &PgRow,
    legacy_id: i64,
) -> Result<bool, MigrateError> {
    let home = row::req_text(r, "home_name").map_err(|e| conv(spec, legacy_id, e))?;
    let away = row::req_text(r, "away_name").map_err(|e| conv(spec, legacy_id, e))?;
    let game_time = row::opt_ts(r, "game_datetime").map_err(|e| conv(spec, legacy_id, e))?;
    let date = match row::opt_date(r, "game_date").map_err(|e| conv(spec, legacy_id, e))? {
        Some(d) => d,
        None => game_time.map(|t| t.date_naive()).ok_or_else(|| {
            conv(spec, legacy_id, "no game_date or game_datetime".to_string())
        })?,
    };
    let status = row::opt_text(r, "status").map(|s| normalize_status(&s));
    let home_score = row::opt_i32(r, "home_score").map_err(|e| conv(spec, legacy_id, e))?;
    let away_score = row::opt_i32(r, "away_score").map_err(|e| conv(spec, legacy_id, e))?;
    let game_pk = row::opt_ref_id(r, "game_pk");

    let res = resolver
        .resolve(&home, &away, date, SourceTag::MlbStatsApi, game_pk.as_deref())
        .await?;

    let updated = sqlx::query(
        "UPDATE core.games g SET
            game_time  = COALESCE(g.game_time, $2),
            status     = CASE WHEN g.status = 'unknown' AND $3::text IS NOT NULL
                              THEN $3 ELSE g.status END,
            home_score = COALESCE(g.home_score, $4),
            away_score = COALESCE(g.away_score, $5),
            data_tier  = GREATEST(g.data_tier, $6),
            updated_at = now()
         WHERE g.id = $1
           AND ( (g.game_time IS NULL AND $2::timestamptz IS NOT NULL)
              OR (g.status = 'unknown' AND $3::text IS NOT NULL AND $3 <> 'unknown')
              OR (g.home_score IS NULL AND $4::int IS NOT NULL)
              OR (g.away_score IS NULL AND $5::int IS NOT NULL)
              OR (g.data_tier < $6) )",
    )
    .persistent(false)
    .bind(res.game_id)
    .bind(game_time)
    .bind(status)
    .bind(home_score)
    .bind(away_score)
    .bind(MLB_DATA_TIER)
    .execute(&db.pool)
    .await?;

    Ok(res.created || updated.rows_affected() > 0)
}

fn normalize_market(spec: &StepSpec, legacy_id: i64, raw: &str) -> Result<&'static str, MigrateError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "moneyline" | "ml" | "h2h" => Ok("moneyline"),
        "spread" | "runline" | "run_line" => Ok("spread"),
        "total" | "totals" | "over_under" | "ou" => Ok("total"),
        other => Err(conv(spec, legacy_id, format!("unknown market {other:?}"))),
    }
}

// betting.* odds tables -> core.odds. Idempotency key
// (game_id, market, book, source_tag); newer recorded_at wins, equal
// timestamps only update when the payload actually differs (so re-runs
// touch nothing).
async fn odds_row(
    db: &Db,
    resolver: &GameResolver,
    spec: &StepSpec,
    r: &PgRow,
    legacy_id: i64,
    market: Option<&'static str>,
    source: SourceTag,
) -> Result<bool, MigrateError> {
    let home = row::req_text(r, "home_team").map_err(|e| conv(spec, legacy_id, e))?;
    let away = row::req_text(r, "away_team").map_err(|e| conv(spec, legacy_id, e))?;
    let start_time = row::opt_ts(r, "start_time").map_err(|e| conv(spec, legacy_id, e))?;
    let date = match row::opt_date(r, "game_date").map_err(|e| conv(spec, legacy_id, e))? {
        Some(d) => d,
        None => start_time
            .map(|t| t.date_naive())
            .ok_or_else(|| conv(spec, legacy_id, "no game_date or start_time".to_string()))?,
    };
    let market = match market {
        Some(m) => m,
        None => {
            let raw = row::req_text(r, "market").map_err(|e| conv(spec, legacy_id, e))?;
            normalize_market(spec, legacy_id, &raw)?
        }
    };

    // Per-market column layout of the legacy tables.
    let (line, price_home, price_away) = match source {
        SourceTag::SbrReview => match market {
            "moneyline" => (
                None,
                row::opt_i32(r, "home_odds").map_err(|e| conv(spec, legacy_id, e))?,
                row::opt_i32(r, "away_odds").map_err(|e| conv(spec, legacy_id, e))?,
            ),
            "spread" => (
                row::opt_f64(r, "spread").map_err(|e| conv(spec, legacy_id, e))?,
                row::opt_i32(r, "home_odds").map_err(|e| conv(spec, legacy_id, e))?,
                row::opt_i32(r, "away_odds").map_err(|e| conv(spec, legacy_id, e))?,
            ),
            // totals store over/under in the home/away price slots
            _ => (
                row::opt_f64(r, "total").map_err(|e| conv(spec, legacy_id, e))?,
                row::opt_i32(r, "over_odds").map_err(|e| conv(spec, legacy_id, e))?,
                row::opt_i32(r, "under_odds").map_err(|e| conv(spec, legacy_id, e))?,
            ),
        },
        _ => (
            row::opt_f64(r, "line").map_err(|e| conv(spec, legacy_id, e))?,
            row::opt_i32(r, "price_home").map_err(|e| conv(spec, legacy_id, e))?,
            row::opt_i32(r, "price_away").map_err(|e| conv(spec, legacy_id, e))?,
        ),
    };

    let book = row::opt_text(r, "book").unwrap_or_else(|| "unknown".into());
    let sharp_flag = row::opt_bool(r, "sharp_action");
    let rlm_flag = row::opt_bool(r, "reverse_line_movement");
    // Must be stable across runs; fall back to midnight of the game date.
    let recorded_at = row::opt_ts(r, "updated_at")
        .map_err(|e| conv(spec, legacy_id, e))?
        .or(start_time)
        .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());

    let ext_col = match source {
        SourceTag::SbrReview => "sbr_game_id",
        SourceTag::ActionNetwork => "an_game_id",
        SourceTag::OddsAggregator => "event_id",
        SourceTag::MlbStatsApi => "game_pk",
        SourceTag::LegacyTracker => "",
    };
    let ext_id = if ext_col.is_empty() {
        None
    } else {
        row::opt_ref_id(r, ext_col)
    };

    let res = resolver
        .resolve(&home, &away, date, source, ext_id.as_deref())
        .await?;

    let out = sqlx::query(
        "INSERT INTO core.odds
            (game_id, market, book, source_tag, line, price_home, price_away,
             sharp_flag, rlm_flag, recorded_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (game_id, market, book, source_tag) DO UPDATE SET
            line = EXCLUDED.line,
            price_home = EXCLUDED.price_home,
            price_away = EXCLUDED.price_away,
            sharp_flag = EXCLUDED.sharp_flag,
            rlm_flag = EXCLUDED.rlm_flag,
            recorded_at = EXCLUDED.recorded_at
         WHERE core.odds.recorded_at < EXCLUDED.recorded_at
            OR (core.odds.recorded_at = EXCLUDED.recorded_at
                AND (core.odds.line, core.odds.price_home, core.odds.price_away,
                     core.odds.sharp_flag, core.odds.rlm_flag)
                    IS DISTINCT FROM
                    (EXCLUDED.line, EXCLUDED.price_home, EXCLUDED.price_away,
                     EXCLUDED.sharp_flag, EXCLUDED.rlm_flag))",
    )
    .persistent(false)
    .bind(res.game_id)
    .bind(market)
    .bind(&book)
    .bind(source.as_str())
    .bind(line)
    .bind(price_home)
    .bind(price_away)
    .bind(sharp_flag)
    .bind(rlm_flag)
    .bind(recorded_at)
    .execute(&db.pool)
    .await?;

    Ok(res.created || out.rows_affected() > 0)
}

// tracking.recommendations -> analytics.recommendations.
async fn recommendation_row(
    db: &Db,
    resolver: &GameResolver,
    spec: &StepSpec,
    r: &PgRow,
    legacy_id: i64,
) -> Result<bool, MigrateError> {
    let home = row::req_text(r, "home_team").map_err(|e| conv(spec, legacy_id, e))?;
    let away = row::req_text(r, "away_team").map_err(|e| conv(spec, legacy_id, e))?;
    let date = row::req_date(r, "game_date").map_err(|e| conv(spec, legacy_id, e))?;
    let raw_market = row::req_text(r, "market").map_err(|e| conv(spec, legacy_id, e))?;
    let market = normalize_market(spec, legacy_id, &raw_market)?;
    let pick = row::req_text(r, "pick").map_err(|e| conv(spec, legacy_id, e))?;
    let units = row::opt_f64(r, "units").map_err(|e| conv(spec, legacy_id, e))?;
    let model = row::opt_text(r, "model").unwrap_or_else(|| "legacy".into());
    let recommended_at = row::opt_ts(r, "created_at").map_err(|e| conv(spec, legacy_id, e))?;

    let res = resolver
        .resolve(&home, &away, date, SourceTag::LegacyTracker, None)
        .await?;

    let out = sqlx::query(
        "INSERT INTO analytics.recommendations
            (game_id, market, pick, units, model, recommended_at, source_tag, legacy_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (source_tag, legacy_id) DO NOTHING",
    )
    .persistent(false)
    .bind(res.game_id)
    .bind(market)
    .bind(&pick)
    .bind(units)
    .bind(&model)
    .bind(recommended_at)
    .bind("tracker")
    .bind(legacy_id)
    .execute(&db.pool)
    .await?;
    Ok(out.rows_affected() > 0)
}

// tracking.model_performance -> analytics.model_performance.
async fn performance_row(
    db: &Db,
    spec: &StepSpec,
    r: &PgRow,
    legacy_id: i64,
) -> Result<bool, MigrateError> {
    let metric_date = row::req_date(r, "metric_date").map_err(|e| conv(spec, legacy_id, e))?;
    let model = row::opt_text(r, "model").unwrap_or_else(|| "legacy".into());
    let wins = row::opt_i32(r, "wins")
        .map_err(|e| conv(spec, legacy_id, e))?
        .unwrap_or(0);
    let losses = row::opt_i32(r, "losses")
        .map_err(|e| conv(spec, legacy_id, e))?
        .unwrap_or(0);
    let pushes = row::opt_i32(r, "pushes")
        .map_err(|e| conv(spec, legacy_id, e))?
        .unwrap_or(0);
    let units = row::opt_f64(r, "units_won").map_err(|e| conv(spec, legacy_id, e))?;
    let roi = row::opt_f64(r, "roi").map_err(|e| conv(spec, legacy_id, e))?;

    let out = sqlx::query(
        "INSERT INTO analytics.model_performance
            (metric_date, model, wins, losses, pushes, units, roi)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (metric_date, model) DO UPDATE SET
            wins = EXCLUDED.wins,
            losses = EXCLUDED.losses,
            pushes = EXCLUDED.pushes,
            units = EXCLUDED.units,
            roi = EXCLUDED.roi
         WHERE (analytics.model_performance.wins, analytics.model_performance.losses,
                analytics.model_performance.pushes, analytics.model_performance.units,
                analytics.model_performance.roi)
               IS DISTINCT FROM
               (EXCLUDED.wins, EXCLUDED.losses, EXCLUDED.pushes, EXCLUDED.units, EXCLUDED.roi)",
    )
    .persistent(false)
    .bind(metric_date)
    .bind(&model)
    .bind(wins)
    .bind(losses)
    .bind(pushes)
    .bind(units)
    .bind(roi)
    .execute(&db.pool)
    .await?;
    Ok(out.rows_affected() > 0)
}

// tracking.scrape_log -> ops.scrape_log.
async fn scrape_log_row(
    db: &Db,
    spec: &StepSpec,
    r: &PgRow,
    legacy_id: i64,
) -> Result<bool, MigrateError> {
    let logged_at = row::opt_ts(r, "logged_at").map_err(|e| conv(spec, legacy_id, e))?;
    let source_tag = row::opt_text(r, "source").unwrap_or_else(|| "unknown".into());
    let level = row::opt_text(r, "level").unwrap_or_else(|| "info".into());
    let message = row::req_text(r, "message").map_err(|e| conv(spec, legacy_id, e))?;

    let out = sqlx::query(
        "INSERT INTO ops.scrape_log (logged_at, source_tag, level, message, legacy_id)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (source_tag, legacy_id) DO NOTHING",
    )
    .persistent(false)
    .bind(logged_at)
    .bind(&source_tag)
    .bind(&level)
    .bind(&message)
    .bind(legacy_id)
    .execute(&db.pool)
    .await?;
    Ok(out.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::Tier;

    fn spec() -> StepSpec {
        StepSpec {
            name: "core_odds_action",
            tier: Tier::Core,
            source_table: "betting.action_network_odds",
            target_table: "core.odds",
            depends_on: &[],
            kind: StepKind::Odds {
                market: None,
                source: SourceTag::ActionNetwork,
            },
        }
    }

    #[test]
    fn market_synonyms_normalize() {
        let s = spec();
        assert_eq!(normalize_market(&s, 1, "ML").unwrap(), "moneyline");
        assert_eq!(normalize_market(&s, 1, "h2h").unwrap(), "moneyline");
        assert_eq!(normalize_market(&s, 1, "Runline").unwrap(), "spread");
        assert_eq!(normalize_market(&s, 1, "totals").unwrap(), "total");
    }

    #[test]
    fn unknown_market_is_row_level_rejection() {
        let s = spec();
        let err = normalize_market(&s, 7, "parlay").unwrap_err();
        assert!(err.is_row_level());
        assert!(err.to_string().contains("parlay"));
    }

    #[test]
    fn status_normalization() {
        assert_eq!(normalize_status("Final"), "final");
        assert_eq!(normalize_status("Pre-Game"), "scheduled");
        assert_eq!(normalize_status("In Progress"), "live");
        assert_eq!(normalize_status("rain delay??"), "unknown");
    }
}
