//! Entity resolution: one canonical `core.games` row per real-world game.
//!
//! Sources disagree on team spelling, timestamps and surrogate ids. The
//! resolver normalizes both team names, looks the game up by
//! (home, away, date) including the reversed pair (a documented source
//! inconsistency), and creates a minimal row when nothing matches.
//! Same-key resolution is serialized (per-key mutex + unique-constraint
//! retry) so concurrent steps cannot create duplicate games.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::db::Db;
use crate::error::MigrateError;
use crate::normalize::team_code;

/// Which legacy system a record came from. Determines the external
/// reference column attached on `core.games`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    SbrReview,
    MlbStatsApi,
    OddsAggregator,
    ActionNetwork,
    /// Internal tracking/backtesting tables; no external id namespace.
    LegacyTracker,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::SbrReview => "sbr",
            SourceTag::MlbStatsApi => "mlb_api",
            SourceTag::OddsAggregator => "odds_api",
            SourceTag::ActionNetwork => "action_network",
            SourceTag::LegacyTracker => "tracker",
        }
    }

    /// Column on core.games holding this source's local game id, if the
    /// source has an external id namespace at all.
    pub fn ref_column(&self) -> Option<&'static str> {
        match self {
            SourceTag::SbrReview => Some("sbr_game_id"),
            SourceTag::MlbStatsApi => Some("mlb_stats_id"),
            SourceTag::OddsAggregator => Some("odds_api_id"),
            SourceTag::ActionNetwork => Some("action_network_id"),
            SourceTag::LegacyTracker => None,
        }
    }
}

/// Outcome of a resolution.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub game_id: i64,
    /// A new canonical game was created for this key.
    pub created: bool,
    /// The match came through the reversed home/away pair; the game row is
    /// flagged for downstream review rather than silently accepted.
    pub flipped: bool,
}

type GameKey = (String, String, NaiveDate);

pub struct GameResolver {
    db: Db,
    // Per-key serialization. Distinct keys proceed in parallel; the unique
    // constraint on core.games is the cross-process backstop.
    key_locks: Mutex<HashMap<GameKey, Arc<Mutex<()>>>>,
}

impl GameResolver {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: GameKey) -> Arc<Mutex<()>> {
        let mut map = self.key_locks.lock().await;
        map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Resolve a source record to a canonical game, creating one if absent,
    /// and attach the source's local id to the game's external references.
    #[instrument(skip(self), fields(source = source.as_str()))]
    pub async fn resolve(
        &self,
        home_raw: &str,
        away_raw: &str,
        date: NaiveDate,
        source: SourceTag,
        source_local_id: Option<&str>,
    ) -> Result<Resolution, MigrateError> {
        let home = team_code(home_raw).ok_or_else(|| MigrateError::UnresolvedTeam {
            raw: home_raw.to_string(),
        })?;
        let away = team_code(away_raw).ok_or_else(|| MigrateError::UnresolvedTeam {
            raw: away_raw.to_string(),
        })?;

        // Lock the unordered pair so reversed-orientation lookups for the
        // same real-world game serialize too.
        let (a, b) = if home <= away { (home, away) } else { (away, home) };
        let lock = self.key_lock((a.to_string(), b.to_string(), date)).await;
        let _guard = lock.lock_owned().await;

        // Exact orientation first.
        if let Some(r) = sqlx::query(
            "SELECT id FROM core.games WHERE home_team = $1 AND away_team = $2 AND game_date = $3",
        )
        .persistent(false)
        .bind(home)
        .bind(away)
        .bind(date)
        .fetch_optional(&self.db.pool)
        .await?
        {
            let game_id: i64 = r.get("id");
            if let Some(local_id) = source_local_id {
                self.attach_external_ref(game_id, source, local_id).await?;
            }
            return Ok(Resolution {
                game_id,
                created: false,
                flipped: false,
            });
        }

        // Reversed pair: some sources flip home/away (splits feeds). Treat a
        // hit as the same game but flag it for review instead of trusting
        // either orientation.
        if let Some(r) = sqlx::query(
            "SELECT id FROM core.games WHERE home_team = $1 AND away_team = $2 AND game_date = $3",
        )
        .persistent(false)
        .bind(away)
        .bind(home)
        .bind(date)
        .fetch_optional(&self.db.pool)
        .await?
        {
            let game_id: i64 = r.get("id");
            warn!(
                game_id,
                home,
                away,
                %date,
                "matched via reversed home/away pair; flagging game for review"
            );
            sqlx::query(
                "UPDATE core.games SET review_flag = TRUE, updated_at = now()
                 WHERE id = $1 AND NOT review_flag",
            )
            .persistent(false)
            .bind(game_id)
            .execute(&self.db.pool)
            .await?;
            if let Some(local_id) = source_local_id {
                self.attach_external_ref(game_id, source, local_id).await?;
            }
            return Ok(Resolution {
                game_id,
                created: false,
                flipped: true,
            });
        }

        // No match: create a minimal game. ON CONFLICT DO NOTHING + re-select
        // handles a racing writer from another process.
        let inserted = sqlx::query(
            "INSERT INTO core.games (home_team, away_team, game_date, status)
             VALUES ($1, $2, $3, 'unknown')
             ON CONFLICT (home_team, away_team, game_date) DO NOTHING
             RETURNING id",
        )
        .persistent(false)
        .bind(home)
        .bind(away)
        .bind(date)
        .fetch_optional(&self.db.pool)
        .await?;

        let (game_id, created) = match inserted {
            Some(r) => (r.get::<i64, _>("id"), true),
            None => {
                let id: i64 = sqlx::query_scalar(
                    "SELECT id FROM core.games WHERE home_team = $1 AND away_team = $2 AND game_date = $3",
                )
                .persistent(false)
                .bind(home)
                .bind(away)
                .bind(date)
                .fetch_one(&self.db.pool)
                .await?;
                (id, false)
            }
        };
        debug!(game_id, home, away, %date, created, "game resolved");

        if let Some(local_id) = source_local_id {
            self.attach_external_ref(game_id, source, local_id).await?;
        }
        Ok(Resolution {
            game_id,
            created,
            flipped: false,
        })
    }

    // Attach source -> local id, writing only into a NULL column. A
    // previously recorded id from another run is never overwritten; a
    // conflicting value is logged and left intact.
    async fn attach_external_ref(
        &self,
        game_id: i64,
        source: SourceTag,
        local_id: &str,
    ) -> Result<(), MigrateError> {
        let Some(col) = source.ref_column() else {
            return Ok(());
        };
        let res = sqlx::query(&format!(
            "UPDATE core.games SET {col} = $2, updated_at = now() WHERE id = $1 AND {col} IS NULL"
        ))
        .persistent(false)
        .bind(game_id)
        .bind(local_id)
        .execute(&self.db.pool)
        .await?;

        if res.rows_affected() == 0 {
            let existing: Option<String> =
                sqlx::query_scalar(&format!("SELECT {col} FROM core.games WHERE id = $1"))
                    .persistent(false)
                    .bind(game_id)
                    .fetch_one(&self.db.pool)
                    .await?;
            if let Some(cur) = existing {
                if cur != local_id {
                    warn!(
                        game_id,
                        source = source.as_str(),
                        existing = %cur,
                        incoming = %local_id,
                        "conflicting external reference id; keeping first-seen value"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tags_map_to_distinct_ref_columns() {
        let tags = [
            SourceTag::SbrReview,
            SourceTag::MlbStatsApi,
            SourceTag::OddsAggregator,
            SourceTag::ActionNetwork,
        ];
        let mut cols: Vec<&str> = tags.iter().filter_map(|t| t.ref_column()).collect();
        cols.sort();
        cols.dedup();
        assert_eq!(cols.len(), tags.len());
        assert_eq!(SourceTag::LegacyTracker.ref_column(), None);
    }
}
