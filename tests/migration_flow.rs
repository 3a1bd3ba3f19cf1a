//! End-to-end flow against a live Postgres. Skipped unless
//! OB_TEST_DATABASE_URL points at a throwaway database (the test drops and
//! recreates every schema it touches).

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use oddsbase::cleanup::{run_cleanup, CleanupStatus, CleanupTargets};
use oddsbase::db::{table_exists, Db};
use oddsbase::error::MigrateError;
use oddsbase::migrate::{run_all, RunOptions};
use oddsbase::model::StepStatus;
use oddsbase::resolver::{GameResolver, SourceTag};
use oddsbase::steps::{registry, runner, StepKind, StepSpec, Tier};
use oddsbase::validate::{default_checks, run_validation, DEFAULT_MIN_PASSED};

async fn test_db() -> Option<Db> {
    let url = std::env::var("OB_TEST_DATABASE_URL").ok()?;
    Some(
        Db::connect_no_migrate(&url, 5)
            .await
            .expect("connect to OB_TEST_DATABASE_URL"),
    )
}

async fn reset(db: &Db) {
    sqlx::raw_sql(
        "DROP SCHEMA IF EXISTS raw CASCADE;
         DROP SCHEMA IF EXISTS core CASCADE;
         DROP SCHEMA IF EXISTS analytics CASCADE;
         DROP SCHEMA IF EXISTS ops CASCADE;
         DROP SCHEMA IF EXISTS scraped CASCADE;
         DROP SCHEMA IF EXISTS betting CASCADE;
         DROP SCHEMA IF EXISTS tracking CASCADE;
         DROP TABLE IF EXISTS public._sqlx_migrations;",
    )
    .execute(&db.pool)
    .await
    .expect("reset schemas");
}

async fn seed_legacy(db: &Db) {
    sqlx::raw_sql(
        r#"
        CREATE SCHEMA scraped;
        CREATE SCHEMA betting;
        CREATE SCHEMA tracking;

        CREATE TABLE scraped.game_boards (
            id BIGSERIAL PRIMARY KEY, source TEXT, payload JSONB, scraped_at TIMESTAMPTZ);
        CREATE TABLE scraped.mlb_api_games (
            id BIGSERIAL PRIMARY KEY, game_pk BIGINT, home_name TEXT, away_name TEXT,
            game_date DATE, game_datetime TIMESTAMPTZ, status TEXT,
            home_score INT, away_score INT);

        -- deliberately sloppy types: dates and odds as TEXT
        CREATE TABLE betting.sbr_moneyline (
            id BIGSERIAL PRIMARY KEY, home_team TEXT, away_team TEXT, game_date TEXT,
            book TEXT, home_odds TEXT, away_odds TEXT, sbr_game_id TEXT,
            sharp_action BOOLEAN, reverse_line_movement BOOLEAN, updated_at TIMESTAMPTZ);
        CREATE TABLE betting.sbr_spreads (
            id BIGSERIAL PRIMARY KEY, home_team TEXT, away_team TEXT, game_date DATE,
            book TEXT, spread DOUBLE PRECISION, home_odds INT, away_odds INT,
            sbr_game_id TEXT, updated_at TIMESTAMPTZ);
        CREATE TABLE betting.sbr_totals (
            id BIGSERIAL PRIMARY KEY, home_team TEXT, away_team TEXT, game_date DATE,
            book TEXT, total TEXT, over_odds INT, under_odds INT, sbr_game_id TEXT);
        CREATE TABLE betting.action_network_odds (
            id BIGSERIAL PRIMARY KEY, home_team TEXT, away_team TEXT, game_date DATE,
            start_time TIMESTAMPTZ, market TEXT, book TEXT, line DOUBLE PRECISION,
            price_home INT, price_away INT, an_game_id TEXT,
            sharp_action BOOLEAN, reverse_line_movement BOOLEAN);
        CREATE TABLE betting.odds_api_lines (
            id BIGSERIAL PRIMARY KEY, home_team TEXT, away_team TEXT, game_date TEXT,
            market TEXT, book TEXT, line TEXT, price_home TEXT, price_away TEXT,
            event_id TEXT, updated_at TIMESTAMPTZ);

        CREATE TABLE tracking.recommendations (
            id BIGSERIAL PRIMARY KEY, home_team TEXT, away_team TEXT, game_date DATE,
            market TEXT, pick TEXT, units DOUBLE PRECISION, model TEXT, created_at TIMESTAMPTZ);
        CREATE TABLE tracking.model_performance (
            id BIGSERIAL PRIMARY KEY, metric_date DATE, model TEXT,
            wins INT, losses INT, pushes INT, units_won DOUBLE PRECISION, roi DOUBLE PRECISION);
        CREATE TABLE tracking.scrape_log (
            id BIGSERIAL PRIMARY KEY, logged_at TIMESTAMPTZ, source TEXT, level TEXT, message TEXT);

        INSERT INTO scraped.game_boards (source, payload, scraped_at)
        VALUES ('sbr', '{"board": "mlb", "games": 1}'::jsonb, '2024-04-01T10:00:00Z');

        INSERT INTO scraped.mlb_api_games
            (game_pk, home_name, away_name, game_date, game_datetime, status, home_score, away_score)
        VALUES (745001, 'Chicago Cubs', 'Milwaukee Brewers', '2024-04-01',
                '2024-04-01T23:05:00Z', 'Final', 5, 3);

        -- same real game under three different team spellings
        INSERT INTO betting.sbr_moneyline
            (home_team, away_team, game_date, book, home_odds, away_odds, sbr_game_id,
             sharp_action, reverse_line_movement, updated_at)
        VALUES ('Cubs', 'Brewers', '2024-04-01', 'circa', '-120', '+102', 'sbr-100',
                TRUE, FALSE, '2024-04-01T12:00:00Z'),
               -- unresolvable team: must be rejected, not migrated
               ('Springfield Isotopes', 'Brewers', '2024-04-01', 'circa', '-110', '+100',
                'sbr-999', NULL, NULL, '2024-04-01T12:00:00Z');

        -- reversed home/away (splits feed): must match the same game
        INSERT INTO betting.sbr_spreads
            (home_team, away_team, game_date, book, spread, home_odds, away_odds,
             sbr_game_id, updated_at)
        VALUES ('Brewers', 'Cubs', '2024-04-01', 'dk', 1.5, -110, -110, 'sbr-100',
                '2024-04-01T12:00:00Z');

        -- malformed total: row-level rejection, step still completes
        INSERT INTO betting.sbr_totals
            (home_team, away_team, game_date, book, total, over_odds, under_odds, sbr_game_id)
        VALUES ('Cubs', 'Brewers', '2024-04-01', 'dk', 'eight', -110, -110, 'sbr-100');

        INSERT INTO betting.action_network_odds
            (home_team, away_team, game_date, start_time, market, book, line,
             price_home, price_away, an_game_id, sharp_action, reverse_line_movement)
        VALUES ('CHC', 'MIL', '2024-04-01', '2024-04-01T23:05:00Z', 'ml', 'fanduel',
                NULL, -118, 104, 'an-7', TRUE, TRUE);

        INSERT INTO betting.odds_api_lines
            (home_team, away_team, game_date, market, book, line, price_home, price_away,
             event_id, updated_at)
        VALUES ('Chicago Cubs', 'Milwaukee Brewers', '04/01/2024', 'h2h', 'pinnacle',
                NULL, '-119', '103', 'ev-55', '2024-04-01T12:30:00Z');

        INSERT INTO tracking.recommendations
            (home_team, away_team, game_date, market, pick, units, model, created_at)
        VALUES ('Cubs', 'Brewers', '2024-04-01', 'spread', 'CHC -1.5', 1.5, 'sharp_fade',
                '2024-04-01T12:00:00Z');

        INSERT INTO tracking.model_performance
            (metric_date, model, wins, losses, pushes, units_won, roi)
        VALUES ('2024-04-01', 'sharp_fade', 10, 8, 1, 4.2, 0.08);

        INSERT INTO tracking.scrape_log (logged_at, source, level, message)
        VALUES ('2024-04-01T10:00:01Z', 'sbr', 'info', 'board scraped ok');
        "#,
    )
    .execute(&db.pool)
    .await
    .expect("seed legacy schemas");
}

async fn count(db: &Db, sql: &str) -> i64 {
    sqlx::query_scalar(sql)
        .persistent(false)
        .fetch_one(&db.pool)
        .await
        .expect("count query")
}

#[tokio::test]
async fn full_migration_lifecycle() {
    let Some(db) = test_db().await else {
        eprintln!("OB_TEST_DATABASE_URL not set; skipping integration test");
        return;
    };

    reset(&db).await;
    db.apply_migrations().await.expect("apply canonical DDL");
    seed_legacy(&db).await;

    let resolver = Arc::new(GameResolver::new(db.clone()));
    let specs = registry();
    let no_resume = RunOptions { resume: false };

    // First full run: everything lands, bad rows rejected, nothing fails.
    let first = run_all(&db, Arc::clone(&resolver), &specs, &no_resume)
        .await
        .expect("first run");
    assert!(first.failed_steps().is_empty(), "no step may fail: {:?}", first.failed_steps());
    assert_eq!(first.totals.rows_rejected, 2, "isotopes row + malformed total");

    // Exactly one canonical game for the Cubs matchup despite three
    // spellings and one reversed-pair source.
    let cubs_games = count(
        &db,
        "SELECT COUNT(*) FROM core.games
         WHERE home_team IN ('CHC','MIL') AND away_team IN ('CHC','MIL')
           AND game_date = '2024-04-01'",
    )
    .await;
    assert_eq!(cubs_games, 1);

    let (sbr, an, oa, mlb, review, status): (
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        bool,
        String,
    ) = sqlx::query_as(
        "SELECT sbr_game_id, action_network_id, odds_api_id, mlb_stats_id, review_flag, status
         FROM core.games WHERE game_date = '2024-04-01' LIMIT 1",
    )
    .persistent(false)
    .fetch_one(&db.pool)
    .await
    .expect("canonical game row");
    assert_eq!(sbr.as_deref(), Some("sbr-100"));
    assert_eq!(an.as_deref(), Some("an-7"));
    assert_eq!(oa.as_deref(), Some("ev-55"));
    assert_eq!(mlb.as_deref(), Some("745001"));
    assert!(review, "reversed-pair match must flag the game for review");
    assert_eq!(status, "final");

    // moneyline from sbr + action + odds_api, spread from sbr; the
    // malformed total never landed.
    assert_eq!(count(&db, "SELECT COUNT(*) FROM core.odds").await, 4);
    assert_eq!(
        count(&db, "SELECT COUNT(*) FROM core.odds WHERE market = 'total'").await,
        0
    );

    // Idempotence: replaying every step changes zero rows.
    let second = run_all(&db, Arc::clone(&resolver), &specs, &no_resume)
        .await
        .expect("second run");
    assert!(second.failed_steps().is_empty());
    assert_eq!(second.totals.rows_migrated, 0, "re-run must be a no-op");
    assert_eq!(count(&db, "SELECT COUNT(*) FROM core.games WHERE game_date = '2024-04-01'").await, 1);
    assert_eq!(count(&db, "SELECT COUNT(*) FROM core.odds").await, 4);

    // Missing source table: skipped, never failed, never thrown.
    let ghost = StepSpec {
        name: "core_odds_ghost",
        tier: Tier::Core,
        source_table: "betting.does_not_exist",
        target_table: "core.odds",
        depends_on: &[],
        kind: StepKind::Odds {
            market: Some("moneyline"),
            source: SourceTag::SbrReview,
        },
    };
    let entry = runner::run_step(&db, &resolver, &ghost, Uuid::new_v4())
        .await
        .expect("skip, not error");
    assert_eq!(entry.status, StepStatus::Skipped);
    assert_eq!(entry.notes.as_deref(), Some("source table does not exist"));

    // A failed step forces its dependents to skip, citing the dependency.
    let bad = StepSpec {
        name: "core_odds_bad_target",
        tier: Tier::Core,
        source_table: "betting.sbr_moneyline",
        target_table: "core.no_such_table",
        depends_on: &[],
        kind: StepKind::Odds {
            market: Some("moneyline"),
            source: SourceTag::SbrReview,
        },
    };
    let dependent = StepSpec {
        name: "analytics_needs_bad",
        tier: Tier::Analytics,
        source_table: "tracking.recommendations",
        target_table: "analytics.recommendations",
        depends_on: &["core_odds_bad_target"],
        kind: StepKind::Recommendations,
    };
    let partial = run_all(
        &db,
        Arc::clone(&resolver),
        &[bad, dependent],
        &RunOptions { resume: false },
    )
    .await
    .expect("failure-tolerant run");
    assert_eq!(partial.failed_steps(), vec!["core_odds_bad_target"]);
    assert_eq!(partial.skipped_steps(), vec!["analytics_needs_bad"]);
    let dep_note = partial
        .steps
        .iter()
        .find(|e| e.step == "analytics_needs_bad")
        .and_then(|e| e.notes.clone())
        .unwrap_or_default();
    assert!(dep_note.contains("core_odds_bad_target"));

    // Validation surfaces the two rejected rows as count-parity failures...
    let report = run_validation(&db, &default_checks()).await.expect("validate");
    assert!(report.failed_count() >= 1, "rejected rows must fail parity");
    assert!(!report.migration_ready(DEFAULT_MIN_PASSED));

    // ...and the cleanup gate refuses while anything failed.
    let refused = run_cleanup(&db, &CleanupTargets::default_legacy(), DEFAULT_MIN_PASSED).await;
    assert!(matches!(
        refused,
        Err(MigrateError::ValidationNotSatisfied { .. })
    ));
    assert!(table_exists(&db, "betting.sbr_moneyline").await.unwrap());
    assert!(table_exists(&db, "tracking.recommendations").await.unwrap());

    // Operator resolves the data-quality problems at the source.
    sqlx::raw_sql(
        "DELETE FROM betting.sbr_moneyline WHERE home_team = 'Springfield Isotopes';
         DELETE FROM betting.sbr_totals WHERE total = 'eight';",
    )
    .execute(&db.pool)
    .await
    .expect("fix bad legacy rows");

    let report = run_validation(&db, &default_checks()).await.expect("re-validate");
    assert_eq!(report.failed_count(), 0, "{:?}", report.outcomes);
    assert!(report.migration_ready(DEFAULT_MIN_PASSED));
    let games_check = report
        .outcomes
        .iter()
        .find(|o| o.name == "games_present")
        .expect("games_present check in report");
    assert!(games_check.passed);
    assert_eq!(games_check.actual, "exists, 1 rows");

    // Gate satisfied: legacy schemas go away; canonical data stays.
    let cleaned = run_cleanup(&db, &CleanupTargets::default_legacy(), DEFAULT_MIN_PASSED)
        .await
        .expect("cleanup");
    assert_eq!(cleaned.status, CleanupStatus::Success);
    assert!(!table_exists(&db, "betting.sbr_moneyline").await.unwrap());
    assert!(!table_exists(&db, "scraped.game_boards").await.unwrap());
    assert!(!table_exists(&db, "tracking.scrape_log").await.unwrap());
    assert_eq!(count(&db, "SELECT COUNT(*) FROM core.games WHERE game_date = '2024-04-01'").await, 1);
    assert_eq!(count(&db, "SELECT COUNT(*) FROM core.odds").await, 4);

    // A later invocation resumes from the log: all steps skip, no rows move.
    let third = run_all(&db, Arc::clone(&resolver), &specs, &RunOptions { resume: true })
        .await
        .expect("post-cleanup run");
    assert!(third.failed_steps().is_empty());
    assert_eq!(third.totals.rows_migrated, 0);
    assert_eq!(third.skipped_steps().len(), specs.len());

    // Resolution determinism: different spellings of the same matchup hit
    // the same canonical id.
    let date = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
    let a = resolver
        .resolve("Yankees", "Red Sox", date, SourceTag::SbrReview, Some("sbr-200"))
        .await
        .expect("resolve full names");
    assert!(a.created);
    let b = resolver
        .resolve("NYY", "BOS", date, SourceTag::ActionNetwork, Some("an-9"))
        .await
        .expect("resolve codes");
    assert!(!b.created);
    assert_eq!(a.game_id, b.game_id);
    let c = resolver
        .resolve("BOS", "NYY", date, SourceTag::OddsAggregator, Some("ev-9"))
        .await
        .expect("resolve reversed");
    assert!(!c.created);
    assert!(c.flipped);
    assert_eq!(a.game_id, c.game_id);
}
