//! Consolidation engine for legacy sports-betting data.
//!
//! Moves rows from the ad-hoc `scraped` / `betting` / `tracking` schemas
//! into four canonical schemas (`raw`, `core`, `analytics`, `ops`) while
//! the legacy tables keep receiving writes. Three operator entry points:
//!
//! * [`migrate::run_all`]: idempotent, tier-ordered step execution with an
//!   append-only migration log;
//! * [`validate::run_validation`]: quantitative checks persisted to
//!   `ops.validation_results`;
//! * [`cleanup::run_cleanup`]: validation-gated, irreversible removal of
//!   the legacy schemas.
//!
//! The `ob` binary wires these up for the command line; scheduling and
//! ingestion live outside this crate.

pub mod cleanup;
pub mod cli;
pub mod db;
pub mod error;
pub mod migrate;
pub mod model;
pub mod normalize;
pub mod oplog;
pub mod resolver;
pub mod steps;
pub mod tracing;
pub mod validate;

pub mod util {
    pub mod env;
}
