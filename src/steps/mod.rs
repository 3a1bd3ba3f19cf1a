//! Declarative migration steps and their runner.
//!
//! A step is one source->target transfer: name, dependency tier, tables,
//! and the column-mapping kind. The runner makes each execution an
//! idempotent, logged unit of work.

pub mod mappers;
pub mod row;
pub mod runner;

use crate::resolver::SourceTag;

/// Dependency tiers, executed strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Raw,
    Core,
    Analytics,
    Operational,
}

impl Tier {
    pub const ORDER: [Tier; 4] = [Tier::Raw, Tier::Core, Tier::Analytics, Tier::Operational];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Core => "core",
            Tier::Analytics => "analytics",
            Tier::Operational => "operational",
        }
    }
}

/// Column-mapping family of a step. Each kind knows how to coerce its
/// legacy rows and which idempotency key the target upsert uses.
#[derive(Debug, Clone, Copy)]
pub enum StepKind {
    /// Raw scrape payloads copied verbatim.
    GameBoards,
    /// MLB stats rows enriching canonical games (scores, status, first pitch).
    GameEnrichment,
    /// Betting odds rows keyed off a canonical game. `market` is fixed for
    /// per-market legacy tables and read from the row when None.
    Odds {
        market: Option<&'static str>,
        source: SourceTag,
    },
    /// Model pick recommendations.
    Recommendations,
    /// Daily model performance metrics.
    Performance,
    /// Scraper log lines.
    ScrapeLog,
}

/// Declarative description of one source->target transfer.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: &'static str,
    pub tier: Tier,
    pub source_table: &'static str,
    pub target_table: &'static str,
    /// Steps whose failure forces this one to be skipped.
    pub depends_on: &'static [&'static str],
    pub kind: StepKind,
}

/// The fixed step set, in dependency order. Sources live in the legacy
/// `scraped` / `betting` / `tracking` schemas; targets in the four
/// canonical schemas.
pub fn registry() -> Vec<StepSpec> {
    vec![
        StepSpec {
            name: "raw_game_boards",
            tier: Tier::Raw,
            source_table: "scraped.game_boards",
            target_table: "raw.game_boards",
            depends_on: &[],
            kind: StepKind::GameBoards,
        },
        StepSpec {
            name: "core_games_mlb_api",
            tier: Tier::Core,
            source_table: "scraped.mlb_api_games",
            target_table: "core.games",
            depends_on: &[],
            kind: StepKind::GameEnrichment,
        },
        StepSpec {
            name: "core_odds_sbr_moneyline",
            tier: Tier::Core,
            source_table: "betting.sbr_moneyline",
            target_table: "core.odds",
            depends_on: &[],
            kind: StepKind::Odds {
                market: Some("moneyline"),
                source: SourceTag::SbrReview,
            },
        },
        StepSpec {
            name: "core_odds_sbr_spread",
            tier: Tier::Core,
            source_table: "betting.sbr_spreads",
            target_table: "core.odds",
            depends_on: &[],
            kind: StepKind::Odds {
                market: Some("spread"),
                source: SourceTag::SbrReview,
            },
        },
        StepSpec {
            name: "core_odds_sbr_total",
            tier: Tier::Core,
            source_table: "betting.sbr_totals",
            target_table: "core.odds",
            depends_on: &[],
            kind: StepKind::Odds {
                market: Some("total"),
                source: SourceTag::SbrReview,
            },
        },
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
        },
        StepSpec {
            name: "core_odds_api",
            tier: Tier::Core,
            source_table: "betting.odds_api_lines",
            target_table: "core.odds",
            depends_on: &[],
            kind: StepKind::Odds {
                market: None,
                source: SourceTag::OddsAggregator,
            },
        },
        StepSpec {
            name: "analytics_recommendations",
            tier: Tier::Analytics,
            source_table: "tracking.recommendations",
            target_table: "analytics.recommendations",
            // Picks attach to canonical games; without the core game pass the
            // canonical base would be degenerate.
            depends_on: &["core_games_mlb_api"],
            kind: StepKind::Recommendations,
        },
        StepSpec {
            name: "analytics_performance",
            tier: Tier::Analytics,
            source_table: "tracking.model_performance",
            target_table: "analytics.model_performance",
            depends_on: &[],
            kind: StepKind::Performance,
        },
        StepSpec {
            name: "ops_scrape_log",
            tier: Tier::Operational,
            source_table: "tracking.scrape_log",
            target_table: "ops.scrape_log",
            depends_on: &[],
            kind: StepKind::ScrapeLog,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn registry_names_are_unique() {
        let specs = registry();
        let mut seen = std::collections::HashSet::new();
        for s in &specs {
            assert!(seen.insert(s.name), "duplicate step name {}", s.name);
        }
    }

    #[test]
    fn registry_is_tier_ordered() {
        let specs = registry();
        let mut last = Tier::Raw;
        for s in &specs {
            assert!(s.tier >= last, "step {} out of tier order", s.name);
            last = s.tier;
        }
    }

    #[test]
    fn dependencies_point_at_earlier_steps() {
        let specs = registry();
        let pos: HashMap<&str, usize> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name, i))
            .collect();
        for (i, s) in specs.iter().enumerate() {
            for dep in s.depends_on {
                let dep_pos = pos
                    .get(dep)
                    .unwrap_or_else(|| panic!("step {} depends on unknown {dep}", s.name));
                assert!(*dep_pos < i, "step {} depends on later step {dep}", s.name);
            }
        }
    }
}
