//! Team-name normalization: raw source spellings to canonical codes.
//!
//! Every legacy source spells teams differently ("Chicago Cubs", "Cubs",
//! "CHC"), and a few use abbreviations that never matched the canonical set
//! ("CWS", "KC", "SD"). Lookup is case-insensitive and whitespace-tolerant.
//! Unrecognized input returns `None` so callers can reject the record for
//! manual review instead of guessing.

/// Canonical 3-letter codes for all 30 franchises, sorted.
pub const CANONICAL_TEAMS: [&str; 30] = [
    "ARI", "ATL", "BAL", "BOS", "CHC", "CHW", "CIN", "CLE", "COL", "DET", "HOU", "KCR", "LAA",
    "LAD", "MIA", "MIL", "MIN", "NYM", "NYY", "OAK", "PHI", "PIT", "SDP", "SEA", "SFG", "STL",
    "TBR", "TEX", "TOR", "WSH",
];

/// Map a raw team string to its canonical code.
///
/// Accepts full names, nicknames, canonical codes and the alternate
/// abbreviations seen in the legacy tables (e.g. "CWS", "KC", "TB", "WAS").
/// Pure and deterministic; no I/O.
pub fn team_code(raw: &str) -> Option<&'static str> {
    let folded = raw.trim().to_ascii_lowercase();
    let key = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    let code = match key.as_str() {
        "arizona diamondbacks" | "diamondbacks" | "d-backs" | "dbacks" | "ari" | "az" => "ARI",
        "atlanta braves" | "braves" | "atl" => "ATL",
        "baltimore orioles" | "orioles" | "o's" | "bal" => "BAL",
        "boston red sox" | "red sox" | "bos" => "BOS",
        "chicago cubs" | "cubs" | "chc" => "CHC",
        "chicago white sox" | "white sox" | "chw" | "cws" => "CHW",
        "cincinnati reds" | "reds" | "cin" => "CIN",
        "cleveland guardians" | "guardians" | "cleveland indians" | "cle" => "CLE",
        "colorado rockies" | "rockies" | "col" => "COL",
        "detroit tigers" | "tigers" | "det" => "DET",
        "houston astros" | "astros" | "hou" => "HOU",
        "kansas city royals" | "royals" | "kcr" | "kc" => "KCR",
        "los angeles angels" | "angels" | "anaheim angels" | "laa" | "ana" => "LAA",
        "los angeles dodgers" | "dodgers" | "lad" | "la" => "LAD",
        "miami marlins" | "marlins" | "florida marlins" | "mia" | "fla" => "MIA",
        "milwaukee brewers" | "brewers" | "mil" => "MIL",
        "minnesota twins" | "twins" | "min" => "MIN",
        "new york mets" | "mets" | "nym" => "NYM",
        "new york yankees" | "yankees" | "nyy" => "NYY",
        "oakland athletics" | "athletics" | "a's" | "oak" => "OAK",
        "philadelphia phillies" | "phillies" | "phi" => "PHI",
        "pittsburgh pirates" | "pirates" | "pit" => "PIT",
        "san diego padres" | "padres" | "sdp" | "sd" => "SDP",
        "seattle mariners" | "mariners" | "sea" => "SEA",
        "san francisco giants" | "giants" | "sfg" | "sf" => "SFG",
        "st. louis cardinals" | "st louis cardinals" | "cardinals" | "stl" => "STL",
        "tampa bay rays" | "rays" | "tampa bay devil rays" | "tbr" | "tb" => "TBR",
        "texas rangers" | "rangers" | "tex" => "TEX",
        "toronto blue jays" | "blue jays" | "tor" => "TOR",
        "washington nationals" | "nationals" | "wsh" | "was" | "wsn" => "WSH",
        _ => return None,
    };
    Some(code)
}

/// Whether `code` is one of the 30 canonical codes.
pub fn is_canonical(code: &str) -> bool {
    CANONICAL_TEAMS.binary_search(&code).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_full_names_nicknames_and_codes() {
        assert_eq!(team_code("New York Yankees"), Some("NYY"));
        assert_eq!(team_code("Yankees"), Some("NYY"));
        assert_eq!(team_code("NYY"), Some("NYY"));
        assert_eq!(team_code("Chicago Cubs"), Some("CHC"));
        assert_eq!(team_code("Cubs"), Some("CHC"));
        assert_eq!(team_code("CHC"), Some("CHC"));
    }

    #[test]
    fn case_and_whitespace_insensitive() {
        assert_eq!(team_code("  red sox  "), Some("BOS"));
        assert_eq!(team_code("RED SOX"), Some("BOS"));
        assert_eq!(team_code("chicago   white   sox"), Some("CHW"));
    }

    #[test]
    fn alternate_abbreviations() {
        assert_eq!(team_code("CWS"), Some("CHW"));
        assert_eq!(team_code("KC"), Some("KCR"));
        assert_eq!(team_code("SD"), Some("SDP"));
        assert_eq!(team_code("SF"), Some("SFG"));
        assert_eq!(team_code("TB"), Some("TBR"));
        assert_eq!(team_code("WAS"), Some("WSH"));
        assert_eq!(team_code("WSN"), Some("WSH"));
        assert_eq!(team_code("ANA"), Some("LAA"));
        assert_eq!(team_code("AZ"), Some("ARI"));
        assert_eq!(team_code("FLA"), Some("MIA"));
    }

    #[test]
    fn unknown_input_is_none_not_error() {
        assert_eq!(team_code("Springfield Isotopes"), None);
        assert_eq!(team_code(""), None);
        assert_eq!(team_code("   "), None);
    }

    #[test]
    fn every_canonical_code_resolves_to_itself() {
        for code in CANONICAL_TEAMS {
            assert_eq!(team_code(code), Some(code), "code {code} must round-trip");
            assert!(is_canonical(code));
        }
    }

    #[test]
    fn deterministic() {
        for _ in 0..3 {
            assert_eq!(team_code("Cleveland Indians"), Some("CLE"));
        }
    }
}
