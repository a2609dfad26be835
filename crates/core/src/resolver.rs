//! Entity resolution: free-text company query to ranked candidates.
//!
//! Resolution runs against a small built-in seed universe. Ranking rules, in
//! descending strength:
//!
//! | Match                           | Score          |
//! |---------------------------------|----------------|
//! | exact ticker                    | 100            |
//! | alias or exact normalized name  | 95             |
//! | fuzzy name (Levenshtein)        | 90 - distance  |
//! | ticker contained in query       | 82             |
//! | query contained in name         | 81             |
//!
//! Candidates are deduplicated per listing keeping the best score, then
//! sorted by score with `(exchange, ticker)` as a deterministic tie-break.

use std::collections::HashMap;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default maximum number of candidates returned by [`resolve`].
pub const DEFAULT_CANDIDATE_LIMIT: usize = 5;

/// Fuzzy matches scoring below this are discarded.
const MIN_FUZZY_SCORE: f64 = 80.0;

const SCORE_EXACT_TICKER: f64 = 100.0;
const SCORE_ALIAS: f64 = 95.0;
const SCORE_FUZZY_BASE: f64 = 90.0;
const SCORE_TICKER_SUBSTRING: f64 = 82.0;
const SCORE_NAME_SUBSTRING: f64 = 81.0;

// ---------------------------------------------------------------------------
// Seed universe
// ---------------------------------------------------------------------------

/// A listed company the resolver knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub name: &'static str,
    pub ticker: &'static str,
    pub exchange: &'static str,
    pub country: &'static str,
    pub cik: Option<&'static str>,
    pub currency: Option<&'static str>,
}

pub const SEED_ENTITIES: &[Entity] = &[
    Entity {
        name: "Apple Inc.",
        ticker: "AAPL",
        exchange: "NASDAQ",
        country: "US",
        cik: Some("0000320193"),
        currency: Some("USD"),
    },
    Entity {
        name: "Alphabet Inc.",
        ticker: "GOOGL",
        exchange: "NASDAQ",
        country: "US",
        cik: Some("0001652044"),
        currency: Some("USD"),
    },
    Entity {
        name: "Microsoft Corporation",
        ticker: "MSFT",
        exchange: "NASDAQ",
        country: "US",
        cik: Some("0000789019"),
        currency: Some("USD"),
    },
    Entity {
        name: "Infosys Limited",
        ticker: "INFY",
        exchange: "NSE",
        country: "IN",
        cik: None,
        currency: Some("INR"),
    },
];

/// Common short names mapped to the canonical entity name.
const ALIASES: &[(&str, &str)] = &[
    ("google", "Alphabet Inc."),
    ("alphabet", "Alphabet Inc."),
    ("apple", "Apple Inc."),
    ("microsoft", "Microsoft Corporation"),
    ("infosys", "Infosys Limited"),
];

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Why a candidate matched the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactTicker,
    Alias,
    ExactName,
    Fuzzy { distance: usize },
    TickerSubstring,
    NameSubstring,
}

/// A ranked resolution result. Higher score is better.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub entity: &'static Entity,
    pub score: f64,
    pub reason: MatchReason,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Lowercase and strip everything that is not an ASCII letter or digit.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Levenshtein edit distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut curr = Vec::with_capacity(b_chars.len() + 1);
        curr.push(i + 1);
        for (j, cb) in b_chars.iter().enumerate() {
            let insert = curr[j] + 1;
            let delete = prev[j + 1] + 1;
            let substitute = prev[j] + usize::from(ca != *cb);
            curr.push(insert.min(delete).min(substitute));
        }
        prev = curr;
    }
    prev[b_chars.len()]
}

/// Resolve `query` against the seed universe, returning at most `limit`
/// candidates ordered best-first. A blank query yields no candidates.
pub fn resolve(query: &str, limit: usize) -> Vec<Candidate> {
    let qn = normalize(query.trim());
    if qn.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<Candidate> = Vec::new();
    let mut push = |entity: &'static Entity, score: f64, reason: MatchReason| {
        ranked.push(Candidate {
            entity,
            score,
            reason,
        });
    };

    for e in SEED_ENTITIES {
        if e.ticker.to_ascii_lowercase() == qn {
            push(e, SCORE_EXACT_TICKER, MatchReason::ExactTicker);
        }
    }

    if let Some((_, target)) = ALIASES.iter().find(|(alias, _)| normalize(alias) == qn) {
        for e in SEED_ENTITIES.iter().filter(|e| e.name == *target) {
            push(e, SCORE_ALIAS, MatchReason::Alias);
        }
    }
    for e in SEED_ENTITIES {
        if normalize(e.name) == qn {
            push(e, SCORE_ALIAS, MatchReason::ExactName);
        }
    }

    for e in SEED_ENTITIES {
        let distance = levenshtein(&normalize(e.name), &qn);
        let score = SCORE_FUZZY_BASE - distance as f64;
        if score >= MIN_FUZZY_SCORE {
            push(e, score, MatchReason::Fuzzy { distance });
        }
    }

    for e in SEED_ENTITIES {
        if qn.contains(&normalize(e.ticker)) {
            push(e, SCORE_TICKER_SUBSTRING, MatchReason::TickerSubstring);
        }
        if normalize(e.name).contains(&qn) {
            push(e, SCORE_NAME_SUBSTRING, MatchReason::NameSubstring);
        }
    }

    let mut best: HashMap<(&str, &str), Candidate> = HashMap::new();
    for c in ranked {
        let key = (c.entity.exchange, c.entity.ticker);
        match best.get(&key) {
            Some(existing) if existing.score >= c.score => {}
            _ => {
                best.insert(key, c);
            }
        }
    }

    let mut out: Vec<Candidate> = best.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entity.exchange.cmp(b.entity.exchange))
            .then_with(|| a.entity.ticker.cmp(b.entity.ticker))
    });
    out.truncate(limit);
    out
}
