//! External collaborators consulted by the runner.
//!
//! Both traits are synchronous: the runner executes on a blocking thread.

use valuo_core::resolver::{self, Candidate, Entity, DEFAULT_CANDIDATE_LIMIT};

use crate::error::StageError;

// ---------------------------------------------------------------------------
// Entity resolution
// ---------------------------------------------------------------------------

/// Turns a free-text company query into ranked candidates, best first.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, query: &str) -> Vec<Candidate>;
}

/// Resolves against the built-in seed universe.
#[derive(Debug, Clone)]
pub struct SeedResolver {
    limit: usize,
}

impl SeedResolver {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for SeedResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CANDIDATE_LIMIT)
    }
}

impl EntityResolver for SeedResolver {
    fn resolve(&self, query: &str) -> Vec<Candidate> {
        resolver::resolve(query, self.limit)
    }
}

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

/// Raw reported facts for one period, keyed by taxonomy tag.
#[derive(Debug, Clone, PartialEq)]
pub struct FactSet {
    pub unit: String,
    pub facts: Vec<(String, f64)>,
}

impl FactSet {
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.facts.iter().map(|(tag, v)| (tag.as_str(), *v))
    }
}

/// Supplies reported facts for a resolved entity.
pub trait FactSource: Send + Sync {
    fn fetch(&self, entity: &Entity) -> Result<FactSet, StageError>;
}

/// Fixed US-GAAP dataset returned for every entity.
#[derive(Debug, Clone, Default)]
pub struct StubFactSource;

const STUB_FACTS: &[(&str, f64)] = &[
    ("RevenueFromContractWithCustomerExcludingAssessedTax", 1000.0),
    ("CostOfRevenue", 400.0),
    ("ResearchAndDevelopmentExpense", 50.0),
    ("SellingGeneralAndAdministrativeExpense", 100.0),
    ("OperatingIncomeLoss", 200.0),
    ("DepreciationAndAmortization", 30.0),
];

impl FactSource for StubFactSource {
    fn fetch(&self, _entity: &Entity) -> Result<FactSet, StageError> {
        Ok(FactSet {
            unit: "USD".to_string(),
            facts: STUB_FACTS
                .iter()
                .map(|(tag, v)| ((*tag).to_string(), *v))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use valuo_core::mapper::{LineItem, Mapper};
    use valuo_core::resolver::SEED_ENTITIES;

    use super::*;

    #[test]
    fn seed_resolver_respects_limit() {
        assert!(SeedResolver::new(1).resolve("inc").len() <= 1);
        assert_eq!(SeedResolver::default().resolve("Google")[0].entity.ticker, "GOOGL");
    }

    #[test]
    fn stub_facts_map_to_core_lines() {
        let facts = StubFactSource.fetch(&SEED_ENTITIES[0]).unwrap();
        let mapped = Mapper::us_gaap().map_period(facts.iter(), &facts.unit);
        assert_eq!(mapped.get(&LineItem::Revenue), Some(&1000.0));
        assert_eq!(mapped.get(&LineItem::Cogs), Some(&400.0));
        assert_eq!(mapped.get(&LineItem::GrossProfit), Some(&600.0));
        assert_eq!(mapped.get(&LineItem::Ebit), Some(&200.0));
    }
}
