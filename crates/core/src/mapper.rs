//! Tag mapping: raw reported facts to canonical line items.
//!
//! A [`Mapper`] holds a rule set (reporting tag -> canonical line, with sign,
//! precedence, and optional unit filter) plus a tag alias table. Two rule
//! sets are built in: US-GAAP and IFRS.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Line items
// ---------------------------------------------------------------------------

/// Canonical financial statement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItem {
    Revenue,
    Cogs,
    GrossProfit,
    Rnd,
    Sma,
    Gna,
    Da,
    Ebit,
    InterestNet,
    Pretax,
    Tax,
    NetIncome,
    Capex,
    Cfo,
    Cfi,
    Cff,
    Cash,
    Ar,
    Inventory,
    Ap,
}

impl LineItem {
    pub fn as_str(self) -> &'static str {
        match self {
            LineItem::Revenue => "revenue",
            LineItem::Cogs => "cogs",
            LineItem::GrossProfit => "gross_profit",
            LineItem::Rnd => "rnd",
            LineItem::Sma => "sma",
            LineItem::Gna => "gna",
            LineItem::Da => "da",
            LineItem::Ebit => "ebit",
            LineItem::InterestNet => "interest_net",
            LineItem::Pretax => "pretax",
            LineItem::Tax => "tax",
            LineItem::NetIncome => "net_income",
            LineItem::Capex => "capex",
            LineItem::Cfo => "cfo",
            LineItem::Cfi => "cfi",
            LineItem::Cff => "cff",
            LineItem::Cash => "cash",
            LineItem::Ar => "ar",
            LineItem::Inventory => "inventory",
            LineItem::Ap => "ap",
        }
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical values for a single reporting period.
pub type LineItems = BTreeMap<LineItem, f64>;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Reporting basis a rule set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Basis {
    #[serde(rename = "US-GAAP")]
    UsGaap,
    #[serde(rename = "IFRS")]
    Ifrs,
}

impl Basis {
    pub fn as_str(self) -> &'static str {
        match self {
            Basis::UsGaap => "US-GAAP",
            Basis::Ifrs => "IFRS",
        }
    }
}

/// Version stamp written into run metadata.
pub const MAPPER_VERSION: &str = "0.1";

/// Taxonomy release the built-in rules were written against.
pub const TAXONOMY_VERSION: &str = "2024.0";

#[derive(Debug, Clone, PartialEq)]
pub struct MappingRule {
    pub tag: &'static str,
    pub canonical: LineItem,
    /// Multiplier applied to the raw value (`1` or `-1`).
    pub sign: f64,
    /// Higher precedence wins when several tags map to the same line.
    pub precedence: i32,
    /// When set, the rule only applies to facts reported in one of these units.
    pub units: Option<&'static [&'static str]>,
}

const fn rule(tag: &'static str, canonical: LineItem, precedence: i32) -> MappingRule {
    MappingRule {
        tag,
        canonical,
        sign: 1.0,
        precedence,
        units: None,
    }
}

fn gaap_rules() -> Vec<MappingRule> {
    vec![
        rule("Revenues", LineItem::Revenue, 0),
        rule(
            "RevenueFromContractWithCustomerExcludingAssessedTax",
            LineItem::Revenue,
            10,
        ),
        rule("CostOfGoodsAndServicesSold", LineItem::Cogs, 0),
        rule("CostOfRevenue", LineItem::Cogs, 10),
        rule("GrossProfit", LineItem::GrossProfit, 0),
        rule("ResearchAndDevelopmentExpense", LineItem::Rnd, 0),
        rule("SellingGeneralAndAdministrativeExpense", LineItem::Sma, 0),
        rule("GeneralAndAdministrativeExpense", LineItem::Gna, 0),
        rule("DepreciationDepletionAndAmortization", LineItem::Da, 0),
        rule("DepreciationAndAmortization", LineItem::Da, 10),
        rule("OperatingIncomeLoss", LineItem::Ebit, 0),
        MappingRule {
            sign: -1.0,
            ..rule("InterestExpense", LineItem::InterestNet, 0)
        },
        rule(
            "IncomeLossFromContinuingOperationsBeforeIncomeTaxesExtraordinaryItemsNoncontrollingInterest",
            LineItem::Pretax,
            0,
        ),
        rule("IncomeTaxExpenseBenefit", LineItem::Tax, 0),
        rule("NetIncomeLoss", LineItem::NetIncome, 0),
        rule("PaymentsToAcquirePropertyPlantAndEquipment", LineItem::Capex, 0),
        rule("NetCashProvidedByUsedInOperatingActivities", LineItem::Cfo, 0),
        rule("NetCashProvidedByUsedInInvestingActivities", LineItem::Cfi, 0),
        rule("NetCashProvidedByUsedInFinancingActivities", LineItem::Cff, 0),
        MappingRule {
            units: Some(&["USD"]),
            ..rule("CashAndCashEquivalentsAtCarryingValue", LineItem::Cash, 0)
        },
        rule("AccountsReceivableNetCurrent", LineItem::Ar, 0),
        rule("InventoryNet", LineItem::Inventory, 0),
        rule("AccountsPayableCurrent", LineItem::Ap, 0),
    ]
}

fn ifrs_rules() -> Vec<MappingRule> {
    vec![
        rule("Revenue", LineItem::Revenue, 0),
        rule("CostOfSales", LineItem::Cogs, 0),
        rule("GrossProfit", LineItem::GrossProfit, 0),
        rule("ResearchAndDevelopmentExpense", LineItem::Rnd, 0),
        rule("SellingGeneralAndAdministrativeExpense", LineItem::Sma, 0),
        rule("AdministrativeExpense", LineItem::Gna, 0),
        rule("DepreciationAndAmortisationExpense", LineItem::Da, 0),
        rule("ProfitLossFromOperatingActivities", LineItem::Ebit, 0),
        rule("IncomeTaxExpenseContinuingOperations", LineItem::Tax, 0),
        rule("ProfitLoss", LineItem::NetIncome, 0),
        rule("CashFlowsFromUsedInOperatingActivities", LineItem::Cfo, 0),
        rule("CashFlowsFromUsedInInvestingActivities", LineItem::Cfi, 0),
        rule("CashFlowsFromUsedInFinancingActivities", LineItem::Cff, 0),
        rule("CashAndCashEquivalents", LineItem::Cash, 0),
        rule("TradeAndOtherCurrentReceivables", LineItem::Ar, 0),
        rule("Inventories", LineItem::Inventory, 0),
        rule("TradeAndOtherCurrentPayables", LineItem::Ap, 0),
    ]
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Mapper {
    basis: Basis,
    /// Sorted ascending by precedence so later rules overwrite earlier ones.
    rules: Vec<MappingRule>,
    aliases: BTreeMap<&'static str, &'static str>,
}

impl Mapper {
    pub fn new(
        basis: Basis,
        mut rules: Vec<MappingRule>,
        aliases: &[(&'static str, &'static str)],
    ) -> Self {
        rules.sort_by_key(|r| r.precedence);
        Self {
            basis,
            rules,
            aliases: aliases.iter().copied().collect(),
        }
    }

    pub fn us_gaap() -> Self {
        Self::new(
            Basis::UsGaap,
            gaap_rules(),
            &[
                (
                    "SalesRevenueNet",
                    "RevenueFromContractWithCustomerExcludingAssessedTax",
                ),
                ("CostOfGoodsSold", "CostOfGoodsAndServicesSold"),
            ],
        )
    }

    pub fn ifrs() -> Self {
        Self::new(Basis::Ifrs, ifrs_rules(), &[("Turnover", "Revenue")])
    }

    pub fn basis(&self) -> Basis {
        self.basis
    }

    pub fn resolve_alias<'a>(&'a self, tag: &'a str) -> &'a str {
        self.aliases.get(tag).copied().unwrap_or(tag)
    }

    /// Map `{tag: value}` facts for one period into canonical line items.
    ///
    /// Facts without a matching rule are dropped. `gross_profit` is derived
    /// from revenue and COGS when not reported directly.
    pub fn map_period<'a, I>(&self, facts: I, unit: &str) -> LineItems
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let normalized: BTreeMap<&str, f64> = facts
            .into_iter()
            .map(|(tag, value)| (self.resolve_alias(tag), value))
            .collect();

        let mut out = LineItems::new();
        for rule in &self.rules {
            if let Some(units) = rule.units {
                if !units.iter().any(|u| *u == unit) {
                    continue;
                }
            }
            if let Some(value) = normalized.get(rule.tag) {
                out.insert(rule.canonical, rule.sign * value);
            }
        }

        if !out.contains_key(&LineItem::GrossProfit) {
            let derived = match (out.get(&LineItem::Revenue), out.get(&LineItem::Cogs)) {
                (Some(rev), Some(cogs)) => Some(rev - cogs),
                _ => None,
            };
            if let Some(gross_profit) = derived {
                out.insert(LineItem::GrossProfit, gross_profit);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaap_basic_mapping() {
        let mapper = Mapper::us_gaap();
        let out = mapper.map_period(
            [
                ("RevenueFromContractWithCustomerExcludingAssessedTax", 1000.0),
                ("CostOfRevenue", 400.0),
                ("ResearchAndDevelopmentExpense", 50.0),
                ("SellingGeneralAndAdministrativeExpense", 100.0),
            ],
            "USD",
        );
        assert_eq!(out[&LineItem::Revenue], 1000.0);
        assert_eq!(out[&LineItem::Cogs], 400.0);
        assert_eq!(out[&LineItem::GrossProfit], 600.0);
        assert_eq!(out[&LineItem::Sma], 100.0);
        assert_eq!(out[&LineItem::Rnd], 50.0);
    }

    #[test]
    fn gaap_alias_is_followed() {
        let mapper = Mapper::us_gaap();
        let out = mapper.map_period([("SalesRevenueNet", 900.0), ("CostOfRevenue", 300.0)], "USD");
        assert_eq!(out[&LineItem::Revenue], 900.0);
        assert_eq!(out[&LineItem::GrossProfit], 600.0);
    }

    #[test]
    fn ifrs_rules_map_in_other_currencies() {
        let mapper = Mapper::ifrs();
        let out = mapper.map_period([("Revenue", 800.0), ("CostOfSales", 200.0)], "EUR");
        assert_eq!(out[&LineItem::Revenue], 800.0);
        assert_eq!(out[&LineItem::Cogs], 200.0);
        assert_eq!(out[&LineItem::GrossProfit], 600.0);
    }

    #[test]
    fn higher_precedence_tag_wins() {
        let mapper = Mapper::us_gaap();
        let out = mapper.map_period(
            [
                ("RevenueFromContractWithCustomerExcludingAssessedTax", 1000.0),
                ("Revenues", 1100.0),
            ],
            "USD",
        );
        assert_eq!(out[&LineItem::Revenue], 1000.0);
    }

    #[test]
    fn unmapped_tags_are_dropped() {
        let mapper = Mapper::us_gaap();
        let out = mapper.map_period([("SomeCustomExtensionTag", 5.0)], "USD");
        assert!(out.is_empty());
    }

    #[test]
    fn sign_is_applied() {
        let mapper = Mapper::us_gaap();
        let out = mapper.map_period([("InterestExpense", 12.0)], "USD");
        assert_eq!(out[&LineItem::InterestNet], -12.0);
    }

    #[test]
    fn unit_filter_skips_rule() {
        let mapper = Mapper::us_gaap();
        let out = mapper.map_period([("CashAndCashEquivalentsAtCarryingValue", 10.0)], "EUR");
        assert!(!out.contains_key(&LineItem::Cash));
        let out = mapper.map_period([("CashAndCashEquivalentsAtCarryingValue", 10.0)], "USD");
        assert_eq!(out[&LineItem::Cash], 10.0);
    }

    #[test]
    fn reported_gross_profit_is_not_overwritten() {
        let mapper = Mapper::us_gaap();
        let out = mapper.map_period(
            [
                ("Revenues", 100.0),
                ("CostOfRevenue", 40.0),
                ("GrossProfit", 55.0),
            ],
            "USD",
        );
        assert_eq!(out[&LineItem::GrossProfit], 55.0);
    }
}
