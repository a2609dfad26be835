//! Historical series assembly: period stitching, KPI enrichment, and the
//! advisory cash-flow identity check.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::mapper::{LineItem, LineItems};

/// Days used to annualize turnover ratios for annual periods.
pub const DAYS_ANNUAL: f64 = 365.0;

/// Days used to annualize turnover ratios for quarterly periods.
pub const DAYS_QUARTER: f64 = 90.0;

/// Default tolerance for the cash-flow identity check.
pub const IDENTITY_TOLERANCE: f64 = 1e-3;

// ---------------------------------------------------------------------------
// Periods
// ---------------------------------------------------------------------------

/// Annual periods sort before quarterly periods ending on the same date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PeriodType {
    #[serde(rename = "A")]
    Annual,
    #[serde(rename = "Q")]
    Quarterly,
}

impl PeriodType {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Annual => "A",
            PeriodType::Quarterly => "Q",
        }
    }

    pub fn days(self) -> f64 {
        match self {
            PeriodType::Annual => DAYS_ANNUAL,
            PeriodType::Quarterly => DAYS_QUARTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRow {
    pub period_end: NaiveDate,
    pub period_type: PeriodType,
    pub values: LineItems,
}

impl PeriodRow {
    pub fn new(period_end: NaiveDate, period_type: PeriodType, values: LineItems) -> Self {
        Self {
            period_end,
            period_type,
            values,
        }
    }

    pub fn get(&self, item: LineItem) -> Option<f64> {
        self.values.get(&item).copied()
    }
}

/// Merge annual and quarterly rows into one ascending series.
///
/// Rows repeating an already seen `(period_end, period_type)` are dropped
/// (first occurrence wins, annual input first). The result is sorted by
/// date with annual before quarterly on ties.
pub fn stitch_periods(annual: Vec<PeriodRow>, quarterly: Vec<PeriodRow>) -> Vec<PeriodRow> {
    let mut seen: HashSet<(NaiveDate, PeriodType)> = HashSet::new();
    let mut merged: Vec<PeriodRow> = annual
        .into_iter()
        .chain(quarterly)
        .filter(|r| seen.insert((r.period_end, r.period_type)))
        .collect();
    merged.sort_by_key(|r| (r.period_end, r.period_type));
    merged
}

// ---------------------------------------------------------------------------
// KPIs
// ---------------------------------------------------------------------------

/// Ratios derived from a single period. Absent inputs leave a KPI unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub dso: Option<f64>,
    pub dio: Option<f64>,
    pub dpo: Option<f64>,
    pub capex_pct_revenue: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPeriod {
    pub row: PeriodRow,
    pub kpis: Kpis,
}

/// Divide, returning `None` for a zero denominator.
fn ratio(num: f64, den: f64) -> Option<f64> {
    (den != 0.0).then(|| num / den)
}

pub fn compute_kpis(row: &PeriodRow) -> Kpis {
    let days = row.period_type.days();
    let revenue = row.get(LineItem::Revenue);
    let cogs = row.get(LineItem::Cogs);

    let per_revenue = |item: LineItem| match (row.get(item), revenue) {
        (Some(v), Some(rev)) => ratio(v, rev),
        _ => None,
    };
    let days_of = |item: LineItem, base: Option<f64>| match (row.get(item), base) {
        (Some(v), Some(b)) => ratio(v, b).map(|r| r * days),
        _ => None,
    };

    Kpis {
        gross_margin: per_revenue(LineItem::GrossProfit),
        operating_margin: per_revenue(LineItem::Ebit),
        dso: days_of(LineItem::Ar, revenue),
        dio: days_of(LineItem::Inventory, cogs),
        dpo: days_of(LineItem::Ap, cogs),
        capex_pct_revenue: per_revenue(LineItem::Capex),
    }
}

pub fn enrich_with_kpis(rows: Vec<PeriodRow>) -> Vec<HistoricalPeriod> {
    rows.into_iter()
        .map(|row| {
            let kpis = compute_kpis(&row);
            HistoricalPeriod { row, kpis }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Identity check
// ---------------------------------------------------------------------------

/// Check `cfo + cfi + cff == Δcash` across consecutive periods.
///
/// Pairs missing any of the inputs are skipped. The last known cash balance
/// carries forward across periods that do not report one. Returns `true`
/// when every comparable pair reconciles within `tolerance`.
pub fn cash_flow_identity_holds(rows: &[PeriodRow], tolerance: f64) -> bool {
    let mut prev_cash: Option<f64> = None;
    let mut ok = true;
    for row in rows {
        let cash = row.get(LineItem::Cash);
        if let (Some(cash), Some(prev)) = (cash, prev_cash) {
            if let (Some(cfo), Some(cfi), Some(cff)) = (
                row.get(LineItem::Cfo),
                row.get(LineItem::Cfi),
                row.get(LineItem::Cff),
            ) {
                let implied = cfo + cfi + cff;
                let observed = cash - prev;
                if (implied - observed).abs() > tolerance {
                    ok = false;
                }
            }
        }
        if cash.is_some() {
            prev_cash = cash;
        }
    }
    ok
}
