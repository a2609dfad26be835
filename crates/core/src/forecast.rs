//! Quarterly operating projection driven by a [`Scenario`].
//!
//! Simplifications: CFO excludes interest and stock compensation, CFI is
//! capex only, and CFF is zero.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::mapper::{LineItem, LineItems};
use crate::scenario::Scenario;

/// Number of projected quarters.
pub const FORECAST_QUARTERS: usize = 12;

/// Day count of one projected quarter, used for working-capital levels.
const QUARTER_DAYS: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    /// 1-based quarter offset from the last historical period.
    pub period: usize,
    pub revenue: f64,
    pub cogs: f64,
    pub gross_profit: f64,
    pub ebit: f64,
    pub tax: f64,
    pub net_income: f64,
    pub da: f64,
    pub capex: f64,
    pub ar: f64,
    pub inventory: f64,
    pub ap: f64,
    pub delta_nwc: f64,
    pub cfo: f64,
    pub cfi: f64,
    pub cff: f64,
    pub delta_cash: f64,
}

impl ForecastRow {
    /// `T+n` label used in exports.
    pub fn label(&self) -> String {
        format!("T+{}", self.period)
    }

    pub fn cash_identity_holds(&self, tolerance: f64) -> bool {
        (self.cfo + self.cfi + self.cff - self.delta_cash).abs() <= tolerance
    }
}

/// Project [`FORECAST_QUARTERS`] quarters from the last historical period.
///
/// Missing base values default to zero. The scenario is validated first.
pub fn project_quarters(base: &LineItems, scenario: &Scenario) -> Result<Vec<ForecastRow>, CoreError> {
    scenario.validate()?;

    let base_of = |item: LineItem| base.get(&item).copied().unwrap_or(0.0);
    let mut revenue = base_of(LineItem::Revenue);
    let mut ar = base_of(LineItem::Ar);
    let mut inventory = base_of(LineItem::Inventory);
    let mut ap = base_of(LineItem::Ap);

    let mut rows = Vec::with_capacity(FORECAST_QUARTERS);
    for period in 1..=FORECAST_QUARTERS {
        revenue *= 1.0 + scenario.revenue_growth_qoq;
        let cogs = revenue * (1.0 - scenario.target_gross_margin);
        let ebit = revenue * scenario.target_operating_margin;
        let da = revenue * scenario.da_pct_revenue;
        let capex = revenue * scenario.capex_pct_revenue;

        let ar_level = scenario.dso / QUARTER_DAYS * revenue;
        let inventory_level = scenario.dio / QUARTER_DAYS * cogs;
        let ap_level = scenario.dpo / QUARTER_DAYS * cogs;
        let delta_nwc = (ar_level - ar) + (inventory_level - inventory) - (ap_level - ap);

        let tax = (ebit * scenario.tax_rate).max(0.0);
        let nopat = ebit - tax;
        let cfo = nopat + da - delta_nwc;
        let cfi = -capex;
        let cff = 0.0;

        rows.push(ForecastRow {
            period,
            revenue,
            cogs,
            gross_profit: revenue - cogs,
            ebit,
            tax,
            net_income: nopat,
            da,
            capex,
            ar: ar_level,
            inventory: inventory_level,
            ap: ap_level,
            delta_nwc,
            cfo,
            cfi,
            cff,
            delta_cash: cfo + cfi + cff,
        });

        ar = ar_level;
        inventory = inventory_level;
        ap = ap_level;
    }
    Ok(rows)
}
