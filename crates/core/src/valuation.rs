//! DCF valuation math: FCFF, WACC, Gordon terminal value, discounting.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::forecast::ForecastRow;

/// Long-run growth rate applied to the terminal value.
pub const TERMINAL_GROWTH: f64 = 0.03;

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FcffInputs {
    pub ebit: f64,
    pub tax_rate: f64,
    pub da: f64,
    pub capex: f64,
    pub delta_nwc: f64,
}

/// Free cash flow to firm: `NOPAT + D&A - capex - ΔNWC`.
pub fn fcff(i: FcffInputs) -> f64 {
    let nopat = i.ebit * (1.0 - i.tax_rate);
    nopat + i.da - i.capex - i.delta_nwc
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaccInputs {
    pub rf: f64,
    pub erp: f64,
    pub beta: f64,
    pub tax_rate: f64,
    /// D / (D + E)
    pub debt_ratio: f64,
    /// E / (D + E)
    pub equity_ratio: f64,
    /// Pre-tax cost of debt.
    pub rd: f64,
}

impl Default for WaccInputs {
    fn default() -> Self {
        Self {
            rf: 0.03,
            erp: 0.05,
            beta: 1.0,
            tax_rate: 0.25,
            debt_ratio: 0.2,
            equity_ratio: 0.8,
            rd: 0.05,
        }
    }
}

pub fn wacc(i: WaccInputs) -> f64 {
    let cost_of_equity = i.rf + i.beta * i.erp;
    let cost_of_debt = i.rd * (1.0 - i.tax_rate);
    i.equity_ratio * cost_of_equity + i.debt_ratio * cost_of_debt
}

/// Gordon growth value at the terminal date, not discounted.
///
/// `next_fcf` is the first cash flow of the perpetuity. Fails when the
/// discount rate does not exceed the growth rate.
pub fn terminal_value(next_fcf: f64, rate: f64, g: f64) -> Result<f64, CoreError> {
    if rate <= g {
        return Err(CoreError::Validation(format!(
            "terminal growth {g} must be below discount rate {rate}"
        )));
    }
    Ok(next_fcf / (rate - g))
}

/// `[1/(1+r)^1, ..., 1/(1+r)^periods]`
pub fn discount_factors(rate: f64, periods: usize) -> Vec<f64> {
    (1..=periods)
        .map(|t| 1.0 / (1.0 + rate).powi(t as i32))
        .collect()
}

// ---------------------------------------------------------------------------
// DCF
// ---------------------------------------------------------------------------

/// One row of the DCF table. Terminal and equity columns are only set on
/// the final period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRow {
    pub period_end: String,
    pub ebit: f64,
    pub tax_rate: f64,
    pub nopat: f64,
    pub da: f64,
    pub capex: f64,
    pub delta_nwc: f64,
    pub fcf: f64,
    pub discount_factor: f64,
    pub pv_fcf: f64,
    pub terminal_value: Option<f64>,
    pub pv_terminal: Option<f64>,
    pub ev: Option<f64>,
    pub net_cash: Option<f64>,
    pub equity_value: Option<f64>,
    pub shares: Option<f64>,
    pub value_per_share: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub rows: Vec<ValuationRow>,
    pub wacc: f64,
    pub g: f64,
    pub ev: f64,
    pub equity_value: f64,
}

/// Discount a forecast into an enterprise value.
///
/// Net cash is taken as zero and shares as one, so equity value equals EV.
pub fn value_forecast(
    forecast: &[ForecastRow],
    tax_rate: f64,
    rate: f64,
    g: f64,
) -> Result<Valuation, CoreError> {
    if forecast.is_empty() {
        return Err(CoreError::Validation("forecast is empty".into()));
    }

    let dfs = discount_factors(rate, forecast.len());
    let mut rows: Vec<ValuationRow> = forecast
        .iter()
        .zip(&dfs)
        .map(|(r, df)| {
            let fcf = fcff(FcffInputs {
                ebit: r.ebit,
                tax_rate,
                da: r.da,
                capex: r.capex,
                delta_nwc: r.delta_nwc,
            });
            ValuationRow {
                period_end: r.label(),
                ebit: r.ebit,
                tax_rate,
                nopat: r.ebit * (1.0 - tax_rate),
                da: r.da,
                capex: r.capex,
                delta_nwc: r.delta_nwc,
                fcf,
                discount_factor: *df,
                pv_fcf: fcf * df,
                terminal_value: None,
                pv_terminal: None,
                ev: None,
                net_cash: None,
                equity_value: None,
                shares: None,
                value_per_share: None,
            }
        })
        .collect();

    let last_df = dfs[dfs.len() - 1];
    let last_fcf = rows[rows.len() - 1].fcf;
    let tv = terminal_value(last_fcf * (1.0 + g), rate, g)?;
    let pv_tv = tv * last_df;
    let ev = rows.iter().map(|r| r.pv_fcf).sum::<f64>() + pv_tv;
    let net_cash = 0.0;
    let shares = 1.0;
    let equity_value = ev + net_cash;

    if let Some(final_row) = rows.last_mut() {
        final_row.terminal_value = Some(tv);
        final_row.pv_terminal = Some(pv_tv);
        final_row.ev = Some(ev);
        final_row.net_cash = Some(net_cash);
        final_row.equity_value = Some(equity_value);
        final_row.shares = Some(shares);
        final_row.value_per_share = Some(equity_value / shares);
    }

    Ok(Valuation {
        rows,
        wacc: rate,
        g,
        ev,
        equity_value,
    })
}
