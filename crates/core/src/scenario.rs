//! Forecast scenario and its guardrails.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Driver assumptions for a 12-quarter projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Quarter-over-quarter revenue growth (0.02 is roughly 8.2% annualized).
    pub revenue_growth_qoq: f64,
    pub target_gross_margin: f64,
    pub target_operating_margin: f64,
    pub dso: f64,
    pub dio: f64,
    pub dpo: f64,
    pub capex_pct_revenue: f64,
    pub da_pct_revenue: f64,
    pub tax_rate: f64,
    pub net_interest_rate: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            revenue_growth_qoq: 0.02,
            target_gross_margin: 0.6,
            target_operating_margin: 0.2,
            dso: 45.0,
            dio: 60.0,
            dpo: 50.0,
            capex_pct_revenue: 0.05,
            da_pct_revenue: 0.03,
            tax_rate: 0.25,
            net_interest_rate: 0.0,
        }
    }
}

impl Scenario {
    /// Field name and value pairs, in declaration order.
    pub fn fields(&self) -> [(&'static str, f64); 10] {
        [
            ("revenue_growth_qoq", self.revenue_growth_qoq),
            ("target_gross_margin", self.target_gross_margin),
            ("target_operating_margin", self.target_operating_margin),
            ("dso", self.dso),
            ("dio", self.dio),
            ("dpo", self.dpo),
            ("capex_pct_revenue", self.capex_pct_revenue),
            ("da_pct_revenue", self.da_pct_revenue),
            ("tax_rate", self.tax_rate),
            ("net_interest_rate", self.net_interest_rate),
        ]
    }

    /// Reject scenarios outside the supported ranges.
    pub fn validate(&self) -> Result<(), CoreError> {
        check_range("gross margin", self.target_gross_margin, 0.95)?;
        check_range("operating margin", self.target_operating_margin, 0.6)?;
        check_range("tax rate", self.tax_rate, 0.5)?;
        check_range("capex % revenue", self.capex_pct_revenue, 0.5)?;
        check_range("D&A % revenue", self.da_pct_revenue, 0.3)?;
        Ok(())
    }
}

fn check_range(label: &str, value: f64, max: f64) -> Result<(), CoreError> {
    if (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{label} must be between 0 and {}%, got {value}",
            max * 100.0
        )))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_scenario_passes_guardrails() {
        assert!(Scenario::default().validate().is_ok());
    }

    #[test]
    fn gross_margin_above_cap_is_rejected() {
        let s = Scenario {
            target_gross_margin: 0.96,
            ..Scenario::default()
        };
        assert_matches!(s.validate(), Err(CoreError::Validation(msg)) if msg.contains("gross margin"));
    }

    #[test]
    fn negative_tax_rate_is_rejected() {
        let s = Scenario {
            tax_rate: -0.01,
            ..Scenario::default()
        };
        assert_matches!(s.validate(), Err(CoreError::Validation(msg)) if msg.contains("tax rate"));
    }

    #[test]
    fn bounds_are_inclusive() {
        let s = Scenario {
            target_operating_margin: 0.6,
            da_pct_revenue: 0.3,
            capex_pct_revenue: 0.0,
            ..Scenario::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn nan_is_rejected() {
        let s = Scenario {
            capex_pct_revenue: f64::NAN,
            ..Scenario::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn fields_keep_declaration_order() {
        let fields = Scenario::default().fields();
        assert_eq!(fields[0].0, "revenue_growth_qoq");
        assert_eq!(fields[8], ("tax_rate", 0.25));
    }
}
