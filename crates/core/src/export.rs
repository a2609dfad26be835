//! Run artifact writers: CSV tables and Markdown reports.
//!
//! All writers return the full file content as a `String`. Absent values
//! become empty cells.

use crate::forecast::ForecastRow;
use crate::historical::PeriodType;
use crate::mapper::Basis;
use crate::scenario::Scenario;
use crate::types::Timestamp;
use crate::valuation::ValuationRow;

/// Artifact file names produced by every successful run.
pub const DCF_CSV: &str = "dcf.csv";
pub const INCOME_STATEMENT_CSV: &str = "income_statement.csv";
pub const METADATA_CSV: &str = "metadata.csv";
pub const ASSUMPTIONS_MD: &str = "assumptions.md";
pub const VALIDATION_REPORT_MD: &str = "validation_report.md";

pub const INCOME_STATEMENT_COLUMNS: &[&str] = &[
    "company_id",
    "basis",
    "currency",
    "period_end",
    "period_type",
    "revenue",
    "cogs",
    "gross_profit",
    "rnd",
    "sma",
    "gna",
    "da",
    "ebit",
    "interest_net",
    "pretax",
    "tax",
    "net_income",
    "nci",
];

pub const DCF_COLUMNS: &[&str] = &[
    "period_end",
    "ebit",
    "tax_rate",
    "nopat",
    "da",
    "capex",
    "delta_nwc",
    "fcf",
    "discount_factor",
    "pv_fcf",
    "terminal_value",
    "pv_terminal",
    "ev",
    "net_cash",
    "equity_value",
    "shares",
    "value_per_share",
];

pub const METADATA_COLUMNS: &[&str] = &[
    "run_id",
    "company_key",
    "basis",
    "currency",
    "fiscal_year_end",
    "generated_at",
    "mapper_version",
    "taxonomy_version",
    "code_sha",
];

// ---------------------------------------------------------------------------
// CSV helpers
// ---------------------------------------------------------------------------

/// Escape a value for CSV: wrap in quotes if it contains comma, quote, or newline.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn num(value: f64) -> Option<String> {
    Some(value.to_string())
}

fn opt_num(value: Option<f64>) -> Option<String> {
    value.map(|v| v.to_string())
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

/// Render a header line plus one line per row. Every row must carry one
/// cell per column.
fn write_csv<I>(columns: &[&str], rows: I) -> String
where
    I: IntoIterator<Item = Vec<Option<String>>>,
{
    let mut out = columns.join(",");
    out.push('\n');
    for row in rows {
        debug_assert_eq!(row.len(), columns.len());
        let line: Vec<String> = row
            .iter()
            .map(|cell| cell.as_deref().map(csv_escape).unwrap_or_default())
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Income statement
// ---------------------------------------------------------------------------

/// One income-statement line. Unprojected lines stay empty.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomeStatementRow {
    pub company_id: String,
    pub basis: Basis,
    pub currency: String,
    pub period_end: String,
    pub period_type: PeriodType,
    pub revenue: Option<f64>,
    pub cogs: Option<f64>,
    pub gross_profit: Option<f64>,
    pub rnd: Option<f64>,
    pub sma: Option<f64>,
    pub gna: Option<f64>,
    pub da: Option<f64>,
    pub ebit: Option<f64>,
    pub interest_net: Option<f64>,
    pub pretax: Option<f64>,
    pub tax: Option<f64>,
    pub net_income: Option<f64>,
    pub nci: Option<f64>,
}

impl IncomeStatementRow {
    /// Quarterly line built from a forecast row.
    pub fn from_forecast(company_id: &str, basis: Basis, currency: &str, row: &ForecastRow) -> Self {
        Self {
            company_id: company_id.to_string(),
            basis,
            currency: currency.to_string(),
            period_end: row.label(),
            period_type: PeriodType::Quarterly,
            revenue: Some(row.revenue),
            cogs: Some(row.cogs),
            gross_profit: Some(row.gross_profit),
            rnd: None,
            sma: None,
            gna: None,
            da: Some(row.da),
            ebit: Some(row.ebit),
            interest_net: None,
            pretax: None,
            tax: Some(row.tax),
            net_income: Some(row.net_income),
            nci: None,
        }
    }
}

pub fn write_income_statement(rows: &[IncomeStatementRow]) -> String {
    write_csv(
        INCOME_STATEMENT_COLUMNS,
        rows.iter().map(|r| {
            vec![
                text(&r.company_id),
                text(r.basis.as_str()),
                text(&r.currency),
                text(&r.period_end),
                text(r.period_type.as_str()),
                opt_num(r.revenue),
                opt_num(r.cogs),
                opt_num(r.gross_profit),
                opt_num(r.rnd),
                opt_num(r.sma),
                opt_num(r.gna),
                opt_num(r.da),
                opt_num(r.ebit),
                opt_num(r.interest_net),
                opt_num(r.pretax),
                opt_num(r.tax),
                opt_num(r.net_income),
                opt_num(r.nci),
            ]
        }),
    )
}

// ---------------------------------------------------------------------------
// DCF
// ---------------------------------------------------------------------------

pub fn write_dcf(rows: &[ValuationRow]) -> String {
    write_csv(
        DCF_COLUMNS,
        rows.iter().map(|r| {
            vec![
                text(&r.period_end),
                num(r.ebit),
                num(r.tax_rate),
                num(r.nopat),
                num(r.da),
                num(r.capex),
                num(r.delta_nwc),
                num(r.fcf),
                num(r.discount_factor),
                num(r.pv_fcf),
                opt_num(r.terminal_value),
                opt_num(r.pv_terminal),
                opt_num(r.ev),
                opt_num(r.net_cash),
                opt_num(r.equity_value),
                opt_num(r.shares),
                opt_num(r.value_per_share),
            ]
        }),
    )
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    pub run_id: String,
    /// `TICKER/EXCHANGE`
    pub company_key: String,
    pub basis: Basis,
    pub currency: String,
    /// `MM-DD`
    pub fiscal_year_end: String,
    pub generated_at: Timestamp,
    pub mapper_version: String,
    pub taxonomy_version: String,
    pub code_sha: String,
}

pub fn write_metadata(rows: &[MetadataRow]) -> String {
    write_csv(
        METADATA_COLUMNS,
        rows.iter().map(|r| {
            vec![
                text(&r.run_id),
                text(&r.company_key),
                text(r.basis.as_str()),
                text(&r.currency),
                text(&r.fiscal_year_end),
                Some(r.generated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                text(&r.mapper_version),
                text(&r.taxonomy_version),
                text(&r.code_sha),
            ]
        }),
    )
}

// ---------------------------------------------------------------------------
// Markdown reports
// ---------------------------------------------------------------------------

/// `# Assumptions` with one bullet per scenario field, then an optional
/// `## Warnings` section.
pub fn assumptions_md(scenario: &Scenario, warnings: &[String]) -> String {
    let mut lines = vec!["# Assumptions".to_string(), String::new()];
    for (name, value) in scenario.fields() {
        lines.push(format!("- {name}: {value}"));
    }
    if !warnings.is_empty() {
        lines.push(String::new());
        lines.push("## Warnings".to_string());
        lines.extend(warnings.iter().map(|w| format!("- {w}")));
    }
    lines.join("\n") + "\n"
}

/// `# Validation Report` with one `PASS`/`FAIL` bullet per check, then an
/// optional `## Details` section.
pub fn validation_report_md(checks: &[(&str, bool)], details: &[(&str, String)]) -> String {
    let mut lines = vec!["# Validation Report".to_string(), String::new()];
    for (name, ok) in checks {
        let verdict = if *ok { "PASS" } else { "FAIL" };
        lines.push(format!("- {name}: {verdict}"));
    }
    if !details.is_empty() {
        lines.push(String::new());
        lines.push("## Details".to_string());
        lines.extend(details.iter().map(|(k, v)| format!("- {k}: {v}")));
    }
    lines.join("\n") + "\n"
}
