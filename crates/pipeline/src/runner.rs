//! One attempt of a valuation run.
//!
//! The runner never touches the run registry. It appends stage events to
//! the run's shared log as it goes and hands back everything else in an
//! [`AttemptOutput`] for the caller to commit in one step.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use valuo_core::error::CoreError;
use valuo_core::export::{
    self, IncomeStatementRow, MetadataRow, ASSUMPTIONS_MD, DCF_CSV, INCOME_STATEMENT_CSV,
    METADATA_CSV, VALIDATION_REPORT_MD,
};
use valuo_core::forecast::{project_quarters, ForecastRow};
use valuo_core::historical::{
    cash_flow_identity_holds, enrich_with_kpis, stitch_periods, PeriodRow, PeriodType,
    IDENTITY_TOLERANCE,
};
use valuo_core::mapper::{LineItem, LineItems, Mapper, MAPPER_VERSION, TAXONOMY_VERSION};
use valuo_core::resolver::Entity;
use valuo_core::run::{metrics, Artifacts, Stage, Summary};
use valuo_core::scenario::Scenario;
use valuo_core::types::RunId;
use valuo_core::valuation::{self, Valuation, WaccInputs, TERMINAL_GROWTH};
use valuo_events::EventLog;

use crate::error::StageError;
use crate::sources::{EntityResolver, FactSource, SeedResolver, StubFactSource};

/// Results of one successful attempt, not yet visible on the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptOutput {
    pub summary: Summary,
    pub artifacts: Artifacts,
}

/// Executes the ordered valuation stages for one run attempt.
///
/// Cheap to share: clone the `Arc` the orchestrator holds.
pub struct PipelineRunner {
    resolver: Arc<dyn EntityResolver>,
    facts: Arc<dyn FactSource>,
    mapper: Mapper,
    scenario: Scenario,
    wacc_inputs: WaccInputs,
    terminal_growth: f64,
    code_sha: String,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self {
            resolver: Arc::new(SeedResolver::default()),
            facts: Arc::new(StubFactSource),
            mapper: Mapper::us_gaap(),
            scenario: Scenario::default(),
            wacc_inputs: WaccInputs::default(),
            terminal_growth: TERMINAL_GROWTH,
            code_sha: "dev".to_string(),
        }
    }
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_fact_source(mut self, facts: Arc<dyn FactSource>) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_wacc_inputs(mut self, inputs: WaccInputs) -> Self {
        self.wacc_inputs = inputs;
        self
    }

    pub fn with_terminal_growth(mut self, g: f64) -> Self {
        self.terminal_growth = g;
        self
    }

    pub fn with_code_sha(mut self, sha: impl Into<String>) -> Self {
        self.code_sha = sha.into();
        self
    }

    /// Run every stage for `company`, recording progress into `log`.
    ///
    /// Ends the attempt with a `Done` event on success or an `Error` event
    /// carrying the failure message.
    pub fn run(
        &self,
        run_id: &RunId,
        company: &str,
        log: &EventLog,
    ) -> Result<AttemptOutput, StageError> {
        match self.execute(run_id, company, log) {
            Ok(output) => {
                log.record(Stage::Done, "Run completed");
                Ok(output)
            }
            Err(e) => {
                tracing::debug!(run_id = %run_id, error = %e, "Pipeline attempt failed");
                log.record(Stage::Error, e.to_string());
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        run_id: &RunId,
        company: &str,
        log: &EventLog,
    ) -> Result<AttemptOutput, StageError> {
        log.record(Stage::Resolve, format!("Resolving entity for '{company}'"));
        let candidates = self.resolver.resolve(company);
        let entity = candidates
            .first()
            .map(|c| c.entity)
            .ok_or_else(|| StageError::NoCandidates(company.to_string()))?;

        log.record(Stage::Ingest, format!("Fetching facts for {}", entity.ticker));
        let facts = self.facts.fetch(entity)?;
        let mapped = self.mapper.map_period(facts.iter(), &facts.unit);

        log.record(Stage::Map, "Building historical series");
        let history = build_history(&mapped);
        let history_ok = cash_flow_identity_holds(&history, IDENTITY_TOLERANCE);
        let enriched = enrich_with_kpis(history);
        let base = enriched
            .last()
            .map(|p| p.row.values.clone())
            .unwrap_or_default();

        log.record(Stage::Forecast, "Projecting 12 quarters");
        let forecast = project_quarters(&base, &self.scenario).map_err(|e| {
            StageError::Guardrail(match e {
                CoreError::Validation(msg) => msg,
                other => other.to_string(),
            })
        })?;

        log.record(Stage::Dcf, "Computing FCFF and DCF");
        let rate = valuation::wacc(self.wacc_inputs);
        let dcf = valuation::value_forecast(
            &forecast,
            self.scenario.tax_rate,
            rate,
            self.terminal_growth,
        )
        .map_err(|e| StageError::NonConvergentTerminal(e.to_string()))?;

        log.record(Stage::Export, "Generating CSVs and reports");
        let artifacts = self.export(run_id, entity, &forecast, &dcf, history_ok)?;

        let summary = Summary::from([
            (metrics::EV.to_string(), dcf.ev),
            (metrics::EQUITY_VALUE.to_string(), dcf.equity_value),
            (metrics::WACC.to_string(), dcf.wacc),
            (metrics::TERMINAL_GROWTH.to_string(), dcf.g),
        ]);
        Ok(AttemptOutput { summary, artifacts })
    }

    fn export(
        &self,
        run_id: &RunId,
        entity: &Entity,
        forecast: &[ForecastRow],
        dcf: &Valuation,
        history_ok: bool,
    ) -> Result<Artifacts, StageError> {
        let first = forecast
            .first()
            .ok_or_else(|| StageError::Export("no forecast periods to export".into()))?;
        let currency = entity.currency.unwrap_or("USD");
        let basis = self.mapper.basis();

        let income = IncomeStatementRow::from_forecast(entity.ticker, basis, currency, first);
        let metadata = MetadataRow {
            run_id: run_id.to_string(),
            company_key: format!("{}/{}", entity.ticker, entity.exchange),
            basis,
            currency: currency.to_string(),
            fiscal_year_end: "12-31".to_string(),
            generated_at: Utc::now(),
            mapper_version: MAPPER_VERSION.to_string(),
            taxonomy_version: TAXONOMY_VERSION.to_string(),
            code_sha: self.code_sha.clone(),
        };

        let mut warnings = Vec::new();
        if !history_ok {
            warnings.push("historical cash-flow identity does not reconcile".to_string());
        }
        let forecast_ok = forecast
            .iter()
            .all(|r| r.cash_identity_holds(IDENTITY_TOLERANCE));

        Ok(Artifacts::from([
            (DCF_CSV.to_string(), export::write_dcf(&dcf.rows)),
            (
                INCOME_STATEMENT_CSV.to_string(),
                export::write_income_statement(&[income]),
            ),
            (METADATA_CSV.to_string(), export::write_metadata(&[metadata])),
            (
                ASSUMPTIONS_MD.to_string(),
                export::assumptions_md(&self.scenario, &warnings),
            ),
            (
                VALIDATION_REPORT_MD.to_string(),
                export::validation_report_md(
                    &[
                        ("cash_flow_identity", forecast_ok),
                        ("historical_cash_flow_identity", history_ok),
                    ],
                    &[],
                ),
            ),
        ]))
    }
}

/// Latest fiscal year plus the preceding quarter, both carrying the mapped
/// facts. The annual period also carries opening working-capital balances.
fn build_history(mapped: &LineItems) -> Vec<PeriodRow> {
    let mut annual_values = mapped.clone();
    annual_values.insert(LineItem::Ar, 100.0);
    annual_values.insert(LineItem::Inventory, 80.0);
    annual_values.insert(LineItem::Ap, 70.0);

    let annual = vec![PeriodRow::new(
        fiscal_date(2023, 12, 31),
        PeriodType::Annual,
        annual_values,
    )];
    let quarterly = vec![PeriodRow::new(
        fiscal_date(2023, 9, 30),
        PeriodType::Quarterly,
        mapped.clone(),
    )];
    stitch_periods(annual, quarterly)
}

fn fiscal_date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}
