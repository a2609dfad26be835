/// Failure of one pipeline stage. Every variant aborts the attempt and is
/// eligible for a whole-pipeline retry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("No entity candidates found for '{0}'")]
    NoCandidates(String),

    /// The fact source could not supply data for the resolved entity.
    #[error("Ingestion failed: {0}")]
    Ingest(String),

    /// Scenario parameters outside the supported ranges.
    #[error("Scenario guardrail violated: {0}")]
    Guardrail(String),

    /// Terminal growth is not below the discount rate.
    #[error("Terminal value does not converge: {0}")]
    NonConvergentTerminal(String),

    #[error("Export failed: {0}")]
    Export(String),
}
