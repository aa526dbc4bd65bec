//! Error types for risk calculations

use thiserror::Error;

/// Errors that can occur in risk metric and backtest calculations
#[derive(Error, Debug)]
pub enum RiskError {
    /// Caller supplied unusable inputs (no matching assets, zero weight sum,
    /// unknown method name, disjoint date ranges, ...). Maps to a client
    /// error at the API layer.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A capability that was compiled out (GARCH fitting, Ledoit-Wolf
    /// shrinkage) was requested. Never silently substituted.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

pub type Result<T> = std::result::Result<T, RiskError>;
