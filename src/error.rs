//! Custom error types for the application.
//!
//! This module defines the primary error type, `BenchError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from I/O and configuration issues to instrument-specific problems.
//!
//! - **`Config`**: wraps errors from the `config` crate, typically file
//!   parsing or format issues in `bench_config.ini`.
//! - **`Configuration`**: semantic errors in a configuration that parsed
//!   cleanly but is logically invalid (e.g. a frequency range whose start
//!   exceeds its stop). These are caught during the validation step.
//! - **`Io`**: standard `std::io::Error`, covering file and network I/O.
//! - **`Plan`**: malformed `test_inputs.json`.
//! - **`Instrument`**: errors originating in the SCPI layer or a
//!   measurement driver (connection failures, timeouts, unparseable
//!   replies that are not tolerated by the measurement).
//! - **`Report`**: spreadsheet output failures.
//!
//! By using `#[from]`, `BenchError` can be seamlessly created from the
//! underlying error types, simplifying error handling throughout the
//! application with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Parse/format error from the `config` crate (bench_config.ini).
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Semantic error in a configuration value that parsed cleanly.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or network I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed test plan JSON.
    #[error("Test plan error: {0}")]
    Plan(#[from] serde_json::Error),

    /// Failure in the SCPI layer or a measurement driver.
    #[error("Instrument error: {0}")]
    Instrument(#[from] anyhow::Error),

    /// Spreadsheet output failure.
    #[error("Report error: {0}")]
    Report(#[from] rust_xlsxwriter::XlsxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_errors_keep_their_message() {
        let err: BenchError = anyhow::anyhow!("VSA did not answer *IDN?").into();
        assert!(err.to_string().contains("VSA did not answer"));
    }

    #[test]
    fn validation_errors_are_distinct_from_parse_errors() {
        let err = BenchError::Configuration("step_mhz must be positive".into());
        assert!(matches!(err, BenchError::Configuration(_)));
        assert!(err.to_string().contains("step_mhz"));
    }
}
