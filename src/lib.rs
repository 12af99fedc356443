//! # RF Bench Core Library
//!
//! Automation library for an RF test bench built around a Vector Signal
//! Analyzer (VSA) and a Vector Signal Generator (VSG), both driven over
//! SCPI on TCP. A JSON test plan selects which measurements to run; the
//! campaign runner executes them and the report module writes the
//! results as JSON and as a formatted workbook.
//!
//! ## Crate Structure
//!
//! - **`scpi`**: Async SCPI-over-TCP client plus the `ScpiDevice` trait
//!   and a mock implementation for hardware-free testing.
//! - **`bench`**: Bench configuration (instrument addresses) and the
//!   `BenchConnector` trait that hands out instrument sessions.
//! - **`config`**: The test plan schema, including frequency range and
//!   power sweep expansion.
//! - **`measurements`**: One driver per test type, NR5G and LTE
//!   EVM/ACLR, spur search, and sub-thermal noise.
//! - **`runner`**: Walks the plan, applies the reconfiguration cache,
//!   and collects one record per test point.
//! - **`results`**: The record types shared by the runner and reports.
//! - **`report`**: JSON and workbook output.
//! - **`timing`**: Wall-clock timing of instrument operations.
//! - **`error`**: The crate-wide error enum.

pub mod bench;
pub mod config;
pub mod error;
pub mod measurements;
pub mod report;
pub mod results;
pub mod runner;
pub mod scpi;
pub mod timing;

pub use bench::{Bench, BenchConfig, BenchConnector, MockBench};
pub use config::TestPlan;
pub use error::{BenchError, BenchResult};
pub use results::{TestKind, TestRecord};
pub use runner::Campaign;
pub use scpi::{MockScpiDevice, ScpiClient, ScpiDevice};
