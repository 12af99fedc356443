//! Test plan schema (`config/test_inputs.json`).
//!
//! The plan has four top-level arrays: `lte`, `nr5g`, `STN` and
//! `spur_search`. Every entry carries a `run` flag; entries with
//! `run: false` are skipped entirely. Frequency fields accept a scalar in
//! GHz, a list of GHz values, or a `{ "range": { start_ghz, stop_ghz,
//! step_mhz } }` object; power fields accept a scalar in dBm or an array
//! for sweeps.

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete test plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestPlan {
    /// 5G NR EVM/ACLR test entries.
    #[serde(default)]
    pub nr5g: Vec<EvmTestEntry>,
    /// LTE EVM/ACLR test entries.
    #[serde(default)]
    pub lte: Vec<EvmTestEntry>,
    /// Spur search test entries.
    #[serde(default)]
    pub spur_search: Vec<SpurSearchEntry>,
    /// Sub-thermal-noise test entries.
    #[serde(default, rename = "STN")]
    pub stn: Vec<StnTestEntry>,
}

impl TestPlan {
    /// Load a test plan from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&raw)?;
        tracing::info!(
            "Loaded test plan from {} ({} nr5g, {} lte, {} spur_search, {} STN entries)",
            path.display(),
            plan.nr5g.len(),
            plan.lte.len(),
            plan.spur_search.len(),
            plan.stn.len()
        );
        Ok(plan)
    }
}

/// A frequency given as a scalar, a list, or a start/stop/step range.
/// All values are in GHz except the range step, which is in MHz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrequencySpec {
    /// Single frequency in GHz.
    Scalar(f64),
    /// Explicit list of frequencies in GHz.
    List(Vec<f64>),
    /// Linearly spaced range.
    Range {
        /// The range parameters.
        range: FrequencyRange,
    },
}

/// Linearly spaced frequency range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    /// First frequency in GHz.
    pub start_ghz: f64,
    /// Last frequency in GHz (inclusive).
    pub stop_ghz: f64,
    /// Step size in MHz.
    pub step_mhz: f64,
}

impl FrequencyRange {
    fn validate(&self) -> BenchResult<()> {
        if !(self.start_ghz.is_finite() && self.stop_ghz.is_finite() && self.step_mhz.is_finite()) {
            return Err(BenchError::Configuration(format!(
                "range parameters must be finite: {:?}",
                self
            )));
        }
        if self.start_ghz > self.stop_ghz {
            return Err(BenchError::Configuration(format!(
                "start frequency ({} GHz) exceeds stop ({} GHz)",
                self.start_ghz, self.stop_ghz
            )));
        }
        if self.step_mhz <= 0.0 {
            return Err(BenchError::Configuration(format!(
                "invalid step size: {} MHz",
                self.step_mhz
            )));
        }
        Ok(())
    }
}

impl FrequencySpec {
    /// Expand to a list of frequencies in GHz.
    ///
    /// A range expands to `floor((stop - start) / (step_mhz / 1000)) + 1`
    /// evenly spaced points from start to stop inclusive.
    pub fn expand(&self) -> BenchResult<Vec<f64>> {
        match self {
            Self::Scalar(f) => Ok(vec![*f]),
            Self::List(list) => Ok(list.clone()),
            Self::Range { range } => {
                range.validate()?;
                let step_ghz = range.step_mhz / 1000.0;
                let n = ((range.stop_ghz - range.start_ghz) / step_ghz).floor() as usize + 1;
                if n == 1 {
                    return Ok(vec![range.start_ghz]);
                }
                let span = range.stop_ghz - range.start_ghz;
                Ok((0..n)
                    .map(|i| range.start_ghz + span * i as f64 / (n - 1) as f64)
                    .collect())
            }
        }
    }
}

/// A power level given as a scalar or an array of dBm values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PowerSpec {
    /// Single level in dBm.
    Scalar(f64),
    /// Sweep over multiple levels in dBm.
    List(Vec<f64>),
}

impl PowerSpec {
    /// Expand to a list of power levels in dBm.
    pub fn levels(&self) -> Vec<f64> {
        match self {
            Self::Scalar(p) => vec![*p],
            Self::List(list) => list.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rbw_mhz() -> f64 {
    0.01
}

fn default_spur_limit_dbm() -> f64 {
    -95.0
}

fn default_spur_power_dbm() -> f64 {
    -70.0
}

fn default_iterations() -> u32 {
    5
}

/// One LTE or 5G NR EVM/ACLR test entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmTestEntry {
    /// Whether to run this entry.
    #[serde(default)]
    pub run: bool,
    /// Center frequency spec in GHz.
    pub center_frequency_ghz: FrequencySpec,
    /// VSG power spec in dBm.
    pub power_dbm: PowerSpec,
    /// Whether to measure ACLR in addition to EVM.
    #[serde(default = "default_true")]
    pub measure_aclr: bool,
    /// VSG waveform file path (instrument-side).
    #[serde(default)]
    pub waveform_file: Option<String>,
    /// VSA setup recall file path (instrument-side).
    #[serde(default)]
    pub setup_file: Option<String>,
}

/// One spur search test entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpurSearchEntry {
    /// Whether to run this entry.
    #[serde(default)]
    pub run: bool,
    /// Fundamental frequency spec in GHz.
    pub fundamental_frequency_ghz: FrequencySpec,
    /// Resolution bandwidth in MHz.
    #[serde(default = "default_rbw_mhz")]
    pub rbw_mhz: f64,
    /// Detection threshold in dBm.
    #[serde(default = "default_spur_limit_dbm")]
    pub spur_limit_dbm: f64,
    /// VSG power in dBm.
    #[serde(default = "default_spur_power_dbm")]
    pub power_dbm: f64,
}

/// One sub-thermal-noise test entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StnTestEntry {
    /// Whether to run this entry.
    #[serde(default)]
    pub run: bool,
    /// Center frequency spec in GHz.
    pub center_frequency_ghz: FrequencySpec,
    /// Number of noise marker readings per frequency.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_and_list_frequencies_expand_as_given() {
        let scalar = FrequencySpec::Scalar(6.123);
        assert_eq!(scalar.expand().unwrap(), vec![6.123]);

        let list = FrequencySpec::List(vec![2.43, 2.44]);
        assert_eq!(list.expand().unwrap(), vec![2.43, 2.44]);
    }

    #[test]
    fn range_expansion_matches_linspace() {
        // (2.481 - 2.4) / 0.005 = 16.2 -> 16 steps -> 17 points
        let spec = FrequencySpec::Range {
            range: FrequencyRange {
                start_ghz: 2.4,
                stop_ghz: 2.481,
                step_mhz: 5.0,
            },
        };
        let freqs = spec.expand().unwrap();
        assert_eq!(freqs.len(), 17);
        assert!((freqs[0] - 2.4).abs() < 1e-12);
        assert!((freqs[16] - 2.481).abs() < 1e-12);
        // Evenly spaced
        let step = freqs[1] - freqs[0];
        for pair in freqs.windows(2) {
            assert!((pair[1] - pair[0] - step).abs() < 1e-12);
        }
    }

    #[test]
    fn degenerate_range_expands_to_single_point() {
        let spec = FrequencySpec::Range {
            range: FrequencyRange {
                start_ghz: 2.4,
                stop_ghz: 2.4,
                step_mhz: 5.0,
            },
        };
        assert_eq!(spec.expand().unwrap(), vec![2.4]);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let backwards = FrequencyRange {
            start_ghz: 2.5,
            stop_ghz: 2.4,
            step_mhz: 5.0,
        };
        assert!(FrequencySpec::Range { range: backwards }.expand().is_err());

        let zero_step = FrequencyRange {
            start_ghz: 2.4,
            stop_ghz: 2.5,
            step_mhz: 0.0,
        };
        assert!(FrequencySpec::Range { range: zero_step }.expand().is_err());
    }

    #[test]
    fn power_spec_expands() {
        assert_eq!(PowerSpec::Scalar(-10.0).levels(), vec![-10.0]);
        assert_eq!(
            PowerSpec::List(vec![-20.0, -16.0, -12.0]).levels(),
            vec![-20.0, -16.0, -12.0]
        );
    }

    #[test]
    fn run_flag_defaults_to_false() {
        let entry: EvmTestEntry = serde_json::from_str(
            r#"{"center_frequency_ghz": 6.2, "power_dbm": -10.0}"#,
        )
        .unwrap();
        assert!(!entry.run);
        assert!(entry.measure_aclr);
        assert!(entry.waveform_file.is_none());
    }

    #[test]
    fn spur_and_stn_defaults() {
        let spur: SpurSearchEntry =
            serde_json::from_str(r#"{"run": true, "fundamental_frequency_ghz": 2.43}"#).unwrap();
        assert!((spur.rbw_mhz - 0.01).abs() < 1e-12);
        assert!((spur.spur_limit_dbm - -95.0).abs() < 1e-12);
        assert!((spur.power_dbm - -70.0).abs() < 1e-12);

        let stn: StnTestEntry =
            serde_json::from_str(r#"{"run": true, "center_frequency_ghz": [2.4, 2.45]}"#).unwrap();
        assert_eq!(stn.iterations, 5);
    }
}
