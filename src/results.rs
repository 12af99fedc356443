//! Result records for a measurement campaign.
//!
//! Every attempted test set produces one [`TestRecord`], whether it
//! succeeded or not. Records are flat, with the fields that do not apply
//! to a given test type left unset, mirroring the row layout of the
//! "Test Data" output sheet.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which measurement produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestKind {
    /// 5G NR EVM/ACLR.
    #[serde(rename = "NR5G")]
    Nr5g,
    /// LTE EVM/ACLR.
    #[serde(rename = "LTE")]
    Lte,
    /// Spur search.
    SpurSearch,
    /// Sub-thermal noise.
    #[serde(rename = "STN")]
    Stn,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nr5g => "NR5G",
            Self::Lte => "LTE",
            Self::SpurSearch => "SpurSearch",
            Self::Stn => "STN",
        };
        f.write_str(name)
    }
}

/// A detected spur.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spur {
    /// Spur frequency in Hz.
    pub frequency_hz: f64,
    /// Spur power in dBm.
    pub power_dbm: f64,
}

/// One noise-marker reading of an STN run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerReading {
    /// Marker level in dBm; `None` when the iteration failed.
    pub marker_dbm: Option<f64>,
    /// Time the reading took in seconds.
    pub meas_time_s: f64,
}

/// Aggregate statistics over the valid markers of an STN run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerStats {
    /// Minimum marker level in dBm.
    pub min_dbm: f64,
    /// Maximum marker level in dBm.
    pub max_dbm: f64,
    /// Mean marker level in dBm.
    pub avg_dbm: f64,
    /// Population standard deviation in dB.
    pub std_dev_db: f64,
    /// Max minus min in dB.
    pub delta_db: f64,
}

impl fmt::Display for MarkerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Min:{:.3} Max:{:.3} Avg:{:.3} StdDev:{:.3} Delta:{:.3}",
            self.min_dbm, self.max_dbm, self.avg_dbm, self.std_dev_db, self.delta_db
        )
    }
}

/// Parsed ACLR reply: channel power plus the four adjacent/alternate
/// channel leakage values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AclrResult {
    /// Channel power in dBm.
    pub channel_power_dbm: f64,
    /// Adjacent channel power, lower side, in dB.
    pub acp_lower_db: f64,
    /// Adjacent channel power, upper side, in dB.
    pub acp_upper_db: f64,
    /// Alternate channel power, lower side, in dB.
    pub alt_lower_db: f64,
    /// Alternate channel power, upper side, in dB.
    pub alt_upper_db: f64,
}

impl AclrResult {
    /// Parse the instrument reply to `:CALC:MARK:FUNC:POW:RES? ACP`.
    ///
    /// The reply must be exactly five comma-separated floats; anything
    /// else yields `None` and the ACLR columns stay empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        if parts.len() != 5 {
            return None;
        }
        Some(Self {
            channel_power_dbm: parts[0],
            acp_lower_db: parts[1],
            acp_upper_db: parts[2],
            alt_lower_db: parts[3],
            alt_upper_db: parts[4],
        })
    }
}

/// Signal parameters of an EVM/ACLR test, either parsed from the waveform
/// file name or the per-standard defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalProfile {
    /// Occupied resource blocks.
    pub resource_blocks: u32,
    /// Resource block offset.
    pub resource_block_offset: u32,
    /// Channel bandwidth in MHz.
    pub channel_bandwidth_mhz: u32,
    /// Modulation name, e.g. `256QAM`.
    pub modulation: String,
    /// Subcarrier spacing in kHz (always 15 for LTE).
    pub subcarrier_spacing_khz: u32,
    /// `FDD` or `TDD`.
    pub duplexing: String,
    /// `UL` or `DL`.
    pub link_direction: String,
}

/// One test set's worth of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    /// Sequential test set number, starting at 1.
    pub test_set: u32,
    /// Measurement type.
    #[serde(rename = "type")]
    pub kind: TestKind,

    /// Center frequency in Hz (EVM/ACLR and STN tests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center_frequency_hz: Option<f64>,
    /// VSG power in dBm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_dbm: Option<f64>,

    /// Signal parameters (EVM/ACLR tests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalProfile>,
    /// Waveform file used, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform_file: Option<String>,
    /// Setup file used, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_file: Option<String>,
    /// Measured EVM in dB; NaN when the reply was unparseable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm_db: Option<f64>,
    /// Measured ACLR values, when requested and parseable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aclr: Option<AclrResult>,

    /// Fundamental frequency in Hz (spur search).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fundamental_frequency_hz: Option<f64>,
    /// Resolution bandwidth in Hz (spur search).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rbw_hz: Option<f64>,
    /// Spur detection threshold in dBm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spur_limit_dbm: Option<f64>,
    /// Detected spurs, fundamental excluded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spurs: Vec<Spur>,

    /// Requested iterations (STN).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    /// Per-iteration noise marker readings (STN).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<MarkerReading>,
    /// Marker statistics, when at least one reading succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<MarkerStats>,
    /// Total test time in seconds (STN).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_test_time_s: Option<f64>,

    /// Human-readable configuration summary.
    pub config: String,
    /// Per-operation timings in seconds.
    pub timings: BTreeMap<String, f64>,
    /// Failure description, when the test set did not complete cleanly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestRecord {
    /// Create an empty record for a test set.
    pub fn new(test_set: u32, kind: TestKind) -> Self {
        Self {
            test_set,
            kind,
            center_frequency_hz: None,
            power_dbm: None,
            signal: None,
            waveform_file: None,
            setup_file: None,
            evm_db: None,
            aclr: None,
            fundamental_frequency_hz: None,
            rbw_hz: None,
            spur_limit_dbm: None,
            spurs: Vec::new(),
            iterations: None,
            markers: Vec::new(),
            stats: None,
            total_test_time_s: None,
            config: String::new(),
            timings: BTreeMap::new(),
            error: None,
        }
    }

    /// Sum of all timings except the VSG/VSA configuration entries.
    pub fn measurement_time_s(&self) -> f64 {
        self.timings
            .iter()
            .filter(|(k, _)| k.as_str() != "vsg_config" && k.as_str() != "vsa_config")
            .map(|(_, t)| t)
            .sum()
    }

    /// Combined VSG + VSA configuration time.
    pub fn setup_time_s(&self) -> f64 {
        self.timings.get("vsg_config").copied().unwrap_or(0.0)
            + self.timings.get("vsa_config").copied().unwrap_or(0.0)
    }
}
