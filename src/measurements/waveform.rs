//! Waveform and setup file-name handling.
//!
//! VSG waveform files (`.wv`) and VSA setup recall files (`.dfl`) encode
//! the signal parameters in their file names, e.g.
//! `5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.wv`. Drivers validate the names
//! at construction and derive the signal profile from them.

use crate::results::SignalProfile;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static FILE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(
        r"^(5GNR|LTE)_(UL|DL)_(\d+)MHz_(QPSK|16QAM|64QAM|256QAM|1024QAM)_(\d+)kHz_(\d+)RB_(\d+)RBO\.(wv|dfl)$",
    )
    .expect("file name pattern is valid")
});

/// The signal standard a driver measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standard {
    /// 5G NR FR1.
    Nr5g,
    /// LTE.
    Lte,
}

impl Standard {
    fn prefix(self) -> &'static str {
        match self {
            Self::Nr5g => "5GNR",
            Self::Lte => "LTE",
        }
    }

    /// Per-standard fallback signal profile, used when no waveform file is
    /// given or its name cannot be parsed.
    pub fn default_profile(self) -> SignalProfile {
        match self {
            Self::Nr5g => SignalProfile {
                resource_blocks: 51,
                resource_block_offset: 0,
                channel_bandwidth_mhz: 20,
                modulation: "256QAM".to_string(),
                subcarrier_spacing_khz: 30,
                duplexing: "FDD".to_string(),
                link_direction: "UL".to_string(),
            },
            Self::Lte => SignalProfile {
                resource_blocks: 100,
                resource_block_offset: 0,
                channel_bandwidth_mhz: 20,
                modulation: "256QAM".to_string(),
                subcarrier_spacing_khz: 15,
                duplexing: "FDD".to_string(),
                link_direction: "UL".to_string(),
            },
        }
    }
}

/// Last path component, splitting on both `/` and `\` since the
/// instrument-side paths may use either convention.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Validate a waveform (`.wv`) or setup (`.dfl`) file name for a standard.
pub fn validate_file_name(path: &str, standard: Standard, extension: &str) -> Result<()> {
    let name = basename(path).trim();
    let caps = match FILE_NAME_RE.captures(name) {
        Some(caps) => caps,
        None => bail!("invalid {} file name: {}", extension, name),
    };
    if &caps[1] != standard.prefix() {
        bail!(
            "file name '{}' is for {} but the driver measures {}",
            name,
            &caps[1],
            standard.prefix()
        );
    }
    if &caps[8] != extension {
        bail!("expected a .{} file, got: {}", extension, name);
    }
    Ok(())
}

/// Extract the signal profile from a waveform file name.
///
/// Duplexing is derived from the link direction: UL waveforms are FDD,
/// DL waveforms are TDD. Returns `None` when the name does not match the
/// pattern; callers fall back to the standard's defaults.
pub fn extract_profile(path: &str, standard: Standard) -> Option<SignalProfile> {
    let name = basename(path).trim();
    let caps = FILE_NAME_RE.captures(name)?;
    if &caps[1] != standard.prefix() {
        return None;
    }
    let link_direction = caps[2].to_string();
    let duplexing = if link_direction == "UL" { "FDD" } else { "TDD" };
    let scs: u32 = caps[5].parse().ok()?;
    Some(SignalProfile {
        resource_blocks: caps[6].parse().ok()?,
        resource_block_offset: caps[7].parse().ok()?,
        channel_bandwidth_mhz: caps[3].parse().ok()?,
        modulation: caps[4].to_string(),
        subcarrier_spacing_khz: match standard {
            // LTE subcarrier spacing is fixed regardless of the file name
            Standard::Lte => 15,
            Standard::Nr5g => scs,
        },
        duplexing: duplexing.to_string(),
        link_direction,
    })
}
