//! LTE EVM/ACLR measurement driver.
//!
//! Same measurement flow as the NR5G driver, using the analyzer's LTE
//! application selectors. Subcarrier spacing is fixed at 15 kHz.

use crate::measurements::waveform::{self, Standard};
use crate::results::{AclrResult, SignalProfile};
use crate::scpi::ScpiDevice;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Driver for LTE EVM and ACLR measurements.
pub struct LteDriver {
    vsa: Arc<dyn ScpiDevice>,
    vsg: Arc<dyn ScpiDevice>,
    freq_hz: f64,
    power_dbm: f64,
    waveform_file: Option<String>,
    setup_file: Option<String>,
    /// Signal parameters from the waveform file name, or LTE defaults.
    pub profile: SignalProfile,
}

impl std::fmt::Debug for LteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LteDriver")
            .field("freq_hz", &self.freq_hz)
            .field("power_dbm", &self.power_dbm)
            .field("waveform_file", &self.waveform_file)
            .field("setup_file", &self.setup_file)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl LteDriver {
    /// Create a driver. File names, when given, must follow the
    /// `LTE_<UL|DL>_<bw>MHz_<mod>_15kHz_<rb>RB_<rbo>RBO` convention.
    pub fn new(
        vsa: Arc<dyn ScpiDevice>,
        vsg: Arc<dyn ScpiDevice>,
        freq_hz: f64,
        power_dbm: f64,
        waveform_file: Option<String>,
        setup_file: Option<String>,
    ) -> Result<Self> {
        if let Some(path) = &waveform_file {
            waveform::validate_file_name(path, Standard::Lte, "wv")?;
        }
        if let Some(path) = &setup_file {
            waveform::validate_file_name(path, Standard::Lte, "dfl")?;
        }
        let profile = waveform_file
            .as_deref()
            .and_then(|p| waveform::extract_profile(p, Standard::Lte))
            .unwrap_or_else(|| Standard::Lte.default_profile());
        tracing::info!(
            "Initializing LTE driver: freq={:.3}GHz, pwr={}dBm, waveform={:?}, setup={:?}",
            freq_hz / 1e9,
            power_dbm,
            waveform_file,
            setup_file
        );
        Ok(Self {
            vsa,
            vsg,
            freq_hz,
            power_dbm,
            waveform_file,
            setup_file,
            profile,
        })
    }

    /// Configure the VSG for LTE signal generation.
    pub async fn configure_vsg(&self) -> Result<()> {
        let Some(waveform) = &self.waveform_file else {
            bail!("no waveform file provided");
        };
        let scpi_path = waveform.replace('\\', "/");
        tracing::info!("Loading waveform file: {}", scpi_path);

        self.vsg.write(":SOUR1:BB:ARB:STAT 0").await?;
        self.vsg
            .query(&format!(":SOUR1:BB:ARB:WAV:SEL \"{}\";*OPC?", scpi_path))
            .await?;
        self.vsg.query(":SOUR1:BB:ARB:STAT 1;*OPC?").await?;
        self.vsg
            .write(&format!(":SOUR1:FREQ:CW {}", self.freq_hz))
            .await?;
        self.vsg.write(":OUTP1:STAT 1").await?;
        self.vsg.query(":SOUR1:CORR:OPT:EVM 1;*OPC?").await?;
        self.vsg.write(":SOUR1:BB:ARB:TRIG:OUTP1:MODE REST").await?;
        self.set_power(self.power_dbm).await?;
        self.vsg.query("*OPC?").await?;
        tracing::info!("VSG configuration complete");
        Ok(())
    }

    /// Configure the VSA's LTE application by recalling the setup file.
    pub async fn configure_vsa(&mut self, freq_hz: f64) -> Result<()> {
        if !freq_hz.is_finite() || freq_hz <= 0.0 {
            bail!("invalid frequency: {}", freq_hz);
        }
        let Some(setup) = &self.setup_file else {
            bail!("no setup file provided");
        };
        let scpi_path = setup.replace('\\', "/");
        tracing::info!("Recalling setup file: {}", scpi_path);

        self.vsa.query("*RST;*OPC?").await?;
        self.vsa
            .query(&format!(":MMEM:LOAD:STAT 1,\"{}\";*OPC?", scpi_path))
            .await?;
        self.vsa.query(":SENS:ADJ:LEV;*OPC?").await?;
        self.vsa.query(":SENS:ADJ:EVM;*OPC?").await?;
        self.vsa.write("INIT:CONT OFF").await?;
        self.vsa
            .query(&format!(":SENS:FREQ:CENT {};*OPC?", freq_hz))
            .await?;
        self.vsa.write(":SENS:SWE:TIME 0.0008").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;
        self.vsa.query(":SENS:ADJ:EVM;*OPC?").await?;
        self.freq_hz = freq_hz;
        tracing::info!("VSA configuration complete (pre-sweep done)");
        Ok(())
    }

    /// Retune both instruments to a new center frequency.
    pub async fn set_frequency(&mut self, freq_hz: f64) -> Result<()> {
        if !freq_hz.is_finite() || freq_hz <= 0.0 {
            bail!("invalid frequency: {}", freq_hz);
        }
        tracing::info!("Setting VSA/VSG frequency to {:.3}GHz", freq_hz / 1e9);
        self.vsa
            .query(&format!(":SENS:FREQ:CENT {};*OPC?", freq_hz))
            .await?;
        self.vsg
            .query(&format!(":SOUR:FREQ:CW {};*OPC?", freq_hz))
            .await?;
        self.freq_hz = freq_hz;
        Ok(())
    }

    /// Set the VSG output power.
    pub async fn set_power(&self, power_dbm: f64) -> Result<()> {
        self.vsg
            .write(&format!(":SOUR1:POW:POW {}", power_dbm))
            .await
    }

    /// Update the stored power level (the VSG itself is set separately).
    pub fn note_power(&mut self, power_dbm: f64) {
        self.power_dbm = power_dbm;
    }

    /// Measure EVM in dB; unparseable replies yield NaN.
    pub async fn measure_evm(&self) -> Result<f64> {
        tracing::info!("Measuring EVM");
        self.vsa.write(":CONF:LTE:MEAS EVM;*OPC").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;

        let pep = self.vsg.query_f64(":SOUR1:POW:PEP?").await?;
        let ref_level = pep - 2.0;
        self.vsa
            .write(&format!(":DISP:WIND:TRAC:Y:SCAL:RLEV {}", ref_level))
            .await?;
        self.vsa.query(":SENS:ADJ:EVM;*OPC?").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;

        let reply = self.vsa.query(":FETC:SUMM:EVM:ALL:AVER?").await?;
        match reply.parse::<f64>() {
            Ok(evm) => {
                tracing::info!("EVM measured: {:.2} dB", evm);
                Ok(evm)
            }
            Err(_) => {
                tracing::warn!("failed to parse EVM value: '{}'", reply);
                Ok(f64::NAN)
            }
        }
    }

    /// Measure ACLR with two adjacent-channel pairs; a reply without
    /// exactly five values yields `None`.
    pub async fn measure_aclr(&self) -> Result<Option<AclrResult>> {
        tracing::info!("Measuring ACLR");
        self.vsa.write(":CONF:LTE:MEAS ACLR;*OPC").await?;
        self.vsa
            .write(&format!(
                ":SENS:FREQ:CENT {};:SENS:POW:ACH:ACP 2;*OPC",
                self.freq_hz
            ))
            .await?;
        self.vsa.write(":SENS:SWE:TYPE SWE").await?;
        self.vsa.write("SENS:SWE:OPT SPE").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;

        let raw = self.vsa.query(":CALC:MARK:FUNC:POW:RES? ACP").await?;
        tracing::info!("ACLR measured: {}", raw);
        let parsed = AclrResult::parse(&raw);
        if parsed.is_none() {
            tracing::warn!("ACLR reply did not carry five values: '{}'", raw);
        }
        Ok(parsed)
    }

    /// Configuration summary string for logs and the report.
    pub fn config_summary(&self) -> String {
        let p = &self.profile;
        format!(
            "{:.3}GHz_{}MHz_{}_{}_15kHz_{}RB_{}RBO_{}_waveform_{}_setup_{}",
            self.freq_hz / 1e9,
            p.channel_bandwidth_mhz,
            p.duplexing,
            p.link_direction,
            p.resource_blocks,
            p.resource_block_offset,
            p.modulation,
            self.waveform_file
                .as_deref()
                .map_or("default", waveform::basename),
            self.setup_file
                .as_deref()
                .map_or("default", waveform::basename),
        )
    }

    /// Current center frequency in Hz.
    pub fn frequency_hz(&self) -> f64 {
        self.freq_hz
    }
}
