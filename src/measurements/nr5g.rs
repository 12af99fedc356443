//! 5G NR FR1 EVM/ACLR measurement driver.
//!
//! Drives the VSG to play an ARB waveform and the VSA's NR5G application
//! to measure EVM and ACLR. The exact SCPI sequences target Rohde &
//! Schwarz style analyzers/generators; responses are plain text.

use crate::measurements::waveform::{self, Standard};
use crate::results::{AclrResult, SignalProfile};
use crate::scpi::ScpiDevice;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Driver for 5G NR EVM and ACLR measurements.
pub struct Nr5gDriver {
    vsa: Arc<dyn ScpiDevice>,
    vsg: Arc<dyn ScpiDevice>,
    freq_hz: f64,
    power_dbm: f64,
    waveform_file: Option<String>,
    setup_file: Option<String>,
    /// Signal parameters from the waveform file name, or NR5G defaults.
    pub profile: SignalProfile,
}

impl std::fmt::Debug for Nr5gDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nr5gDriver")
            .field("freq_hz", &self.freq_hz)
            .field("power_dbm", &self.power_dbm)
            .field("waveform_file", &self.waveform_file)
            .field("setup_file", &self.setup_file)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl Nr5gDriver {
    /// Create a driver. File names, when given, must follow the
    /// `5GNR_<UL|DL>_<bw>MHz_<mod>_<scs>kHz_<rb>RB_<rbo>RBO` convention.
    pub fn new(
        vsa: Arc<dyn ScpiDevice>,
        vsg: Arc<dyn ScpiDevice>,
        freq_hz: f64,
        power_dbm: f64,
        waveform_file: Option<String>,
        setup_file: Option<String>,
    ) -> Result<Self> {
        if let Some(path) = &waveform_file {
            waveform::validate_file_name(path, Standard::Nr5g, "wv")?;
        }
        if let Some(path) = &setup_file {
            waveform::validate_file_name(path, Standard::Nr5g, "dfl")?;
        }
        let profile = waveform_file
            .as_deref()
            .and_then(|p| waveform::extract_profile(p, Standard::Nr5g))
            .unwrap_or_else(|| Standard::Nr5g.default_profile());
        tracing::info!(
            "Initializing NR5G driver: freq={:.3}GHz, pwr={}dBm, waveform={:?}, setup={:?}",
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

    /// Configure the VSG for NR5G signal generation: load the ARB
    /// waveform, enable the output, and apply the current power level.
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

    /// Configure the VSA for NR5G measurement by recalling the setup file,
    /// auto-adjusting level and EVM, and priming a first sweep.
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
        self.vsa.write(":SENS:NR5G:FRAM:SLOT 1").await?;
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

    /// Measure EVM in dB.
    ///
    /// The VSA reference level is set 2 dB below the VSG peak envelope
    /// power before the measurement sweep. An unparseable reply yields
    /// NaN rather than an error so a single flaky fetch does not abort
    /// the sweep.
    pub async fn measure_evm(&self) -> Result<f64> {
        tracing::info!("Measuring EVM");
        self.vsa.write(":CONF:NR5G:MEAS EVM;*OPC").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;

        let pep = self.vsg.query_f64(":SOUR1:POW:PEP?").await?;
        let ref_level = pep - 2.0;
        self.vsa
            .write(&format!(":DISP:WIND:TRAC:Y:SCAL:RLEV {}", ref_level))
            .await?;
        self.vsa.query(":SENS:ADJ:EVM;*OPC?").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;

        let reply = self.vsa.query(":FETC:CC1:SUMM:EVM:ALL:AVER?").await?;
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

    /// Measure ACLR with two adjacent-channel pairs.
    ///
    /// Returns `None` when the reply does not carry exactly five values.
    pub async fn measure_aclr(&self) -> Result<Option<AclrResult>> {
        tracing::info!("Measuring ACLR");
        self.vsa.write(":CONF:NR5G:MEAS ACLR;*OPC").await?;
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
            "{:.3}GHz_{}MHz_{}_{}_{}_{}RB_{}RBO_{}_waveform_{}_setup_{}",
            self.freq_hz / 1e9,
            p.channel_bandwidth_mhz,
            p.duplexing,
            p.link_direction,
            p.subcarrier_spacing_khz,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpi::MockScpiDevice;

    fn mocks() -> (Arc<MockScpiDevice>, Arc<MockScpiDevice>) {
        (
            Arc::new(MockScpiDevice::new("VSA")),
            Arc::new(MockScpiDevice::new("VSG")),
        )
    }

    fn driver(vsa: &Arc<MockScpiDevice>, vsg: &Arc<MockScpiDevice>) -> Nr5gDriver {
        Nr5gDriver::new(
            vsa.clone() as Arc<dyn ScpiDevice>,
            vsg.clone() as Arc<dyn ScpiDevice>,
            6.123e9,
            -10.0,
            Some("/var/user/5GNR/5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.wv".to_string()),
            Some("C:/r_s/instr/user/5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.dfl".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_waveform_name() {
        let (vsa, vsg) = mocks();
        let err = Nr5gDriver::new(
            vsa as Arc<dyn ScpiDevice>,
            vsg as Arc<dyn ScpiDevice>,
            6e9,
            -10.0,
            Some("random.wv".to_string()),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid wv file name"));
    }

    #[test]
    fn profile_comes_from_waveform_name() {
        let (vsa, vsg) = mocks();
        let driver = driver(&vsa, &vsg);
        assert_eq!(driver.profile.channel_bandwidth_mhz, 10);
        assert_eq!(driver.profile.resource_blocks, 24);
        assert_eq!(driver.profile.subcarrier_spacing_khz, 30);
    }

    #[tokio::test]
    async fn vsg_configuration_loads_the_waveform() {
        let (vsa, vsg) = mocks();
        let driver = driver(&vsa, &vsg);
        driver.configure_vsg().await.unwrap();

        let log = vsg.log().await;
        assert!(log
            .iter()
            .any(|c| c.contains(":SOUR1:BB:ARB:WAV:SEL \"/var/user/5GNR/5GNR_UL_10MHz")));
        assert!(log.iter().any(|c| c == ":OUTP1:STAT 1"));
        assert!(log.iter().any(|c| c == ":SOUR1:POW:POW -10"));
    }

    #[tokio::test]
    async fn vsa_configuration_requires_positive_frequency() {
        let (vsa, vsg) = mocks();
        let mut driver = driver(&vsa, &vsg);
        assert!(driver.configure_vsa(-1.0).await.is_err());
        assert!(driver.configure_vsa(f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn evm_sets_reference_level_from_pep() {
        let (vsa, vsg) = mocks();
        let driver = driver(&vsa, &vsg);
        vsg.stub(":SOUR1:POW:PEP?", "-6.5").await;
        vsa.stub(":FETC:CC1:SUMM:EVM:ALL:AVER?", "-43.71").await;

        let evm = driver.measure_evm().await.unwrap();
        assert!((evm - -43.71).abs() < 1e-12);
        assert_eq!(
            vsa.count_containing(":DISP:WIND:TRAC:Y:SCAL:RLEV -8.5").await,
            1
        );
    }

    #[tokio::test]
    async fn unparseable_evm_yields_nan() {
        let (vsa, vsg) = mocks();
        let driver = driver(&vsa, &vsg);
        vsg.stub(":SOUR1:POW:PEP?", "-6.5").await;
        vsa.stub(":FETC:CC1:SUMM:EVM:ALL:AVER?", "****").await;

        let evm = driver.measure_evm().await.unwrap();
        assert!(evm.is_nan());
    }

    #[tokio::test]
    async fn malformed_aclr_reply_is_tolerated() {
        let (vsa, vsg) = mocks();
        let driver = driver(&vsa, &vsg);
        vsa.stub(":CALC:MARK:FUNC:POW:RES? ACP", "-9.93,-55.0").await;

        let aclr = driver.measure_aclr().await.unwrap();
        assert!(aclr.is_none());
    }

    #[test]
    fn config_summary_contains_the_signal_parameters() {
        let (vsa, vsg) = mocks();
        let driver = driver(&vsa, &vsg);
        let summary = driver.config_summary();
        assert!(summary.starts_with("6.123GHz_10MHz_FDD_UL_30_24RB_0RBO_256QAM"));
        assert!(summary.contains("waveform_5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.wv"));
        assert!(summary.contains("setup_5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.dfl"));
    }
}
