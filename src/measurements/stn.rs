//! Sub-thermal noise (STN) measurement driver.
//!
//! Puts the analyzer into spectrum mode with the preamp on and the
//! attenuator at zero, parks a noise marker on the center frequency, and
//! reads the normalized noise level over repeated single sweeps. The VSG
//! output stays off for the whole measurement.

use crate::results::MarkerStats;
use crate::scpi::ScpiDevice;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Driver for sub-thermal noise measurements.
pub struct StnDriver {
    vsa: Arc<dyn ScpiDevice>,
    vsg: Arc<dyn ScpiDevice>,
    freq_hz: f64,
}

impl StnDriver {
    /// Create a driver and silence the VSG output.
    pub async fn new(
        vsa: Arc<dyn ScpiDevice>,
        vsg: Arc<dyn ScpiDevice>,
        freq_hz: f64,
    ) -> Result<Self> {
        if !freq_hz.is_finite() || freq_hz <= 0.0 {
            bail!("invalid frequency: {}", freq_hz);
        }
        tracing::info!("Initializing STN driver with freq={:.3}GHz", freq_hz / 1e9);
        vsg.write("OUTP:STAT OFF").await?;
        Ok(Self { vsa, vsg, freq_hz })
    }

    /// Configure the analyzer's spectrum application for the noise floor
    /// measurement and place the noise marker.
    pub async fn configure_vsa(&self) -> Result<()> {
        tracing::info!("Configuring VSA for STN");
        self.vsa.query("*RST;*OPC?").await?;
        self.vsa.query(":INST:SEL \"Spectrum\";*OPC?").await?;
        self.vsa
            .write(&format!(":SENS:FREQ:CENT {}", self.freq_hz))
            .await?;
        self.vsa.write(":SENS:FREQ:SPAN 1e9").await?;
        self.vsa.write(":INP:GAIN:STAT ON").await?;
        self.vsa.write(":INP:GAIN:VAL 30").await?;
        self.vsa.write(":INP:ATT:AUTO OFF").await?;
        self.vsa.write(":INP:ATT 0").await?;
        self.vsa.write(":SENS:SWE:WIND:POIN 2001").await?;
        self.vsa.write("DISP:WIND1:SUBW:TRAC1:MODE WRIT").await?;
        self.vsa.write(":SENS:WIND1:DET:FUNC RMS").await?;
        self.vsa.write("SENS:BAND:RES 10000").await?;
        self.vsa.write("SENS:BAND:VID 10000").await?;
        self.vsa.write("SENS:SWE:TIME:AUTO OFF").await?;
        self.vsa.write("SENS:SWE:TIME 0.005").await?;
        self.vsa.write("SENS:SWE:TYPE AUTO").await?;
        self.vsa.write(":SENS:SWE:OPT AUTO").await?;
        self.vsa
            .query("DISP:WIND1:SUBW:TRAC1:Y:SCAL:AUTO ONCE;*OPC?")
            .await?;
        self.vsa.write("SENS:POW:NCOR ON").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;
        self.vsa
            .query("DISP:WIND1:SUBW:TRAC1:Y:SCAL:AUTO ONCE;*OPC?")
            .await?;
        self.configure_noise_marker().await?;
        self.vsa.clear_error_queue().await?;
        Ok(())
    }

    async fn configure_noise_marker(&self) -> Result<()> {
        tracing::info!("Configuring noise marker for STN");
        self.vsa.write(":CALC1:DELT1:FUNC:PNO:STAT OFF").await?;
        self.vsa.write(":CALC1:MARK1:FUNC:NOIS:STAT ON").await?;
        self.vsa
            .write(&format!(":CALC1:MARK1:X {}", self.freq_hz))
            .await?;
        Ok(())
    }

    /// Run one single sweep and read the noise marker in dBm.
    pub async fn sweep_noise_marker(&self) -> Result<f64> {
        self.vsa.write("INIT:CONT OFF").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;
        let marker = self.vsa.query_f64(":CALC:MARK:FUNC:NOIS:RES?").await?;
        tracing::info!("Noise marker measured: {:.2} dBm", marker);
        Ok(marker)
    }

    /// Retune the analyzer and move the noise marker with it. Lets a
    /// single session cover multiple center frequencies.
    pub async fn set_frequency(&mut self, freq_hz: f64) -> Result<()> {
        if !freq_hz.is_finite() || freq_hz <= 0.0 {
            bail!("invalid frequency: {}", freq_hz);
        }
        tracing::info!("Setting STN frequency to {:.3}GHz", freq_hz / 1e9);
        self.freq_hz = freq_hz;
        self.vsa
            .write(&format!(":SENS:FREQ:CENT {}", freq_hz))
            .await?;
        self.vsa
            .write(&format!(":CALC1:MARK1:X {}", freq_hz))
            .await?;
        self.vsa.query("*OPC?").await?;
        Ok(())
    }

    /// Turn the VSG output off again when the test set finishes.
    pub async fn close(&self) -> Result<()> {
        self.vsg.write("OUTP:STAT OFF").await?;
        Ok(())
    }

    /// Configuration summary string for logs and the report.
    pub fn config_summary(&self) -> String {
        format!("{:.3}GHz_STN_NoiseMarker", self.freq_hz / 1e9)
    }

    /// Current center frequency in Hz.
    pub fn frequency_hz(&self) -> f64 {
        self.freq_hz
    }
}

/// Statistics over the valid noise marker readings of one run.
///
/// Uses the population standard deviation. Returns `None` for an empty
/// slice.
pub fn marker_stats(markers: &[f64]) -> Option<MarkerStats> {
    if markers.is_empty() {
        return None;
    }
    let n = markers.len() as f64;
    let avg = markers.iter().sum::<f64>() / n;
    let min = markers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = markers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = markers.iter().map(|m| (m - avg).powi(2)).sum::<f64>() / n;
    let stats = MarkerStats {
        min_dbm: min,
        max_dbm: max,
        avg_dbm: avg,
        std_dev_db: variance.sqrt(),
        delta_db: max - min,
    };
    tracing::info!("STN stats: {}", stats);
    Some(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpi::MockScpiDevice;

    async fn driver() -> (Arc<MockScpiDevice>, Arc<MockScpiDevice>, StnDriver) {
        let vsa = Arc::new(MockScpiDevice::new("VSA"));
        let vsg = Arc::new(MockScpiDevice::new("VSG"));
        let driver = StnDriver::new(
            vsa.clone() as Arc<dyn ScpiDevice>,
            vsg.clone() as Arc<dyn ScpiDevice>,
            6e9,
        )
        .await
        .unwrap();
        (vsa, vsg, driver)
    }

    #[tokio::test]
    async fn construction_silences_the_generator() {
        let (_vsa, vsg, _driver) = driver().await;
        assert_eq!(vsg.count_containing("OUTP:STAT OFF").await, 1);
    }

    #[tokio::test]
    async fn configuration_places_the_noise_marker() {
        let (vsa, _vsg, driver) = driver().await;
        driver.configure_vsa().await.unwrap();
        assert_eq!(vsa.count_containing(":INST:SEL \"Spectrum\"").await, 1);
        assert_eq!(
            vsa.count_containing(":CALC1:MARK1:FUNC:NOIS:STAT ON").await,
            1
        );
        assert_eq!(vsa.count_containing(":CALC1:MARK1:X 6000000000").await, 1);
        // Gain up, attenuation zeroed
        assert_eq!(vsa.count_containing(":INP:GAIN:VAL 30").await, 1);
        assert_eq!(vsa.count_containing(":INP:ATT 0").await, 1);
    }

    #[tokio::test]
    async fn sweeps_read_successive_marker_values() {
        let (vsa, _vsg, driver) = driver().await;
        vsa.stub(":CALC:MARK:FUNC:NOIS:RES?", "-170.4").await;
        vsa.stub(":CALC:MARK:FUNC:NOIS:RES?", "-170.1").await;

        let first = driver.sweep_noise_marker().await.unwrap();
        let second = driver.sweep_noise_marker().await.unwrap();
        assert!((first - -170.4).abs() < 1e-12);
        assert!((second - -170.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn retune_moves_center_and_marker() {
        let (vsa, _vsg, mut driver) = driver().await;
        driver.set_frequency(2.6e9).await.unwrap();
        assert_eq!(vsa.count_containing(":SENS:FREQ:CENT 2600000000").await, 1);
        assert_eq!(vsa.count_containing(":CALC1:MARK1:X 2600000000").await, 1);
        assert!((driver.frequency_hz() - 2.6e9).abs() < 1.0);
    }

    #[tokio::test]
    async fn rejects_nonpositive_frequency() {
        let (_vsa, _vsg, mut driver) = driver().await;
        assert!(driver.set_frequency(0.0).await.is_err());
        assert!(driver.set_frequency(f64::NAN).await.is_err());
    }

    #[test]
    fn stats_use_population_standard_deviation() {
        let stats = marker_stats(&[-170.0, -171.0, -172.0]).unwrap();
        assert!((stats.avg_dbm - -171.0).abs() < 1e-12);
        assert!((stats.min_dbm - -172.0).abs() < 1e-12);
        assert!((stats.max_dbm - -170.0).abs() < 1e-12);
        assert!((stats.delta_db - 2.0).abs() < 1e-12);
        // Population stddev of [-170,-171,-172] is sqrt(2/3)
        assert!((stats.std_dev_db - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn stats_of_empty_slice_are_none() {
        assert!(marker_stats(&[]).is_none());
    }
}
