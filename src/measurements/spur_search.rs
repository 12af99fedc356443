//! Spur search measurement driver.
//!
//! Configures the analyzer's peak-list marker over a wide span around the
//! fundamental (fo/2 up to 2·fo), excites the device with a multicarrier
//! ARB signal from the VSG, and collects every peak above the spur limit.
//! Peaks within ±10 MHz of the fundamental are excluded from the results.

use crate::results::Spur;
use crate::scpi::ScpiDevice;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Exclusion window around the fundamental when filtering peaks.
const FUNDAMENTAL_EXCLUSION_HZ: f64 = 10e6;

/// Driver for spur search measurements.
pub struct SpurSearchDriver {
    vsa: Arc<dyn ScpiDevice>,
    vsg: Arc<dyn ScpiDevice>,
    fundamental_ghz: f64,
    rbw_mhz: f64,
    spur_limit_dbm: f64,
    power_dbm: f64,
}

impl SpurSearchDriver {
    /// Create a driver for one fundamental frequency.
    pub fn new(
        vsa: Arc<dyn ScpiDevice>,
        vsg: Arc<dyn ScpiDevice>,
        fundamental_ghz: f64,
        rbw_mhz: f64,
        spur_limit_dbm: f64,
        power_dbm: f64,
    ) -> Self {
        tracing::info!(
            "SpurSearch initialized: fundamental={} GHz, RBW={} MHz, limit={} dBm, power={} dBm",
            fundamental_ghz,
            rbw_mhz,
            spur_limit_dbm,
            power_dbm
        );
        Self {
            vsa,
            vsg,
            fundamental_ghz,
            rbw_mhz,
            spur_limit_dbm,
            power_dbm,
        }
    }

    /// Configure the VSG: CW at the fundamental plus a four-carrier
    /// multicarrier ARB used to exercise the device under test.
    pub async fn configure_vsg(&self) -> Result<()> {
        let frequency_hz = self.fundamental_ghz * 1e9;

        self.vsg.query("*RST;*OPC?").await?;
        self.vsg
            .write(&format!("SOUR:FREQ:CW {:.0}", frequency_hz))
            .await?;
        self.vsg
            .write(&format!("SOUR:POW:LEV:IMM:AMPL {:.2}", self.power_dbm))
            .await?;

        self.vsg
            .write("SOURce1:BB:ARBitrary:MCARrier:CARRier1:MODE ARB")
            .await?;
        self.vsg
            .write("SOURce1:BB:ARBitrary:MCARrier:CARRier1:COUNt 4")
            .await?;
        let carriers = [
            (1, -1_000_000_000i64, -45),
            (2, -500_000_000, -20),
            (3, 600_000_000, -25),
            (4, 1_000_000_000, -50),
        ];
        for (idx, offset_hz, level_dbm) in carriers {
            self.vsg
                .write(&format!(
                    "SOURce1:BB:ARBitrary:MCARrier:CARRier{}:FREQuency {}",
                    idx, offset_hz
                ))
                .await?;
            self.vsg
                .write(&format!(
                    "SOURce1:BB:ARBitrary:MCARrier:CARRier{}:POWer {}",
                    idx, level_dbm
                ))
                .await?;
            self.vsg
                .write(&format!(
                    "SOURce1:BB:ARBitrary:MCARrier:CARRier{}:STATe 1",
                    idx
                ))
                .await?;
        }
        self.vsg
            .query("SOURce1:BB:ARBitrary:MCARrier:CLOad;*OPC?")
            .await?;
        self.vsg
            .write("SOURce1:BB:ARBitrary:TRIGger:OUTPut1:MODE REST")
            .await?;
        self.vsg.write("SOURce1:BB:ARBitrary:STATe 1").await?;
        self.vsg.write("OUTPut1:STATe 1").await?;

        tracing::info!(
            "VSG set: frequency={:.3} GHz, power={:.2} dBm",
            self.fundamental_ghz,
            self.power_dbm
        );
        Ok(())
    }

    /// Configure the analyzer for the spur sweep: averaged RMS trace over
    /// fo/2 → fo−1 MHz with marker search limits extending to 2·fo, and a
    /// peak-list marker thresholded at the spur limit.
    pub async fn configure_vsa(&self) -> Result<()> {
        let fundamental_hz = self.fundamental_ghz * 1e9;
        let start_freq = fundamental_hz / 2.0;
        let stop_display = fundamental_hz - 1e6;
        let stop_search = 2.0 * fundamental_hz;

        self.vsa.query("*RST;*OPC?").await?;
        tracing::info!("VSA reset for spur search");

        self.vsa.write("INIT:CONT OFF").await?;
        self.vsa
            .write(&format!("SENS:FREQ:STAR {:.0}", start_freq))
            .await?;
        self.vsa
            .write(&format!("SENS:FREQ:STOP {:.0}", stop_display))
            .await?;
        self.vsa.write(":DISP:WIND1:SUBW:TRAC1:MODE AVER").await?;
        self.vsa.write(":SENS:AVER:COUN 5").await?;
        self.vsa.write(":SENS:WIND1:DET1:FUNC RMS").await?;
        self.vsa.write(":SENS:LIST:RANG1:FILT:TYPE NORM").await?;
        self.vsa
            .write(&format!(":SENS:BAND:RES {}", self.rbw_mhz * 1e6))
            .await?;
        self.vsa.write(":SENS:SWE:TIME:AUTO ON").await?;
        self.vsa.write("SENS:SWE:TYPE FFT").await?;
        self.vsa.write("SENS:SWE:OPT SPE").await?;
        self.vsa.write("SENS:SWE:WIND1:POIN 100001").await?;
        self.vsa.write("DISP:WIND1:TRAC:Y:SCAL:RLEV -30").await?;
        self.vsa.write("SENS:INP:ATT:AUTO OFF").await?;
        self.vsa.write(":INP:ATT 0").await?;
        self.vsa.write("INP:GAIN:STAT ON").await?;
        self.vsa.write("INP:GAIN:VAL 30").await?;
        self.vsa.write("SENS:POW:NCOR ON").await?;
        self.vsa.write("CALC1:MARK1:FUNC:FPE:STAT ON").await?;
        self.vsa
            .write(&format!("CALC1:MARK1:X:SLIM:LEFT {}", start_freq))
            .await?;
        self.vsa
            .write(&format!("CALC1:MARK1:X:SLIM:RIGH {}", stop_search))
            .await?;
        self.vsa
            .write(&format!("CALC1:THR {}", self.spur_limit_dbm))
            .await?;
        self.vsa.write("CALC1:MARK1:X:SLIM:STAT ON").await?;
        self.vsa.write("CALC1:THR:STAT ON").await?;

        tracing::info!(
            "Spur detection configured, range {:.3}-{:.3} GHz",
            start_freq / 1e9,
            stop_display / 1e9
        );
        Ok(())
    }

    /// Run the single measurement sweep.
    pub async fn run_sweep(&self) -> Result<()> {
        self.vsa.write(":INIT:CONT OFF").await?;
        self.vsa.query("INIT:IMM;*OPC?").await?;
        tracing::info!("Spur search sweep completed");
        Ok(())
    }

    /// Fetch the peak list and filter out the fundamental.
    ///
    /// A mismatch between the reported count and the list lengths logs a
    /// warning and yields an empty list rather than an error.
    pub async fn fetch_spurs(&self) -> Result<Vec<Spur>> {
        let count: usize = self
            .vsa
            .query(":CALC:MARK:FUNC:FPE:COUN?")
            .await?
            .trim()
            .parse()
            .context("failed to parse peak count")?;
        if count == 0 {
            tracing::info!("No peaks above threshold");
            return Ok(Vec::new());
        }

        self.vsa
            .write("DISP:WIND1:SUBW:TRAC1:Y:SCAL:AUTO ONCE")
            .await?;
        let freq_reply = self.vsa.query(":CALC:MARK:FUNC:FPE:X?").await?;
        let power_reply = self.vsa.query(":CALC:MARK:FUNC:FPE:Y?").await?;

        let freqs = parse_float_list(&freq_reply);
        let powers = parse_float_list(&power_reply);
        if freqs.len() != count || powers.len() != count {
            tracing::warn!(
                "mismatch in spur data: expected {} peaks, got {} frequencies and {} powers",
                count,
                freqs.len(),
                powers.len()
            );
            return Ok(Vec::new());
        }

        let fundamental_hz = self.fundamental_ghz * 1e9;
        let mut spurs = Vec::new();
        for (i, (freq_hz, power_dbm)) in freqs.into_iter().zip(powers).enumerate() {
            if (freq_hz - fundamental_hz).abs() > FUNDAMENTAL_EXCLUSION_HZ {
                tracing::info!(
                    "Spur {}: {:.6} GHz, {:.2} dBm",
                    i + 1,
                    freq_hz / 1e9,
                    power_dbm
                );
                spurs.push(Spur {
                    frequency_hz: freq_hz,
                    power_dbm,
                });
            } else {
                tracing::debug!(
                    "excluding peak at {:.6} GHz (near fundamental {:.3} GHz)",
                    freq_hz / 1e9,
                    self.fundamental_ghz
                );
            }
        }
        if spurs.is_empty() {
            tracing::info!("No spurs detected after filtering");
        }
        Ok(spurs)
    }

    /// Turn the VSG output off at the end of the test set.
    pub async fn close(&self) -> Result<()> {
        self.vsg.write("OUTP:STAT OFF").await?;
        Ok(())
    }

    /// Configuration summary string for logs and the report.
    pub fn config_summary(&self) -> String {
        format!(
            "{:.3}GHz_Spur_RBW{:.3}MHz_Limit{:.2}dBm",
            self.fundamental_ghz, self.rbw_mhz, self.spur_limit_dbm
        )
    }
}

fn parse_float_list(raw: &str) -> Vec<f64> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpi::MockScpiDevice;

    fn driver() -> (Arc<MockScpiDevice>, Arc<MockScpiDevice>, SpurSearchDriver) {
        let vsa = Arc::new(MockScpiDevice::new("VSA"));
        let vsg = Arc::new(MockScpiDevice::new("VSG"));
        let driver = SpurSearchDriver::new(
            vsa.clone() as Arc<dyn ScpiDevice>,
            vsg.clone() as Arc<dyn ScpiDevice>,
            2.43,
            0.02,
            -122.0,
            -70.0,
        );
        (vsa, vsg, driver)
    }

    #[tokio::test]
    async fn excludes_peaks_near_the_fundamental() {
        let (vsa, _vsg, driver) = driver();
        vsa.stub(":CALC:MARK:FUNC:FPE:COUN?", "3").await;
        // 2.43 GHz is the fundamental; 2.435 GHz is inside the ±10 MHz window
        vsa.stub(":CALC:MARK:FUNC:FPE:X?", "1215000000,2435000000,4860000000")
            .await;
        vsa.stub(":CALC:MARK:FUNC:FPE:Y?", "-120.5,-80.2,-118.9").await;

        let spurs = driver.fetch_spurs().await.unwrap();
        assert_eq!(spurs.len(), 2);
        assert!((spurs[0].frequency_hz - 1.215e9).abs() < 1.0);
        assert!((spurs[1].frequency_hz - 4.86e9).abs() < 1.0);
    }

    #[tokio::test]
    async fn count_mismatch_yields_empty_list() {
        let (vsa, _vsg, driver) = driver();
        vsa.stub(":CALC:MARK:FUNC:FPE:COUN?", "3").await;
        vsa.stub(":CALC:MARK:FUNC:FPE:X?", "1215000000,4860000000")
            .await;
        vsa.stub(":CALC:MARK:FUNC:FPE:Y?", "-120.5,-118.9").await;

        let spurs = driver.fetch_spurs().await.unwrap();
        assert!(spurs.is_empty());
    }

    #[tokio::test]
    async fn zero_peaks_short_circuits() {
        let (vsa, _vsg, driver) = driver();
        vsa.stub(":CALC:MARK:FUNC:FPE:COUN?", "0").await;

        let spurs = driver.fetch_spurs().await.unwrap();
        assert!(spurs.is_empty());
        // No X/Y fetch was attempted
        assert_eq!(vsa.count_containing("FPE:X?").await, 0);
    }

    #[tokio::test]
    async fn vsa_configuration_covers_the_search_span() {
        let (vsa, _vsg, driver) = driver();
        driver.configure_vsa().await.unwrap();
        // fo/2 = 1.215 GHz, search limit 2*fo = 4.86 GHz
        assert_eq!(vsa.count_containing("SENS:FREQ:STAR 1215000000").await, 1);
        assert_eq!(
            vsa.count_containing("CALC1:MARK1:X:SLIM:RIGH 4860000000").await,
            1
        );
        assert_eq!(vsa.count_containing("CALC1:THR -122").await, 1);
    }

    #[tokio::test]
    async fn close_turns_the_generator_off() {
        let (_vsa, vsg, driver) = driver();
        driver.close().await.unwrap();
        assert_eq!(vsg.count_containing("OUTP:STAT OFF").await, 1);
    }

    #[test]
    fn summary_format() {
        let (_vsa, _vsg, driver) = driver();
        assert_eq!(
            driver.config_summary(),
            "2.430GHz_Spur_RBW0.020MHz_Limit-122.00dBm"
        );
    }
}
