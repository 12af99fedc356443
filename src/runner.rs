//! Campaign runner.
//!
//! Walks the test plan in a fixed order (NR5G, LTE, spur search, STN),
//! expands frequency and power specs into individual test points, and
//! produces one [`TestRecord`] per point. A failing point is recorded
//! with its error and the campaign moves on; only plan-level problems
//! abort the run.
//!
//! Consecutive EVM points that share the same waveform and setup files
//! skip instrument reconfiguration, and points at an unchanged frequency
//! skip the retune. Skipped operations are recorded with a 0.0 timing so
//! every record carries the same timing keys.

use crate::bench::BenchConnector;
use crate::config::{EvmTestEntry, SpurSearchEntry, StnTestEntry, TestPlan};
use crate::measurements::{marker_stats, LteDriver, Nr5gDriver, SpurSearchDriver, Standard, StnDriver};
use crate::results::{AclrResult, MarkerReading, SignalProfile, TestKind, TestRecord};
use crate::timing::timed;
use anyhow::Result;

/// Frequencies closer than this are treated as equal and skip the retune.
const FREQ_EPSILON_HZ: f64 = 1e-3;

/// Either EVM driver behind one call surface, so the runner walks NR5G
/// and LTE entries with the same code path.
enum EvmDriver {
    Nr5g(Nr5gDriver),
    Lte(LteDriver),
}

impl EvmDriver {
    async fn configure_vsg(&self) -> Result<()> {
        match self {
            Self::Nr5g(d) => d.configure_vsg().await,
            Self::Lte(d) => d.configure_vsg().await,
        }
    }

    async fn configure_vsa(&mut self, freq_hz: f64) -> Result<()> {
        match self {
            Self::Nr5g(d) => d.configure_vsa(freq_hz).await,
            Self::Lte(d) => d.configure_vsa(freq_hz).await,
        }
    }

    async fn set_frequency(&mut self, freq_hz: f64) -> Result<()> {
        match self {
            Self::Nr5g(d) => d.set_frequency(freq_hz).await,
            Self::Lte(d) => d.set_frequency(freq_hz).await,
        }
    }

    async fn set_power(&mut self, power_dbm: f64) -> Result<()> {
        match self {
            Self::Nr5g(d) => {
                d.set_power(power_dbm).await?;
                d.note_power(power_dbm);
            }
            Self::Lte(d) => {
                d.set_power(power_dbm).await?;
                d.note_power(power_dbm);
            }
        }
        Ok(())
    }

    async fn measure_evm(&self) -> Result<f64> {
        match self {
            Self::Nr5g(d) => d.measure_evm().await,
            Self::Lte(d) => d.measure_evm().await,
        }
    }

    async fn measure_aclr(&self) -> Result<Option<AclrResult>> {
        match self {
            Self::Nr5g(d) => d.measure_aclr().await,
            Self::Lte(d) => d.measure_aclr().await,
        }
    }

    fn config_summary(&self) -> String {
        match self {
            Self::Nr5g(d) => d.config_summary(),
            Self::Lte(d) => d.config_summary(),
        }
    }

    fn profile(&self) -> &SignalProfile {
        match self {
            Self::Nr5g(d) => &d.profile,
            Self::Lte(d) => &d.profile,
        }
    }
}

/// Runs a test plan against a bench and collects the records.
pub struct Campaign {
    plan: TestPlan,
    records: Vec<TestRecord>,
    next_test_set: u32,
    // Reconfiguration cache across EVM points
    last_files: Option<(Option<String>, Option<String>)>,
    last_freq_hz: Option<f64>,
}

impl Campaign {
    /// Create a campaign for a test plan.
    pub fn new(plan: TestPlan) -> Self {
        Self {
            plan,
            records: Vec::new(),
            next_test_set: 1,
            last_files: None,
            last_freq_hz: None,
        }
    }

    /// Run the whole plan and return the collected records.
    pub async fn run(mut self, bench: &dyn BenchConnector) -> Vec<TestRecord> {
        let plan = std::mem::take(&mut self.plan);

        for entry in &plan.nr5g {
            if entry.run {
                self.run_evm_entry(bench, entry, Standard::Nr5g).await;
            }
        }
        for entry in &plan.lte {
            if entry.run {
                self.run_evm_entry(bench, entry, Standard::Lte).await;
            }
        }
        for entry in &plan.spur_search {
            if entry.run {
                self.run_spur_entry(bench, entry).await;
            }
        }
        for entry in &plan.stn {
            if entry.run {
                self.run_stn_entry(bench, entry).await;
            }
        }

        tracing::info!("Campaign complete: {} test sets recorded", self.records.len());
        self.records
    }

    fn next_record(&mut self, kind: TestKind) -> TestRecord {
        let record = TestRecord::new(self.next_test_set, kind);
        self.next_test_set += 1;
        record
    }

    fn push_failed(&mut self, kind: TestKind, err: &anyhow::Error) {
        tracing::error!("{} test set failed: {:#}", kind, err);
        let mut record = self.next_record(kind);
        record.error = Some(format!("{:#}", err));
        self.records.push(record);
    }

    async fn run_evm_entry(
        &mut self,
        bench: &dyn BenchConnector,
        entry: &EvmTestEntry,
        standard: Standard,
    ) {
        let kind = match standard {
            Standard::Nr5g => TestKind::Nr5g,
            Standard::Lte => TestKind::Lte,
        };
        let freqs_ghz = match entry.center_frequency_ghz.expand() {
            Ok(f) => f,
            Err(e) => {
                self.push_failed(kind, &anyhow::Error::new(e));
                return;
            }
        };
        let powers = entry.power_dbm.levels();
        if freqs_ghz.is_empty() || powers.is_empty() {
            tracing::warn!("{} entry expands to no test points, skipping", kind);
            return;
        }

        let (vsa, vsg) = match tokio::try_join!(bench.connect_vsa(), bench.connect_vsg()) {
            Ok(pair) => pair,
            Err(e) => {
                self.push_failed(kind, &e);
                return;
            }
        };

        let first_freq_hz = freqs_ghz[0] * 1e9;
        let built = match standard {
            Standard::Nr5g => Nr5gDriver::new(
                vsa,
                vsg,
                first_freq_hz,
                powers[0],
                entry.waveform_file.clone(),
                entry.setup_file.clone(),
            )
            .map(EvmDriver::Nr5g),
            Standard::Lte => LteDriver::new(
                vsa,
                vsg,
                first_freq_hz,
                powers[0],
                entry.waveform_file.clone(),
                entry.setup_file.clone(),
            )
            .map(EvmDriver::Lte),
        };
        let mut driver = match built {
            Ok(d) => d,
            Err(e) => {
                self.push_failed(kind, &e);
                return;
            }
        };

        let files = (entry.waveform_file.clone(), entry.setup_file.clone());
        let mut config_times = (0.0, 0.0);
        if self.last_files.as_ref() != Some(&files) {
            let (result, vsg_time) = timed(driver.configure_vsg()).await;
            if let Err(e) = result {
                self.invalidate_cache();
                self.push_failed(kind, &e);
                return;
            }
            let (result, vsa_time) = timed(driver.configure_vsa(first_freq_hz)).await;
            if let Err(e) = result {
                self.invalidate_cache();
                self.push_failed(kind, &e);
                return;
            }
            config_times = (vsg_time, vsa_time);
            self.last_files = Some(files);
            self.last_freq_hz = Some(first_freq_hz);
        } else {
            tracing::info!("{} configuration unchanged, skipping instrument setup", kind);
        }

        for (point, &freq_ghz) in freqs_ghz.iter().enumerate() {
            let freq_hz = freq_ghz * 1e9;
            for (level, &power_dbm) in powers.iter().enumerate() {
                let mut record = self.next_record(kind);
                record.center_frequency_hz = Some(freq_hz);
                record.power_dbm = Some(power_dbm);
                record.signal = Some(driver.profile().clone());
                record.waveform_file = entry.waveform_file.clone();
                record.setup_file = entry.setup_file.clone();
                // Configuration time belongs to the first point only
                if point == 0 && level == 0 {
                    record.timings.insert("vsg_config".into(), config_times.0);
                    record.timings.insert("vsa_config".into(), config_times.1);
                } else {
                    record.timings.insert("vsg_config".into(), 0.0);
                    record.timings.insert("vsa_config".into(), 0.0);
                }

                if let Err(e) = self
                    .measure_evm_point(&mut driver, entry, freq_hz, power_dbm, &mut record)
                    .await
                {
                    tracing::error!("{} point failed: {:#}", kind, e);
                    record.error = Some(format!("{:#}", e));
                    self.invalidate_cache();
                }
                let (summary, secs) = timed(async { driver.config_summary() }).await;
                record.timings.insert("vsa_get_info".into(), secs);
                record.config = summary;
                self.records.push(record);
            }
        }
    }

    async fn measure_evm_point(
        &mut self,
        driver: &mut EvmDriver,
        entry: &EvmTestEntry,
        freq_hz: f64,
        power_dbm: f64,
        record: &mut TestRecord,
    ) -> Result<()> {
        let retune = match self.last_freq_hz {
            Some(last) => (last - freq_hz).abs() > FREQ_EPSILON_HZ,
            None => true,
        };
        if retune {
            let (result, secs) = timed(driver.set_frequency(freq_hz)).await;
            result?;
            record.timings.insert("set_frequency".into(), secs);
            self.last_freq_hz = Some(freq_hz);
        } else {
            record.timings.insert("set_frequency".into(), 0.0);
        }

        driver.set_power(power_dbm).await?;

        let (evm, secs) = timed(driver.measure_evm()).await;
        record.timings.insert("evm".into(), secs);
        record.evm_db = Some(evm?);

        if entry.measure_aclr {
            let (aclr, secs) = timed(driver.measure_aclr()).await;
            record.timings.insert("aclr".into(), secs);
            record.aclr = aclr?;
        }
        Ok(())
    }

    async fn run_spur_entry(&mut self, bench: &dyn BenchConnector, entry: &SpurSearchEntry) {
        let freqs_ghz = match entry.fundamental_frequency_ghz.expand() {
            Ok(f) => f,
            Err(e) => {
                tracing::error!("spur search entry has an invalid frequency spec, skipping: {e}");
                return;
            }
        };

        // Spur search reprograms the VSG, so later EVM points must reconfigure
        self.invalidate_cache();

        let (vsa, vsg) = match tokio::try_join!(bench.connect_vsa(), bench.connect_vsg()) {
            Ok(pair) => pair,
            Err(e) => {
                self.push_failed(TestKind::SpurSearch, &e);
                return;
            }
        };

        for &freq_ghz in &freqs_ghz {
            let driver = SpurSearchDriver::new(
                vsa.clone(),
                vsg.clone(),
                freq_ghz,
                entry.rbw_mhz,
                entry.spur_limit_dbm,
                entry.power_dbm,
            );
            let mut record = self.next_record(TestKind::SpurSearch);
            record.fundamental_frequency_hz = Some(freq_ghz * 1e9);
            record.rbw_hz = Some(entry.rbw_mhz * 1e6);
            record.spur_limit_dbm = Some(entry.spur_limit_dbm);
            record.power_dbm = Some(entry.power_dbm);
            record.config = driver.config_summary();

            if let Err(e) = Self::measure_spur_point(&driver, &mut record).await {
                tracing::error!("spur search point failed: {:#}", e);
                record.error = Some(format!("{:#}", e));
            }
            if let Err(e) = driver.close().await {
                tracing::warn!("failed to turn VSG output off: {:#}", e);
            }
            self.records.push(record);
        }
    }

    async fn measure_spur_point(driver: &SpurSearchDriver, record: &mut TestRecord) -> Result<()> {
        let (result, secs) = timed(driver.configure_vsg()).await;
        record.timings.insert("vsg_config".into(), secs);
        result?;

        let (result, secs) = timed(driver.configure_vsa()).await;
        record.timings.insert("vsa_config".into(), secs);
        result?;

        let (result, secs) = timed(driver.run_sweep()).await;
        record.timings.insert("measure".into(), secs);
        result?;

        let (spurs, secs) = timed(driver.fetch_spurs()).await;
        record.timings.insert("get_results".into(), secs);
        record.spurs = spurs?;
        if record.spurs.is_empty() {
            record.error = Some("No spurs detected".to_string());
        }
        Ok(())
    }

    async fn run_stn_entry(&mut self, bench: &dyn BenchConnector, entry: &StnTestEntry) {
        let freqs_ghz = match entry.center_frequency_ghz.expand() {
            Ok(f) => f,
            Err(e) => {
                tracing::error!("STN entry has an invalid frequency spec, skipping: {e}");
                return;
            }
        };
        if freqs_ghz.is_empty() {
            return;
        }

        // The STN setup silences the VSG, invalidating any EVM configuration
        self.invalidate_cache();

        let (vsa, vsg) = match tokio::try_join!(bench.connect_vsa(), bench.connect_vsg()) {
            Ok(pair) => pair,
            Err(e) => {
                self.push_failed(TestKind::Stn, &e);
                return;
            }
        };

        let mut driver = match StnDriver::new(vsa, vsg, freqs_ghz[0] * 1e9).await {
            Ok(d) => d,
            Err(e) => {
                self.push_failed(TestKind::Stn, &e);
                return;
            }
        };

        // One analyzer configuration covers every frequency of the entry;
        // subsequent points only retune.
        for (point, &freq_ghz) in freqs_ghz.iter().enumerate() {
            let freq_hz = freq_ghz * 1e9;
            let mut record = self.next_record(TestKind::Stn);
            record.center_frequency_hz = Some(freq_hz);
            record.iterations = Some(entry.iterations);

            let setup = if point == 0 {
                let (result, secs) = timed(driver.configure_vsa()).await;
                record.timings.insert("vsa_config".into(), secs);
                record.timings.insert("set_frequency".into(), 0.0);
                result
            } else {
                let (result, secs) = timed(driver.set_frequency(freq_hz)).await;
                record.timings.insert("set_frequency".into(), secs);
                record.timings.insert("vsa_config".into(), 0.0);
                result
            };
            if let Err(e) = setup {
                tracing::error!("STN point failed: {:#}", e);
                record.error = Some(format!("{:#}", e));
                record.config = driver.config_summary();
                self.records.push(record);
                continue;
            }

            for i in 1..=entry.iterations {
                let (result, secs) = timed(driver.sweep_noise_marker()).await;
                record.timings.insert(format!("noise_marker_{}", i), secs);
                match result {
                    Ok(marker) => record.markers.push(MarkerReading {
                        marker_dbm: Some(marker),
                        meas_time_s: secs,
                    }),
                    Err(e) => {
                        tracing::warn!("noise marker iteration {} failed: {:#}", i, e);
                        record.markers.push(MarkerReading {
                            marker_dbm: None,
                            meas_time_s: secs,
                        });
                    }
                }
            }

            let valid: Vec<f64> = record.markers.iter().filter_map(|m| m.marker_dbm).collect();
            record.stats = marker_stats(&valid);
            if valid.len() < record.markers.len() {
                record.error = Some(format!(
                    "{} of {} noise marker readings failed",
                    record.markers.len() - valid.len(),
                    record.markers.len()
                ));
            }
            record.total_test_time_s = Some(record.timings.values().sum());
            record.config = driver.config_summary();
            self.records.push(record);
        }

        if let Err(e) = driver.close().await {
            tracing::warn!("failed to turn VSG output off: {:#}", e);
        }
    }

    fn invalidate_cache(&mut self) {
        self.last_files = None;
        self.last_freq_hz = None;
    }
}
