//! Bench configuration and instrument connections.
//!
//! The bench consists of a Vector Signal Analyzer (VSA) and a Vector
//! Signal Generator (VSG), both reachable over SCPI on TCP port 5025.
//! Their addresses come from `config/bench_config.ini`:
//!
//! ```ini
//! [Settings]
//! VSA_IP = 192.168.200.10
//! VSG_IP = 192.168.200.20
//! ```
//!
//! The runner connects through the [`BenchConnector`] trait so tests can
//! substitute mock devices for the real TCP sessions.

use crate::error::{BenchError, BenchResult};
use crate::scpi::{MockScpiDevice, ScpiClient, ScpiDevice, SCPI_PORT};
use anyhow::Result;
use async_trait::async_trait;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Query timeout for measurement sessions; sweeps can take a while.
const MEASUREMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Instrument addresses from the `[Settings]` section of the bench INI.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchConfig {
    /// VSA hostname or IP address.
    #[serde(alias = "VSA_IP", alias = "vsa_ip")]
    pub vsa_ip: String,
    /// VSG hostname or IP address.
    #[serde(alias = "VSG_IP", alias = "vsg_ip")]
    pub vsg_ip: String,
}

impl BenchConfig {
    /// Load and validate the bench configuration from an INI file.
    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BenchError::Configuration(format!(
                "configuration file '{}' not found",
                path.display()
            )));
        }
        let raw = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()?;
        let cfg: Self = raw.get("settings").map_err(|e| {
            BenchError::Configuration(format!(
                "'{}' is missing a valid [Settings] section: {}",
                path.display(),
                e
            ))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> BenchResult<()> {
        if self.vsa_ip.trim().is_empty() {
            return Err(BenchError::Configuration("VSA_IP must not be empty".into()));
        }
        if self.vsg_ip.trim().is_empty() {
            return Err(BenchError::Configuration("VSG_IP must not be empty".into()));
        }
        Ok(())
    }
}

/// Source of instrument sessions for the runner.
#[async_trait]
pub trait BenchConnector: Send + Sync {
    /// Open a session to the VSA.
    async fn connect_vsa(&self) -> Result<Arc<dyn ScpiDevice>>;
    /// Open a session to the VSG.
    async fn connect_vsg(&self) -> Result<Arc<dyn ScpiDevice>>;
}

/// The real bench: opens TCP SCPI sessions to the configured addresses.
pub struct Bench {
    config: BenchConfig,
}

impl Bench {
    /// Create a bench from its configuration.
    pub fn new(config: BenchConfig) -> Self {
        Self { config }
    }

    /// Connect to both instruments and return their identities.
    pub async fn verify(&self) -> Result<(String, String)> {
        let vsa = self.connect_vsa().await?;
        let vsg = self.connect_vsg().await?;
        Ok((vsa.identity().to_string(), vsg.identity().to_string()))
    }
}

#[async_trait]
impl BenchConnector for Bench {
    async fn connect_vsa(&self) -> Result<Arc<dyn ScpiDevice>> {
        let mut client = ScpiClient::connect(&self.config.vsa_ip, SCPI_PORT).await?;
        client.set_timeout(MEASUREMENT_TIMEOUT);
        Ok(Arc::new(client))
    }

    async fn connect_vsg(&self) -> Result<Arc<dyn ScpiDevice>> {
        let mut client = ScpiClient::connect(&self.config.vsg_ip, SCPI_PORT).await?;
        client.set_timeout(MEASUREMENT_TIMEOUT);
        Ok(Arc::new(client))
    }
}

/// Bench connector that hands out shared mock devices, for tests.
pub struct MockBench {
    /// The mock VSA.
    pub vsa: Arc<MockScpiDevice>,
    /// The mock VSG.
    pub vsg: Arc<MockScpiDevice>,
}

impl Default for MockBench {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBench {
    /// Create a mock bench with fresh VSA/VSG mocks.
    pub fn new() -> Self {
        Self {
            vsa: Arc::new(MockScpiDevice::new("MockVSA")),
            vsg: Arc::new(MockScpiDevice::new("MockVSG")),
        }
    }
}

#[async_trait]
impl BenchConnector for MockBench {
    async fn connect_vsa(&self) -> Result<Arc<dyn ScpiDevice>> {
        Ok(self.vsa.clone())
    }

    async fn connect_vsg(&self) -> Result<Arc<dyn ScpiDevice>> {
        Ok(self.vsg.clone())
    }
}
