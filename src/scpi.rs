//! SCPI over TCP communication.
//!
//! This module provides an async SCPI client for talking to the bench
//! instruments over raw TCP sockets. It handles connection management,
//! command/query operations, and response parsing. Commands are plain
//! newline-terminated SCPI text; instruments listen on port 5025.
//!
//! Measurement drivers do not depend on [`ScpiClient`] directly but on the
//! [`ScpiDevice`] trait, which allows a [`MockScpiDevice`] to be injected
//! for testing without hardware.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Standard SCPI port used by both the VSA and the VSG.
pub const SCPI_PORT: u16 = 5025;

/// Timeout applied to the TCP connect itself.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default query-response timeout. Measurement paths that involve long
/// sweeps raise this to 30 s.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A SCPI command/query endpoint.
///
/// Implemented by [`ScpiClient`] for real instruments and by
/// [`MockScpiDevice`] for tests.
#[async_trait]
pub trait ScpiDevice: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and read one line of response, trimmed.
    async fn query(&self, command: &str) -> Result<String>;

    /// Send a query and parse the response as `f64`.
    async fn query_f64(&self, command: &str) -> Result<f64> {
        let response = self.query(command).await?;
        response.parse::<f64>().with_context(|| {
            format!(
                "failed to parse '{}' as f64 from query: {}",
                response, command
            )
        })
    }

    /// Drain the instrument error queue (`:SYST:ERR?`), discarding the reply.
    async fn clear_error_queue(&self) -> Result<()> {
        self.query(":SYST:ERR?").await?;
        Ok(())
    }

    /// Cached `*IDN?` response, if known.
    fn identity(&self) -> &str {
        "Unknown"
    }
}

/// Async SCPI client over a TCP socket.
pub struct ScpiClient {
    stream: Mutex<BufReader<TcpStream>>,
    timeout: Duration,
    peer: String,
    idn: String,
}

impl ScpiClient {
    /// Connect to an instrument and query its identity.
    ///
    /// # Arguments
    /// * `host` - Hostname or IP address
    /// * `port` - TCP port (5025 for SCPI)
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let peer = format!("{}:{}", host, port);

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .with_context(|| format!("connection timeout to {}", peer))?
            .with_context(|| format!("failed to connect to {}", peer))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream: Mutex::new(BufReader::new(stream)),
            timeout: DEFAULT_TIMEOUT,
            peer,
            idn: String::new(),
        };

        let idn = client
            .query("*IDN?")
            .await
            .with_context(|| format!("instrument at {} did not answer *IDN?", client.peer))?;
        tracing::info!("Connected to {} ({})", client.peer, idn);
        client.idn = idn;

        Ok(client)
    }

    /// Set the query-response timeout.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    async fn send(&self, stream: &mut BufReader<TcpStream>, command: &str) -> Result<()> {
        let line = format!("{}\n", command);
        stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to write command: {}", command))?;
        stream
            .get_mut()
            .flush()
            .await
            .context("failed to flush stream")?;
        Ok(())
    }
}

#[async_trait]
impl ScpiDevice for ScpiClient {
    async fn write(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;
        tracing::debug!(peer = %self.peer, "SCPI write: {}", command);
        self.send(&mut stream, command).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;
        tracing::debug!(peer = %self.peer, "SCPI query: {}", command);
        self.send(&mut stream, command).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => anyhow::bail!("connection closed by {} during: {}", self.peer, command),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!(peer = %self.peer, "SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e).with_context(|| format!("failed to read response to: {}", command)),
            Err(_) => anyhow::bail!("timeout waiting for response to: {}", command),
        }
    }

    fn identity(&self) -> &str {
        &self.idn
    }
}

/// Mock SCPI device for testing without hardware.
///
/// Queries are served from scripted responses registered with
/// [`MockScpiDevice::stub`]. When more than one response is queued for a
/// query they are consumed in order; the last one is sticky. Unscripted
/// `*OPC?`-style synchronization queries answer `"1"` and `:SYST:ERR?`
/// answers an empty error queue, so drivers only need to script the
/// measurement-result queries. Every write and query is recorded for
/// assertion.
pub struct MockScpiDevice {
    name: String,
    written: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MockScpiDevice {
    /// Create a mock device; `name` is returned as the identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            written: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a scripted response for a query.
    pub async fn stub(&self, query: impl Into<String>, response: impl Into<String>) {
        self.responses
            .lock()
            .await
            .entry(query.into())
            .or_default()
            .push_back(response.into());
    }

    /// Snapshot of every command sent so far (writes and queries).
    pub async fn log(&self) -> Vec<String> {
        self.written.lock().await.clone()
    }

    /// Number of logged commands containing `needle`.
    pub async fn count_containing(&self, needle: &str) -> usize {
        self.written
            .lock()
            .await
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }
}

#[async_trait]
impl ScpiDevice for MockScpiDevice {
    async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!("mock {} write: {}", self.name, command);
        self.written.lock().await.push(command.to_string());
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        tracing::debug!("mock {} query: {}", self.name, command);
        self.written.lock().await.push(command.to_string());

        let mut responses = self.responses.lock().await;
        if let Some(queue) = responses.get_mut(command) {
            if queue.len() > 1 {
                if let Some(front) = queue.pop_front() {
                    return Ok(front);
                }
            }
            if let Some(front) = queue.front() {
                return Ok(front.clone());
            }
        }

        if command == "*IDN?" {
            return Ok(self.name.clone());
        }
        if command.ends_with("*OPC?") {
            return Ok("1".to_string());
        }
        if command == ":SYST:ERR?" {
            return Ok("0,\"No error\"".to_string());
        }
        anyhow::bail!("unscripted mock query: {}", command)
    }

    fn identity(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_serves_scripted_responses_in_order() {
        let dev = MockScpiDevice::new("VSA");
        dev.stub(":CALC:MARK:FUNC:NOIS:RES?", "-170.1").await;
        dev.stub(":CALC:MARK:FUNC:NOIS:RES?", "-170.4").await;

        let first = dev.query(":CALC:MARK:FUNC:NOIS:RES?").await.unwrap();
        let second = dev.query(":CALC:MARK:FUNC:NOIS:RES?").await.unwrap();
        // Last response is sticky
        let third = dev.query(":CALC:MARK:FUNC:NOIS:RES?").await.unwrap();

        assert_eq!(first, "-170.1");
        assert_eq!(second, "-170.4");
        assert_eq!(third, "-170.4");
    }

    #[tokio::test]
    async fn mock_answers_synchronization_queries() {
        let dev = MockScpiDevice::new("VSG");
        assert_eq!(dev.query("*OPC?").await.unwrap(), "1");
        assert_eq!(dev.query("INIT:IMM;*OPC?").await.unwrap(), "1");
        assert_eq!(dev.query("*IDN?").await.unwrap(), "VSG");
        dev.clear_error_queue().await.unwrap();
    }

    #[tokio::test]
    async fn mock_rejects_unscripted_measurement_queries() {
        let dev = MockScpiDevice::new("VSA");
        assert!(dev.query(":FETC:CC1:SUMM:EVM:ALL:AVER?").await.is_err());
    }

    #[tokio::test]
    async fn mock_records_writes_and_queries() {
        let dev = MockScpiDevice::new("VSG");
        dev.write(":OUTP1:STAT 1").await.unwrap();
        dev.query("*OPC?").await.unwrap();
        let log = dev.log().await;
        assert_eq!(log, vec![":OUTP1:STAT 1", "*OPC?"]);
        assert_eq!(dev.count_containing("OUTP1").await, 1);
    }

    #[tokio::test]
    async fn query_f64_parses_and_reports_garbage() {
        let dev = MockScpiDevice::new("VSG");
        dev.stub(":SOUR1:POW:PEP?", "-6.2").await;
        dev.stub(":SOUR1:POW:PEP?", "garbage").await;

        assert!((dev.query_f64(":SOUR1:POW:PEP?").await.unwrap() - -6.2).abs() < 1e-12);
        let err = dev.query_f64(":SOUR1:POW:PEP?").await.unwrap_err();
        assert!(err.to_string().contains("garbage"));
    }

    #[tokio::test]
    async fn client_query_round_trip_over_tcp() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let reply = match line.trim() {
                    "*IDN?" => "Rohde&Schwarz,FSW-26,100001,5.30\n",
                    ":SENS:FREQ:CENT?" => "6123000000\n",
                    _ => continue, // plain writes get no reply
                };
                reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let client = ScpiClient::connect(&addr.ip().to_string(), addr.port())
            .await
            .unwrap();
        assert!(client.identity().contains("FSW-26"));

        client.write(":SENS:FREQ:CENT 6123000000").await.unwrap();
        let freq = client.query_f64(":SENS:FREQ:CENT?").await.unwrap();
        assert!((freq - 6.123e9).abs() < 1.0);

        drop(client);
        server.abort();
    }
}
