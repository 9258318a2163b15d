//! # Test Harness
//!
//! Helpers shared by the cross-component tests: start a relay on an
//! ephemeral port, read its event stream, and poll output files.

use anyhow::{Context, Result, bail};
use lib_relay::SourceKind;
use lib_relay::core::DetectorKind;
use lib_relay::ingestors::{SseEvent, SseParser};
use servers::relay_logic::config::RelaySettings;
use servers::relay_logic::relay;
use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long any single wait in a test may take.
pub const WAIT: Duration = Duration::from_secs(5);

/// A relay running inside the test process.
pub struct RelayUnderTest {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl RelayUnderTest {
    /// Starts a relay for `hardware_path` on an ephemeral local port.
    pub async fn start(source: SourceKind, hardware_path: &Path, detector: DetectorKind) -> Result<Self> {
        Self::start_on("127.0.0.1:0".parse()?, source, hardware_path, detector).await
    }

    /// Starts a relay on a fixed address, e.g. to bring one back after `stop`.
    pub async fn start_on(addr: SocketAddr, source: SourceKind, hardware_path: &Path, detector: DetectorKind) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.with_context(|| format!("bind {}", addr))?;
        let addr = listener.local_addr()?;
        let settings = RelaySettings {
            source,
            port: addr.port(),
            hardware_path: hardware_path.to_path_buf(),
            detector,
            poll_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(200),
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
        };
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { relay::run(&settings, listener, token).await });
        Ok(Self { addr, shutdown, handle })
    }

    pub fn events_url(&self) -> String {
        format!("http://{}/events", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Cancels the relay and waits for it to drain.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.handle).await.context("relay did not stop")??
    }
}

/// Reads an SSE response event by event.
pub struct SseReader {
    response: reqwest::Response,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    /// Everything received so far, verbatim.
    pub raw: String,
}

impl SseReader {
    pub async fn open(url: &str, last_event_id: Option<&str>) -> Result<Self> {
        let mut request = reqwest::Client::new().get(url);
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(Self { response, parser: SseParser::new(), pending: VecDeque::new(), raw: String::new() })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Next event of any type.
    pub async fn next_event(&mut self) -> Result<SseEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            let chunk = match tokio::time::timeout(WAIT, self.response.chunk()).await {
                Ok(chunk) => chunk?,
                Err(_) => bail!("no event within {:?}", WAIT),
            };
            let Some(chunk) = chunk else {
                bail!("stream ended");
            };
            self.raw.push_str(&String::from_utf8_lossy(&chunk));
            self.pending.extend(self.parser.feed(&chunk));
        }
    }

    /// Next event that is not a heartbeat.
    pub async fn next_data_event(&mut self) -> Result<SseEvent> {
        loop {
            let event = self.next_event().await?;
            if event.event != "heartbeat" {
                return Ok(event);
            }
        }
    }
}

/// Appends raw bytes to a sensor file, creating it if needed.
pub fn append_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data)?;
    Ok(())
}

/// Polls `path` until its contents equal `expected`.
pub async fn wait_for_contents(path: &Path, expected: &str) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    let mut last = None;
    while tokio::time::Instant::now() < deadline {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) if contents == expected => return Ok(()),
            Ok(contents) => last = Some(contents),
            Err(_) => {}
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("{} never became {:?} (last seen {:?})", path.display(), expected, last)
}

/// An address nothing listens on.
pub async fn unused_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?)
}
