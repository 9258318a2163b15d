//! # Upstream Client
//!
//! Reconnecting SSE consumer of one relay. Every connection attempt ends in
//! exactly one of:
//!
//! - `Opened`, then any number of `Append`s, then `Failed` when the stream
//!   drops, errors or goes silent;
//! - `Failed` straight away when the connect fails or the relay answers
//!   with a non-2xx status.
//!
//! After a failure the client waits `reconnect_delay` and tries again,
//! sending `Last-Event-ID` with the last id it saw so the relay resumes from
//! there.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codecs::SourceKind;
use crate::core::UpstreamEvent;
use crate::error::UpstreamError;
use crate::ingestors::sse_parser::{SseEvent, SseParser};

/// Configuration for one upstream stream.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// This much silence, heartbeats included, means the connection is dead.
    /// Must exceed the relay's heartbeat interval.
    pub silence_timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(5),
            silence_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_silence_timeout(mut self, timeout: Duration) -> Self {
        self.silence_timeout = timeout;
        self
    }
}

pub struct UpstreamClient {
    source: SourceKind,
    config: UpstreamConfig,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    last_event_id: Option<String>,
}

impl UpstreamClient {
    pub fn new(source: SourceKind, config: UpstreamConfig, events: mpsc::UnboundedSender<UpstreamEvent>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to a default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { source, config, http, events, last_event_id: None }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Primary execution loop with reconnection logic.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            log::info!("Connecting to {} relay at {}", self.source, self.config.url);

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.session() => outcome,
            };
            let reason = match outcome {
                Ok(()) => "stream closed by relay".to_owned(),
                Err(e) => e.to_string(),
            };
            log::warn!(
                "{} relay unavailable ({}). Retrying in {}ms...",
                self.source,
                reason,
                self.config.reconnect_delay.as_millis()
            );
            if self.events.send(UpstreamEvent::Failed(self.source, reason)).is_err() {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
        log::info!("{} upstream client stopped", self.source);
    }

    /// One connection, from request to end of stream.
    async fn session(&mut self) -> Result<(), UpstreamError> {
        let mut request = self
            .http
            .get(&self.config.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &self.last_event_id {
            request = request.header("Last-Event-ID", id.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        log::info!("Connected to {} relay (resume id {:?})", self.source, self.last_event_id);
        self.emit(UpstreamEvent::Opened(self.source));

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut parser = SseParser::new();
        loop {
            let chunk = match tokio::time::timeout(self.config.silence_timeout, body.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => return Ok(()),
                Err(_) => return Err(UpstreamError::Silent(self.config.silence_timeout)),
            };
            for event in parser.feed(&chunk) {
                self.handle_event(event);
            }
        }
    }

    fn handle_event(&mut self, event: SseEvent) {
        match event.event.as_str() {
            "append" => {
                if event.id.is_some() {
                    self.last_event_id = event.id;
                }
                match self.source.parse_batch(&event.data) {
                    Ok(records) => self.emit(UpstreamEvent::Append(self.source, records)),
                    Err(e) => log::warn!("Discarding malformed {} batch: {}", self.source, e),
                }
            }
            "heartbeat" => log::trace!("{} heartbeat", self.source),
            // The relay is still connected; only the read behind it failed.
            "error" => log::warn!("{} relay reported an error: {}", self.source, event.data),
            other => log::debug!("Ignoring '{}' event from {} relay", other, self.source),
        }
    }

    fn emit(&self, event: UpstreamEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Display coordinator is gone, dropping {} event", self.source);
        }
    }
}

// The canned relays below are axum servers.
#[cfg(all(test, feature = "stream"))]
mod tests {
    use super::*;
    use axum::{body::Body, http::HeaderMap, routing::get, Router};
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    const FRAMES: &str = "\nid: 19\nevent: append\ndata: [{\"x\":100,\"y\":100,\"z\":0,\"dx\":0,\"dy\":0,\"dz\":0,\"reflectivity\":50}]\n\nevent: error\ndata: \"boom\"\n\n";

    async fn recv(rx: &mut mpsc::UnboundedReceiver<UpstreamEvent>) -> UpstreamEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event in time")
            .expect("channel closed")
    }

    /// Serves FRAMES once per request and records each request's resume id.
    async fn canned_relay(seen: Arc<Mutex<Vec<Option<String>>>>) -> String {
        let app = Router::new().route(
            "/events",
            get(move |headers: HeaderMap| {
                let seen = seen.clone();
                async move {
                    let id = headers
                        .get("last-event-id")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    seen.lock().unwrap().push(id);
                    FRAMES
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/events", addr)
    }

    #[tokio::test]
    async fn test_reports_open_append_and_resumes_with_last_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = canned_relay(seen.clone()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = UpstreamConfig::new(url).with_reconnect_delay(Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(UpstreamClient::new(SourceKind::Radar, config, tx).run(shutdown.clone()));

        assert!(matches!(recv(&mut rx).await, UpstreamEvent::Opened(SourceKind::Radar)));
        match recv(&mut rx).await {
            UpstreamEvent::Append(SourceKind::Radar, records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].position().key(), "100:100:0");
            }
            other => panic!("expected append, got {:?}", other),
        }
        // The canned body ends, which counts as a failure; the error frame did not.
        assert!(matches!(recv(&mut rx).await, UpstreamEvent::Failed(SourceKind::Radar, _)));
        assert!(matches!(recv(&mut rx).await, UpstreamEvent::Opened(SourceKind::Radar)));

        shutdown.cancel();
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1].as_deref(), Some("19"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_failure() {
        let app = Router::new().route("/events", get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = UpstreamConfig::new(format!("http://{}/events", addr)).with_reconnect_delay(Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(UpstreamClient::new(SourceKind::Rt, config, tx).run(shutdown.clone()));

        match recv(&mut rx).await {
            UpstreamEvent::Failed(SourceKind::Rt, reason) => assert!(reason.contains("503"), "{}", reason),
            other => panic!("expected failure, got {:?}", other),
        }
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_relay_keeps_retrying() {
        // Bind then drop to get a port nobody listens on.
        let addr = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = UpstreamConfig::new(format!("http://{}/events", addr)).with_reconnect_delay(Duration::from_millis(10));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(UpstreamClient::new(SourceKind::Rt, config, tx).run(shutdown.clone()));

        for _ in 0..2 {
            assert!(matches!(recv(&mut rx).await, UpstreamEvent::Failed(SourceKind::Rt, _)));
        }
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_silence_timeout_drops_quiet_streams_only() {
        // One relay goes quiet after the preamble, the other heartbeats every 50ms.
        let app = Router::new()
            .route(
                "/quiet",
                get(|| async {
                    let body = futures_util::stream::once(async { Ok::<_, Infallible>("\n") })
                        .chain(futures_util::stream::pending());
                    Body::from_stream(body)
                }),
            )
            .route(
                "/beating",
                get(|| async {
                    let body = futures_util::stream::unfold((), |()| async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Some((Ok::<_, Infallible>("event: heartbeat\ndata: heartbeat\n\n"), ()))
                    });
                    Body::from_stream(body)
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        let shutdown = CancellationToken::new();

        let (tx, mut quiet_rx) = mpsc::unbounded_channel();
        let config = UpstreamConfig::new(format!("http://{}/quiet", addr))
            .with_reconnect_delay(Duration::from_secs(60))
            .with_silence_timeout(Duration::from_millis(100));
        assert_eq!(config.silence_timeout, Duration::from_millis(100));
        let quiet = tokio::spawn(UpstreamClient::new(SourceKind::Radar, config, tx).run(shutdown.clone()));

        let (tx, mut beating_rx) = mpsc::unbounded_channel();
        let config = UpstreamConfig::new(format!("http://{}/beating", addr))
            .with_reconnect_delay(Duration::from_secs(60))
            .with_silence_timeout(Duration::from_millis(400));
        let beating = tokio::spawn(UpstreamClient::new(SourceKind::Rt, config, tx).run(shutdown.clone()));

        assert!(matches!(recv(&mut quiet_rx).await, UpstreamEvent::Opened(SourceKind::Radar)));
        match recv(&mut quiet_rx).await {
            UpstreamEvent::Failed(SourceKind::Radar, reason) => assert!(reason.contains("no data"), "{}", reason),
            other => panic!("expected failure, got {:?}", other),
        }

        assert!(matches!(recv(&mut beating_rx).await, UpstreamEvent::Opened(SourceKind::Rt)));
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(beating_rx.try_recv().is_err());

        shutdown.cancel();
        quiet.await.unwrap();
        beating.await.unwrap();
    }
}
