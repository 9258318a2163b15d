//! # SSE Endpoint
//!
//! `/events` (any method) subscribes the caller to the relay's broadcaster and streams
//! `append`, `error` and `heartbeat` frames until the client goes away or the
//! process shuts down. Any other path answers with a tiny HTML page.
//!
//! The connection's [`Subscription`] and heartbeat timer live inside the body
//! stream, so when hyper drops the body both are released exactly once.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use bytes::Bytes;
use futures_util::Stream;
use tokio::net::TcpListener;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::codecs::parse_int;
use crate::core::{Broadcaster, Subscription};
use crate::stream::frame::{frame_for, HEARTBEAT_FRAME, PREAMBLE};

/// Body served on every path other than `/events`.
pub const INDEX_BODY: &str = r#"<!doctype html><html lang="en"><body>hi</body></html>"#;

/// Default time between heartbeat frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

const LAST_EVENT_ID: &str = "last-event-id";
const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// Shared by every connection of one relay.
#[derive(Clone)]
pub struct EndpointState {
    pub broadcaster: Arc<Broadcaster>,
    pub heartbeat_interval: Duration,
    pub shutdown: CancellationToken,
}

impl EndpointState {
    pub fn new(broadcaster: Arc<Broadcaster>, shutdown: CancellationToken) -> Self {
        Self { broadcaster, heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL, shutdown }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

pub fn router(state: EndpointState) -> Router {
    Router::new()
        .route("/events", any(events_handler))
        .fallback(index_handler)
        .with_state(state)
}

/// Serves `router(state)` on `listener` until the state's shutdown token
/// fires and open streams have ended.
pub async fn serve(listener: TcpListener, state: EndpointState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    log::info!(
        "Relay for {} listening on {}",
        state.broadcaster.path().display(),
        listener.local_addr()?
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            log::info!("Relay server shutting down.");
        })
        .await
}

/// Client's resume cursor from `Last-Event-ID`. Absent, unparsable or
/// negative values mean "from the start".
pub fn resume_cursor(headers: &HeaderMap) -> u64 {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_int)
        .and_then(|cursor| u64::try_from(cursor).ok())
        .unwrap_or(0)
}

async fn index_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html")], INDEX_BODY)
}

async fn events_handler(State(state): State<EndpointState>, headers: HeaderMap) -> Response {
    let resume = resume_cursor(&headers);
    let subscription = state.broadcaster.subscribe(resume).await;
    log::info!("Client {} opened an event stream from cursor {}", subscription.id(), resume);

    let stream = event_stream(subscription, state.heartbeat_interval, state.shutdown.clone());
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static(X_ACCEL_BUFFERING), "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Per-connection state carried by the body stream.
struct Connection {
    subscription: Subscription,
    heartbeat: Interval,
    shutdown: CancellationToken,
    opened: bool,
}

impl Drop for Connection {
    fn drop(&mut self) {
        log::info!("Client {} disconnected", self.subscription.id());
    }
}

/// Preamble first, then one frame per delivery or heartbeat tick. Ends on
/// shutdown.
pub(crate) fn event_stream(
    subscription: Subscription,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let connection = Connection { subscription, heartbeat, shutdown, opened: false };

    futures_util::stream::unfold(connection, |mut conn| async move {
        if !conn.opened {
            conn.opened = true;
            return Some((Ok::<_, Infallible>(Bytes::from_static(PREAMBLE.as_bytes())), conn));
        }

        let frame = tokio::select! {
            biased;
            _ = conn.shutdown.cancelled() => None,
            delivery = conn.subscription.recv() => delivery.map(|d| frame_for(&d)),
            _ = conn.heartbeat.tick() => Some(HEARTBEAT_FRAME.to_owned()),
        };

        frame.map(|frame| (Ok::<_, Infallible>(Bytes::from(frame)), conn))
    })
}
