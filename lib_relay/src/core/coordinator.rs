//! Display-side event loop.
//!
//! One task owns the [`AggregatorStore`] and the [`SnapshotWriter`]; the
//! upstream clients only talk to it through [`UpstreamEvent`]s, so neither
//! needs a lock.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codecs::{Record, SourceKind};
use crate::core::aggregator::AggregatorStore;
use crate::core::snapshot::SnapshotWriter;

/// What an upstream client reports.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// The stream is open.
    Opened(SourceKind),
    /// An `append` batch arrived.
    Append(SourceKind, Vec<Record>),
    /// The connection failed or dropped; the client will retry.
    Failed(SourceKind, String),
}

pub struct DisplayCoordinator {
    store: AggregatorStore,
    writer: SnapshotWriter,
}

impl DisplayCoordinator {
    pub fn new(writer: SnapshotWriter) -> Self {
        Self { store: AggregatorStore::new(), writer }
    }

    pub fn store(&self) -> &AggregatorStore {
        &self.store
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    /// Applies one upstream event.
    pub async fn handle(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Opened(source) => self.writer.connection_opened(source, Instant::now()),
            UpstreamEvent::Append(source, records) => {
                log::debug!("Merging {} {} records", records.len(), source);
                self.store.apply(source, &records);
            }
            UpstreamEvent::Failed(source, reason) => {
                log::warn!("{} stream failed: {}", source, reason);
                self.writer.connection_failed(source).await;
            }
        }
    }

    /// Runs until `shutdown` fires or every sender is gone, then hands the
    /// coordinator back.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<UpstreamEvent>, shutdown: CancellationToken) -> Self {
        loop {
            let deadline = self.writer.next_deadline();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = wait_until(deadline) => {
                    self.writer.tick(&self.store, Instant::now()).await;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        log::info!("Display coordinator stopped ({} entities)", self.store.len());
        self
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
