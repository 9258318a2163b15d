//! # Snapshot Writer
//!
//! Writes the entity table to the display output on a fixed period while at
//! least one upstream is connected, and the unavailability sentinel once both
//! are down.
//!
//! ```text
//!            opened(any)                 failed(last open one)
//!   Idle ──────────────────► Active ─────────────────────────► Unavailable
//!     │                        ▲                                    │
//!     │ failed(both down)      └────────────── opened(any) ─────────┘
//!     └──────────────────────────────────────────────────────────► Unavailable
//! ```
//!
//! Nothing is written while `Idle`. Entering `Active` schedules a write for
//! "now"; each write schedules the next one a period after it finished.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::codecs::SourceKind;
use crate::core::aggregator::AggregatorStore;

/// Replaces the whole output while no source is reachable.
pub const UNAVAILABLE_SENTINEL: &str = "ERROR: SOURCES UNAVAILABLE";

/// Default time between two snapshot writes.
pub const DEFAULT_SNAPSHOT_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// No connection has opened yet.
    Idle,
    /// Writing snapshots; the next one is due at `next_write`.
    Active { next_write: Instant },
    /// Both sources are down and the sentinel has been written.
    Unavailable,
}

/// Owns the output file and the availability state machine.
#[derive(Debug)]
pub struct SnapshotWriter {
    output_path: PathBuf,
    period: Duration,
    state: SnapshotState,
    open: HashSet<SourceKind>,
}

impl SnapshotWriter {
    pub fn new(output_path: impl Into<PathBuf>, period: Duration) -> Self {
        Self {
            output_path: output_path.into(),
            period,
            state: SnapshotState::Idle,
            open: HashSet::new(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn is_open(&self, source: SourceKind) -> bool {
        self.open.contains(&source)
    }

    /// Records that `source` connected. Starts a write cycle at `now` unless
    /// one is already running.
    pub fn connection_opened(&mut self, source: SourceKind, now: Instant) {
        self.open.insert(source);
        if !matches!(self.state, SnapshotState::Active { .. }) {
            log::info!("{} connected, starting snapshots to {}", source, self.output_path.display());
            self.state = SnapshotState::Active { next_write: now };
        }
    }

    /// Records that `source` is down. Once no source is open the pending
    /// write is dropped and the sentinel replaces the output, on every such
    /// failure.
    pub async fn connection_failed(&mut self, source: SourceKind) {
        self.open.remove(&source);
        if !self.open.is_empty() {
            log::info!("{} down, still receiving from {:?}", source, self.open);
            return;
        }
        if self.state != SnapshotState::Unavailable {
            log::warn!("All sources unavailable, writing sentinel to {}", self.output_path.display());
        }
        self.state = SnapshotState::Unavailable;
        self.write(UNAVAILABLE_SENTINEL).await;
    }

    /// When the next snapshot is due, if a cycle is running.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SnapshotState::Active { next_write } => Some(next_write),
            _ => None,
        }
    }

    /// Writes a snapshot if one is due at `now`. Returns whether it wrote.
    pub async fn tick(&mut self, store: &AggregatorStore, now: Instant) -> bool {
        match self.state {
            SnapshotState::Active { next_write } if next_write <= now => {}
            _ => return false,
        }
        let text = Self::render(store);
        self.write(&text).await;
        self.state = SnapshotState::Active { next_write: Instant::now() + self.period };
        true
    }

    /// One line per entity with a known reflectivity, newline-joined, no
    /// trailing newline.
    pub fn render(store: &AggregatorStore) -> String {
        store
            .snapshot_view()
            .filter(|entity| entity.has_known_reflectivity())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn write(&self, contents: &str) {
        match tokio::fs::write(&self.output_path, contents).await {
            Ok(()) => log::trace!("Wrote {} bytes to {}", contents.len(), self.output_path.display()),
            Err(e) => log::error!("Failed to write {}: {}", self.output_path.display(), e),
        }
    }
}
