//! # Change Detection
//!
//! A detector observes one file and sends a [`Change`] every time it sees the
//! file's size or modification time move. Two strategies are available:
//!
//! - **Polling** ([`PollingDetector`]): a self-scheduling loop that stats the
//!   file on a fixed interval and compares against the last stamp it saw. The
//!   first successful stat always counts as a change.
//! - **Watch** ([`WatchDetector`]): OS notifications on the file's parent
//!   directory via `notify`. A "ready" change fires right after the watch is
//!   installed. If the watcher cannot be created the detector degrades to
//!   polling instead of giving up.
//!
//! Both deliver at least once per append. Duplicates are expected and cheap:
//! the broadcaster treats an empty delta as a no-op. A missing or unreadable
//! file is logged and skipped, never fatal.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The file went from `previous_size` to `current_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub previous_size: u64,
    pub current_size: u64,
}

impl Change {
    /// Number of bytes appended, zero for duplicates or truncation.
    pub fn appended(&self) -> u64 {
        self.current_size.saturating_sub(self.previous_size)
    }
}

/// A strategy for noticing file growth.
pub trait ChangeDetector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Starts observing `path`. Changes go to `changes` until `shutdown` is
    /// cancelled or the receiver is dropped.
    fn spawn(
        &self,
        path: PathBuf,
        changes: mpsc::UnboundedSender<Change>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>;
}

/// Selects a detector strategy from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Fixed-interval metadata polling.
    #[serde(alias = "polling")]
    Poll,
    /// OS filesystem notifications.
    Watch,
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(DetectorKind::Poll),
            "watch" => Ok(DetectorKind::Watch),
            other => Err(format!("unknown detector '{}', expected 'poll' or 'watch'", other)),
        }
    }
}

/// Builds the detector for `kind`. `poll_interval` also serves as the watch
/// strategy's fallback period.
pub fn detector_for(kind: DetectorKind, poll_interval: Duration) -> Box<dyn ChangeDetector> {
    match kind {
        DetectorKind::Poll => Box::new(PollingDetector::new(poll_interval)),
        DetectorKind::Watch => Box::new(WatchDetector::new(poll_interval)),
    }
}

/// Stats the file every `interval`.
#[derive(Debug, Clone)]
pub struct PollingDetector {
    interval: Duration,
}

impl PollingDetector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollingDetector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ChangeDetector for PollingDetector {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn spawn(
        &self,
        path: PathBuf,
        changes: mpsc::UnboundedSender<Change>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(run_polling(path, self.interval, changes, shutdown))
    }
}

/// Listens for filesystem notifications on the file's directory.
#[derive(Debug, Clone)]
pub struct WatchDetector {
    fallback_interval: Duration,
}

impl WatchDetector {
    pub fn new(fallback_interval: Duration) -> Self {
        Self { fallback_interval }
    }
}

impl Default for WatchDetector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ChangeDetector for WatchDetector {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn spawn(
        &self,
        path: PathBuf,
        changes: mpsc::UnboundedSender<Change>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(run_watch(path, self.fallback_interval, changes, shutdown))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

async fn run_polling(
    path: PathBuf,
    interval: Duration,
    changes: mpsc::UnboundedSender<Change>,
    shutdown: CancellationToken,
) {
    log::info!("Polling {} every {:?}", path.display(), interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<FileStamp> = None;
    let mut unreadable = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                if unreadable {
                    log::info!("{} is readable again", path.display());
                    unreadable = false;
                }
                let stamp = FileStamp { modified: meta.modified().ok(), len: meta.len() };
                if last == Some(stamp) {
                    continue;
                }
                let change = Change {
                    previous_size: last.map_or(0, |s| s.len),
                    current_size: stamp.len,
                };
                last = Some(stamp);
                log::trace!("Poll detected change on {}: {:?}", path.display(), change);
                if changes.send(change).is_err() {
                    break;
                }
            }
            Err(e) => {
                if !unreadable {
                    log::warn!("Cannot stat {}: {}. Will keep polling.", path.display(), e);
                    unreadable = true;
                }
            }
        }
    }

    log::debug!("Polling on {} stopped", path.display());
}

async fn run_watch(
    path: PathBuf,
    fallback_interval: Duration,
    changes: mpsc::UnboundedSender<Change>,
    shutdown: CancellationToken,
) {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = raw_tx.send(res);
    });
    let dir = watch_dir(&path);
    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            log::error!("File watcher error: {}; falling back to polling {}", e, path.display());
            return run_polling(path, fallback_interval, changes, shutdown).await;
        }
    };
    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        log::error!("File watcher error: {}; falling back to polling {}", e, path.display());
        return run_polling(path, fallback_interval, changes, shutdown).await;
    }
    log::info!("Watching {} for changes", path.display());

    let mut last_len = 0;

    // Ready notification.
    if !emit_current(&path, &mut last_len, &changes).await {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = raw_rx.recv() => match event {
                Some(Ok(event)) => {
                    if event.kind.is_access() || !touches(&event, &path) {
                        continue;
                    }
                    if !emit_current(&path, &mut last_len, &changes).await {
                        break;
                    }
                }
                Some(Err(e)) => log::warn!("Watcher error on {}: {}", path.display(), e),
                None => break,
            }
        }
    }

    drop(watcher);
    log::debug!("Watch on {} stopped", path.display());
}

/// Stats `path` and forwards the change. Returns `false` once nobody listens.
async fn emit_current(path: &Path, last_len: &mut u64, changes: &mpsc::UnboundedSender<Change>) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            let change = Change { previous_size: *last_len, current_size: meta.len() };
            *last_len = meta.len();
            log::trace!("Watch detected change on {}: {:?}", path.display(), change);
            changes.send(change).is_ok()
        }
        Err(e) => {
            log::debug!("Skipping notification, cannot stat {}: {}", path.display(), e);
            true
        }
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn touches(event: &notify::Event, path: &Path) -> bool {
    match path.file_name() {
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
        None => true,
    }
}
