//! # Append-Tail Broadcaster
//!
//! The `Broadcaster` owns the read cursor of one sensor file and every
//! subscriber attached to it. When the file grows it reads the new bytes once,
//! decodes them once, and hands each subscriber an `Arc` of the same batch
//! over the subscriber's own unbounded channel.
//!
//! ## Cursor rules
//!
//! 1.  **Shared cursor**: the byte offset up to which the file has been
//!     distributed. It only moves forward, and only after a successful read
//!     and decode. A failed read or decode is reported to every subscriber as
//!     a [`Delivery::Error`] and the same range is retried on the next change.
//!
//! 2.  **Subscriber cursor**: each subscriber remembers the end of the last
//!     range it received. A new subscriber is caught up from its resume point
//!     to the current file size immediately, so it may be ahead of the shared
//!     cursor; it then only receives the part of later ranges it has not seen.
//!     Nobody ever receives a gap or an overlap.
//!
//! 3.  **Serialization**: catch-up reads and change pumps run under one async
//!     mutex. The subscriber list has its own short synchronous lock so that
//!     dropping a [`Subscription`] can unregister it without awaiting.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codecs::{Record, RecordCodec};
use crate::core::change_detector::Change;
use crate::error::RelayError;

/// Identifies one subscriber of a broadcaster.
pub type SubscriberId = u64;

type Result<T> = std::result::Result<T, RelayError>;

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Records decoded from the bytes ending at `cursor`.
    Append {
        records: Arc<Vec<Record>>,
        cursor: u64,
    },
    /// Reading or decoding failed; no cursor moved.
    Error { message: Arc<str> },
}

impl Delivery {
    fn append(records: Vec<Record>, cursor: u64) -> Self {
        Delivery::Append { records: Arc::new(records), cursor }
    }

    fn error(err: &RelayError) -> Self {
        Delivery::Error { message: Arc::from(err.to_string()) }
    }
}

/// Registered subscriber.
struct SubscriberHandle {
    id: SubscriberId,
    /// End of the last byte range delivered to this subscriber.
    cursor: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// Distributes a sensor file's appended records to live subscribers.
pub struct Broadcaster {
    path: PathBuf,
    codec: Arc<dyn RecordCodec>,
    cursor: tokio::sync::Mutex<u64>,
    subscribers: Mutex<Vec<SubscriberHandle>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    /// Creates a broadcaster for `path` with the shared cursor at zero.
    pub fn new(path: impl Into<PathBuf>, codec: Arc<dyn RecordCodec>) -> Self {
        Self {
            path: path.into(),
            codec,
            cursor: tokio::sync::Mutex::new(0),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes distributed so far.
    pub async fn cursor(&self) -> u64 {
        *self.cursor.lock().await
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// # Subscribe
    ///
    /// Registers a subscriber that has already seen the first `start` bytes.
    /// Whatever lies between `start` and the current file size is queued on
    /// the returned subscription before this call returns.
    pub async fn subscribe(self: &Arc<Self>, start: u64) -> Subscription {
        let shared = self.cursor.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut position = start;

        match self.file_len().await {
            Ok(len) if len > start => match self.read_decoded(start, len).await {
                Ok(records) => {
                    log::debug!("Catching subscriber {} up on bytes {}..{} ({} records)", id, start, len, records.len());
                    let _ = sender.send(Delivery::append(records, len));
                    position = len;
                }
                Err(e) => {
                    log::warn!("Catch-up for subscriber {} failed: {}", id, e);
                    let _ = sender.send(Delivery::error(&e));
                }
            },
            Ok(_) => {}
            Err(e) if e.is_not_found() => log::debug!("Nothing to catch up yet: {}", e),
            Err(e) => {
                log::warn!("Catch-up for subscriber {} failed: {}", id, e);
                let _ = sender.send(Delivery::error(&e));
            }
        }

        self.lock_subscribers().push(SubscriberHandle { id, cursor: position, sender });
        log::info!(
            "Subscriber {} attached to {} (resume at {}, shared cursor {})",
            id,
            self.path.display(),
            start,
            *shared
        );
        drop(shared);

        Subscription { id, receiver, broadcaster: Arc::downgrade(self) }
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock_subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        drop(subscribers);

        if removed {
            log::info!("Subscriber {} detached from {}", id, self.path.display());
        }
        removed
    }

    /// # Pump
    ///
    /// Reads whatever was appended past the shared cursor, decodes it and
    /// delivers it. A zero-length delta does nothing. Returns the shared
    /// cursor afterwards; on error the subscribers have already been told.
    pub async fn pump(&self) -> Result<u64> {
        let mut cursor = self.cursor.lock().await;
        let from = *cursor;

        let len = match self.file_len().await {
            Ok(len) => len,
            Err(e) => return Err(self.fail_all(e)),
        };
        if len < from {
            log::warn!(
                "{} shrank to {} bytes, below cursor {}; waiting for it to grow back",
                self.path.display(),
                len,
                from
            );
            return Ok(from);
        }
        if len == from {
            return Ok(from);
        }

        let bytes = match self.read_range(from, len).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail_all(e)),
        };
        let shared = match self.codec.decode(&bytes) {
            Ok(records) => Arc::new(records),
            Err(e) => return Err(self.fail_all(e.into())),
        };

        // Work out what each subscriber is owed before taking the list lock
        // for the actual sends.
        let pending: Vec<(SubscriberId, u64)> = self
            .lock_subscribers()
            .iter()
            .filter(|s| s.cursor < len)
            .map(|s| (s.id, s.cursor))
            .collect();

        let mut owed: HashMap<SubscriberId, Delivery> = HashMap::with_capacity(pending.len());
        for (id, position) in pending {
            let delivery = if position == from {
                Delivery::Append { records: Arc::clone(&shared), cursor: len }
            } else if position > from {
                let tail = &bytes[(position - from) as usize..];
                match self.codec.decode(tail) {
                    Ok(records) => Delivery::append(records, len),
                    Err(e) => Delivery::error(&RelayError::from(e)),
                }
            } else {
                match self.read_decoded(position, len).await {
                    Ok(records) => Delivery::append(records, len),
                    Err(e) => Delivery::error(&e),
                }
            };
            owed.insert(id, delivery);
        }

        let mut subscribers = self.lock_subscribers();
        subscribers.retain_mut(|sub| {
            let Some(delivery) = owed.remove(&sub.id) else {
                return true;
            };
            let advances = matches!(delivery, Delivery::Append { .. });
            if sub.sender.send(delivery).is_err() {
                log::info!("Subscriber {} went away, dropping it", sub.id);
                return false;
            }
            if advances {
                sub.cursor = len;
            }
            true
        });
        let audience = subscribers.len();
        drop(subscribers);

        *cursor = len;
        log::debug!(
            "Distributed bytes {}..{} of {} ({} records) to {} subscribers",
            from,
            len,
            self.path.display(),
            shared.len(),
            audience
        );
        Ok(len)
    }

    /// Pumps once per detected change until `shutdown` fires or the detector
    /// goes away.
    pub async fn run(self: Arc<Self>, mut changes: mpsc::UnboundedReceiver<Change>, shutdown: CancellationToken) {
        loop {
            let change = tokio::select! {
                _ = shutdown.cancelled() => break,
                change = changes.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };
            log::trace!("Change on {}: {:?}", self.path.display(), change);
            if let Err(e) = self.pump().await {
                log::debug!("Pump on {} will retry on the next change: {}", self.path.display(), e);
            }
        }
        log::info!("Broadcaster for {} stopped", self.path.display());
    }

    /// Sends `err` to every subscriber and hands it back.
    fn fail_all(&self, err: RelayError) -> RelayError {
        log::warn!("Read of {} failed: {}", self.path.display(), err);
        let delivery = Delivery::error(&err);
        self.lock_subscribers()
            .retain(|sub| sub.sender.send(delivery.clone()).is_ok());
        err
    }

    async fn file_len(&self) -> Result<u64> {
        tokio::fs::metadata(&self.path)
            .await
            .map(|meta| meta.len())
            .map_err(|source| self.io_error(source))
    }

    async fn read_range(&self, from: u64, to: u64) -> Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        file.seek(SeekFrom::Start(from))
            .await
            .map_err(|source| self.io_error(source))?;
        let mut buf = vec![0; (to - from) as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|source| self.io_error(source))?;
        Ok(buf)
    }

    async fn read_decoded(&self, from: u64, to: u64) -> Result<Vec<Record>> {
        let bytes = self.read_range(from, to).await?;
        Ok(self.codec.decode(&bytes)?)
    }

    fn io_error(&self, source: std::io::Error) -> RelayError {
        RelayError::Io { path: self.path.clone(), source }
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<SubscriberHandle>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live registration with a [`Broadcaster`]. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next delivery. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Takes a queued delivery without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Unregisters now; no delivery is queued after this returns.
    pub fn unsubscribe(&self) -> bool {
        self.broadcaster
            .upgrade()
            .is_some_and(|broadcaster| broadcaster.unsubscribe(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
        }
    }
}
