//! # Core Engine Module
//!
//! The moving parts of the relay and display services.
//!
//! ## Core Components:
//!
//! - **`change_detector`**: notices that a sensor file grew. Two strategies sit
//!   behind one trait: metadata polling and OS filesystem notifications.
//!
//! - **`broadcaster`**: owns the byte cursor of one sensor file and fans decoded
//!   deltas out to every subscriber, each over its own channel.
//!
//! - **`aggregator`**: the display's entity table, keyed by position.
//!
//! - **`snapshot`**: the ACTIVE/UNAVAILABLE state machine that writes the
//!   entity table (or the unavailability sentinel) to the output file.
//!
//! - **`coordinator`**: the single task owning the table and the snapshot
//!   writer on the display side.

/// File growth detection (polling and watch strategies).
pub mod change_detector;
/// Cursor-tracking fan-out of appended records.
pub mod broadcaster;
/// Entity table merging radar and rt records.
pub mod aggregator;
/// Periodic snapshot writer and its availability state machine.
pub mod snapshot;
/// Display-side event loop.
pub mod coordinator;

// --- Public API Re-exports ---
pub use aggregator::{AggregatorStore, Entity, RadarFields};
pub use broadcaster::{Broadcaster, Delivery, SubscriberId, Subscription};
pub use change_detector::{detector_for, Change, ChangeDetector, DetectorKind, PollingDetector, WatchDetector};
pub use coordinator::{DisplayCoordinator, UpstreamEvent};
pub use snapshot::{SnapshotState, SnapshotWriter, UNAVAILABLE_SENTINEL};
