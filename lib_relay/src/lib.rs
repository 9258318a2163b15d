//! # lib_relay
//!
//! Shared library for the holorelay services. The radar and radio-telescope
//! relays use it to tail a sensor file and push decoded records over
//! Server-Sent Events; the display service uses it to consume both streams,
//! merge them into one entity table and snapshot that table to a device file.
//!
//! Every top-level module sits behind a cargo feature of the same name so a
//! binary only pulls the stack it needs (`full` enables all of them).

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Record model and the per-source line decoders.
#[cfg(feature = "codecs")]
pub mod codecs;

/// Error types shared across the library.
#[cfg(feature = "codecs")]
pub mod error;

/// Change detection, broadcasting, aggregation and snapshotting.
#[cfg(feature = "core")]
pub mod core;

/// The SSE endpoint serving a broadcaster.
#[cfg(feature = "stream")]
pub mod stream;

/// Upstream SSE clients used by the display service.
#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "codecs")]
pub use codecs::{codec_for, Emission, RadarRecord, Record, RecordCodec, RtRecord, SourceKind};
#[cfg(feature = "codecs")]
pub use error::CodecError;
