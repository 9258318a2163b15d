//! # Ingestors Module
//!
//! Upstream clients used by the display service to consume the relays'
//! Server-Sent Events streams.
//!
//! - **`sse_parser`**: incremental line parser for the SSE wire format.
//! - **`upstream_client`**: reconnecting consumer of one relay that turns the
//!   stream into [`UpstreamEvent`](crate::core::UpstreamEvent)s.

pub mod sse_parser;
pub mod upstream_client;

pub use sse_parser::{SseEvent, SseParser};
pub use upstream_client::{UpstreamClient, UpstreamConfig};
