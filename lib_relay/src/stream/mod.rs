//! # Stream Module
//!
//! Exposes a [`Broadcaster`](crate::core::Broadcaster) to HTTP clients as a
//! Server-Sent Events stream.
//!
//! - **`frame`**: the text of each SSE frame the relay sends.
//! - **`endpoint`**: the axum router, the per-connection event stream and the
//!   server loop with graceful shutdown.

/// SSE frame rendering.
pub mod frame;
/// HTTP endpoint.
pub mod endpoint;

pub use endpoint::{resume_cursor, router, serve, EndpointState, INDEX_BODY};
pub use frame::{append_frame, error_frame, frame_for, HEARTBEAT_FRAME, PREAMBLE};
