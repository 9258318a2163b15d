//! SSE frames as written to the wire.
//!
//! ```text
//! id: 42
//! event: append
//! data: [{"x":1,...}]
//!
//! ```
//!
//! JSON is rendered compactly, so `data` never spans more than one line.

use crate::codecs::Record;
use crate::core::Delivery;

/// Sent right after the response headers so clients see the stream open.
pub const PREAMBLE: &str = "\n";

pub const HEARTBEAT_FRAME: &str = "event: heartbeat\ndata: heartbeat\n\n";

/// `append` frame carrying `records`, identified by the cursor after them.
pub fn append_frame(records: &[Record], cursor: u64) -> String {
    match serde_json::to_string(records) {
        Ok(json) => format!("id: {}\nevent: append\ndata: {}\n\n", cursor, json),
        Err(e) => {
            log::error!("Failed to serialize {} records: {}", records.len(), e);
            error_frame(&format!("failed to serialize records: {}", e))
        }
    }
}

/// `error` frame whose data is the message as a JSON string. Has no `id`, so
/// the client's resume point is untouched.
pub fn error_frame(message: &str) -> String {
    format!("event: error\ndata: {}\n\n", serde_json::Value::from(message))
}

pub fn frame_for(delivery: &Delivery) -> String {
    match delivery {
        Delivery::Append { records, cursor } => append_frame(records, *cursor),
        Delivery::Error { message } => error_frame(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{codec_for, SourceKind};

    #[test]
    fn test_append_frame_layout() {
        let records = codec_for(SourceKind::Radar).decode(b"100,100,0,50,0,0,0").unwrap();
        assert_eq!(
            append_frame(&records, 19),
            "id: 19\nevent: append\ndata: [{\"x\":100,\"y\":100,\"z\":0,\"dx\":0,\"dy\":0,\"dz\":0,\"reflectivity\":50}]\n\n"
        );
    }

    #[test]
    fn test_empty_batch_is_still_a_frame() {
        assert_eq!(append_frame(&[], 0), "id: 0\nevent: append\ndata: []\n\n");
    }

    #[test]
    fn test_error_frame_escapes_message() {
        let frame = error_frame("read failed:\n\"radar.dat\"");
        assert_eq!(frame, "event: error\ndata: \"read failed:\\n\\\"radar.dat\\\"\"\n\n");
        assert!(!frame.contains("id:"));
    }

    #[test]
    fn test_frame_for_delivery() {
        let delivery = Delivery::Error { message: "boom".into() };
        assert_eq!(frame_for(&delivery), "event: error\ndata: \"boom\"\n\n");
    }
}
