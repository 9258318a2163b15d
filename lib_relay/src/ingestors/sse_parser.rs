//! Incremental Server-Sent Events parser.
//!
//! Bytes arrive in arbitrary chunks from the HTTP body; `feed` buffers a
//! partial line until its newline shows up and returns every event completed
//! by the chunk.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Last `id` seen on the stream, carried over from earlier events.
    pub id: Option<String>,
    /// `event` field, `message` when absent.
    pub event: String,
    /// `data` lines joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    last_id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the most recent event that carried one.
    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let mut line = std::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "id" if !value.contains('\0') => self.last_id = Some(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "retry" => {}
            other => log::trace!("Ignoring SSE field '{}'", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            id: self.last_id.clone(),
            event: event.unwrap_or_else(|| "message".to_owned()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_relay_frames() {
        let mut parser = SseParser::new();
        let events = parser.feed(
            b"\nid: 19\nevent: append\ndata: [1]\n\nevent: heartbeat\ndata: heartbeat\n\nevent: error\ndata: \"boom\"\n\n",
        );
        assert_eq!(
            events,
            vec![
                SseEvent { id: Some("19".into()), event: "append".into(), data: "[1]".into() },
                SseEvent { id: Some("19".into()), event: "heartbeat".into(), data: "heartbeat".into() },
                SseEvent { id: Some("19".into()), event: "error".into(), data: "\"boom\"".into() },
            ]
        );
        assert_eq!(parser.last_id(), Some("19"));
    }

    #[test]
    fn test_frames_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: 4").is_empty());
        assert!(parser.feed(b"2\r\nevent: app").is_empty());
        assert!(parser.feed(b"end\r\ndata: [").is_empty());
        let events = parser.feed(b"]\r\n\r\n");
        assert_eq!(events, vec![SseEvent { id: Some("42".into()), event: "append".into(), data: "[]".into() }]);
    }

    #[test]
    fn test_comments_defaults_and_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\ndata:a\ndata: b\n\nevent: lonely\n\n");
        assert_eq!(events, vec![SseEvent { id: None, event: "message".into(), data: "a\nb".into() }]);

        // The event type without data was discarded, not carried over.
        let events = parser.feed(b"data: c\n\n");
        assert_eq!(events[0].event, "message");
    }
}
