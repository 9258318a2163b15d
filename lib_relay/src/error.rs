//! Error types for the relay library.

use thiserror::Error;

/// Errors raised while turning a raw chunk into records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The chunk stops in the middle of a multi-byte character. The writer is
    /// most likely mid-append, so the same range is retried on the next change.
    #[error("chunk ends inside a UTF-8 sequence (valid up to byte {valid_up_to})")]
    IncompleteUtf8 {
        /// Number of leading bytes that form valid UTF-8.
        valid_up_to: usize,
    },
}

/// Errors raised by the append-tail broadcaster and change detectors.
#[cfg(feature = "core")]
#[derive(Debug, Error)]
pub enum RelayError {
    /// Stat, open, seek or read on the watched file failed.
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        /// Path of the watched file.
        path: std::path::PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The appended bytes could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[cfg(feature = "core")]
impl RelayError {
    /// Check if this error means the watched file does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, RelayError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Errors raised by an upstream SSE session.
#[cfg(feature = "ingestors")]
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connecting or reading the response body failed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay answered with something other than 2xx.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Nothing, not even a heartbeat, arrived for too long.
    #[error("no data for {0:?}")]
    Silent(std::time::Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_message() {
        let err = CodecError::IncompleteUtf8 { valid_up_to: 7 };
        assert!(err.to_string().contains("valid up to byte 7"));
    }

    #[cfg(feature = "core")]
    #[test]
    fn test_relay_error_not_found() {
        let err = RelayError::Io {
            path: "/tmp/radar.dat".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/tmp/radar.dat"));
        assert!(!RelayError::Codec(CodecError::IncompleteUtf8 { valid_up_to: 0 }).is_not_found());
    }
}
