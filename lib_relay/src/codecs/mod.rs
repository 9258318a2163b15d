//! # Record Codecs
//!
//! The relays read plain-text sensor files, one record per line. This module
//! owns the record model shared by both sources and the `RecordCodec` seam the
//! broadcaster decodes through.
//!
//! ## Contained Modules:
//! - **`radar`**: `x,y,z,reflectivity,dx,dy,dz` lines.
//! - **`rt`**: radio-telescope `x,y,z[,frequency:intensity]*` lines.
//!
//! Decoding is deliberately permissive. A field that is not a number becomes
//! `None` (serialized as `null`, rendered as `NaN`) instead of failing the
//! whole batch.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Radar line decoder.
pub mod radar;
/// Radio-telescope line decoder.
pub mod rt;

pub use radar::{RadarCodec, RadarRecord};
pub use rt::{Emission, RtCodec, RtRecord};

/// The two sensor sources the system knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The radar sensor.
    Radar,
    /// The radio telescope.
    Rt,
}

impl SourceKind {
    /// Parses the JSON array carried by an `append` event from this source.
    pub fn parse_batch(self, json: &str) -> Result<Vec<Record>, serde_json::Error> {
        match self {
            SourceKind::Radar => serde_json::from_str::<Vec<RadarRecord>>(json)
                .map(|records| records.into_iter().map(Record::Radar).collect()),
            SourceKind::Rt => serde_json::from_str::<Vec<RtRecord>>(json)
                .map(|records| records.into_iter().map(Record::Rt).collect()),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Radar => f.write_str("radar"),
            SourceKind::Rt => f.write_str("rt"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "radar" => Ok(SourceKind::Radar),
            "rt" | "radiotelescope" | "radio-telescope" => Ok(SourceKind::Rt),
            other => Err(format!("unknown source '{}', expected 'radar' or 'rt'", other)),
        }
    }
}

/// A decoded line from either source.
///
/// Serializes untagged, so a radar batch on the wire is a plain array of
/// radar objects and an rt batch a plain array of rt objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    /// A radar reading.
    Radar(RadarRecord),
    /// A radio-telescope reading.
    Rt(RtRecord),
}

impl Record {
    /// Spatial identity of the record.
    pub fn position(&self) -> Position {
        match self {
            Record::Radar(r) => Position { x: r.x, y: r.y, z: r.z },
            Record::Rt(r) => Position { x: r.x, y: r.y, z: r.z },
        }
    }

    /// Which source encoding produced this record.
    pub fn source(&self) -> SourceKind {
        match self {
            Record::Radar(_) => SourceKind::Radar,
            Record::Rt(_) => SourceKind::Rt,
        }
    }
}

/// The `(x, y, z)` triple identifying an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub z: Option<i64>,
}

impl Position {
    /// The `x:y:z` key used by the entity table.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", Field(self.x), Field(self.y), Field(self.z))
    }
}

/// Text rendering of an optional integer field: the number, or `NaN`.
#[derive(Debug, Clone, Copy)]
pub struct Field(pub Option<i64>);

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => f.write_str("NaN"),
        }
    }
}

/// Decodes a chunk of one source's file encoding into records.
pub trait RecordCodec: Send + Sync {
    /// The source whose grammar this codec understands.
    fn kind(&self) -> SourceKind;

    /// Decodes a single non-empty line. Never fails; bad fields become `None`.
    fn decode_line(&self, line: &str) -> Record;

    /// Decodes a whole chunk: trim, split into lines, skip blank lines, one
    /// record per remaining line, in file order.
    fn decode(&self, chunk: &[u8]) -> Result<Vec<Record>, CodecError> {
        let text = chunk_text(chunk)?;
        Ok(text
            .trim()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| self.decode_line(line))
            .collect())
    }
}

/// Returns the codec for a source.
pub fn codec_for(kind: SourceKind) -> Arc<dyn RecordCodec> {
    match kind {
        SourceKind::Radar => Arc::new(RadarCodec),
        SourceKind::Rt => Arc::new(RtCodec),
    }
}

/// Parses the leading integer of a field the way the sensor files are
/// written: leading whitespace skipped, optional sign, longest digit run.
/// `"12abc"` is 12, `"abc"` and `""` are `None`.
pub fn parse_int(field: &str) -> Option<i64> {
    let s = field.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits.bytes().take_while(u8::is_ascii_digit).count();
    if end == 0 {
        return None;
    }
    let magnitude: i64 = digits[..end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Interprets a chunk as text. A trailing partial character is an error so
/// the range gets retried; other invalid bytes are replaced.
fn chunk_text(chunk: &[u8]) -> Result<Cow<'_, str>, CodecError> {
    match std::str::from_utf8(chunk) {
        Ok(text) => Ok(Cow::Borrowed(text)),
        Err(e) if e.error_len().is_none() => Err(CodecError::IncompleteUtf8 {
            valid_up_to: e.valid_up_to(),
        }),
        Err(_) => {
            log::warn!("Chunk contains invalid UTF-8, replacing bad bytes");
            Ok(String::from_utf8_lossy(chunk))
        }
    }
}
