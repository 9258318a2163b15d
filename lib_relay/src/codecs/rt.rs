//! Radio-telescope line format: `x,y,z` then zero or more `,frequency:intensity`.
//!
//! The line is split on `,`, every token again on `:`, and the flattened
//! integers are read positionally: three coordinates, then pairs.

use serde::{Deserialize, Serialize};

use super::{parse_int, Record, RecordCodec, SourceKind};

/// One emission line of a radio-telescope reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emission {
    pub frequency: Option<i64>,
    pub intensity: Option<i64>,
}

/// One radio-telescope reading.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RtRecord {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub z: Option<i64>,
    #[serde(default)]
    pub emissions: Vec<Emission>,
}

/// Codec for radio-telescope files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtCodec;

impl RecordCodec for RtCodec {
    fn kind(&self) -> SourceKind {
        SourceKind::Rt
    }

    fn decode_line(&self, line: &str) -> Record {
        let values: Vec<Option<i64>> = line
            .split(',')
            .flat_map(|token| token.split(':'))
            .map(parse_int)
            .collect();

        let at = |i: usize| values.get(i).copied().flatten();
        let rest = values.get(3..).unwrap_or(&[]);

        let pairs = rest.chunks_exact(2);
        if !pairs.remainder().is_empty() {
            log::warn!("Dropping unpaired trailing emission value in rt line '{}'", line);
        }
        let emissions = pairs
            .map(|pair| Emission { frequency: pair[0], intensity: pair[1] })
            .collect();

        Record::Rt(RtRecord { x: at(0), y: at(1), z: at(2), emissions })
    }
}
