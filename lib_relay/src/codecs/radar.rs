//! Radar line format: `x,y,z,reflectivity,dx,dy,dz`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{parse_int, Field, Record, RecordCodec, SourceKind};

/// One radar reading. Field order matches the JSON the relay emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RadarRecord {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub z: Option<i64>,
    pub dx: Option<i64>,
    pub dy: Option<i64>,
    pub dz: Option<i64>,
    pub reflectivity: Option<i64>,
}

/// Renders the record back into its file line.
impl fmt::Display for RadarRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{}",
            Field(self.x),
            Field(self.y),
            Field(self.z),
            Field(self.reflectivity),
            Field(self.dx),
            Field(self.dy),
            Field(self.dz)
        )
    }
}

/// Codec for radar files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadarCodec;

impl RecordCodec for RadarCodec {
    fn kind(&self) -> SourceKind {
        SourceKind::Radar
    }

    fn decode_line(&self, line: &str) -> Record {
        let mut fields = line.split(',').map(parse_int);
        let mut next = || fields.next().flatten();

        let x = next();
        let y = next();
        let z = next();
        let reflectivity = next();
        let dx = next();
        let dy = next();
        let dz = next();

        Record::Radar(RadarRecord { x, y, z, dx, dy, dz, reflectivity })
    }
}
