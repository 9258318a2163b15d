//! Entity table for the display service.
//!
//! Entities are keyed by `x:y:z`. A radar record replaces the entity's radar
//! field group, an rt record replaces its emissions. Entities are never
//! removed, and iteration follows first sighting.

use std::collections::HashMap;
use std::fmt;

use crate::codecs::{Emission, Field, Position, RadarRecord, Record, RtRecord, SourceKind};

/// Radar-owned fields of an entity, replaced together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadarFields {
    pub dx: Option<i64>,
    pub dy: Option<i64>,
    pub dz: Option<i64>,
    pub reflectivity: Option<i64>,
}

/// Merged view of everything seen at one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub z: Option<i64>,
    pub radar: Option<RadarFields>,
    pub emissions: Option<Vec<Emission>>,
}

impl Entity {
    fn at(position: Position) -> Self {
        Self { x: position.x, y: position.y, z: position.z, radar: None, emissions: None }
    }

    /// `x:y:z`, as used for the table key.
    pub fn key(&self) -> String {
        Position { x: self.x, y: self.y, z: self.z }.key()
    }

    /// Whether this entity belongs in a snapshot: zero and unknown
    /// reflectivity both count as absent.
    pub fn has_known_reflectivity(&self) -> bool {
        matches!(self.radar, Some(RadarFields { reflectivity: Some(r), .. }) if r != 0)
    }
}

/// Snapshot line: `x,y,z,reflectivity,dx,dy,dz` then `,frequency:intensity`
/// per emission.
impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let radar = self.radar.unwrap_or(RadarFields { dx: None, dy: None, dz: None, reflectivity: None });
        write!(
            f,
            "{},{},{},{},{},{},{}",
            Field(self.x),
            Field(self.y),
            Field(self.z),
            Field(radar.reflectivity),
            Field(radar.dx),
            Field(radar.dy),
            Field(radar.dz)
        )?;
        for emission in self.emissions.iter().flatten() {
            write!(f, ",{}:{}", Field(emission.frequency), Field(emission.intensity))?;
        }
        Ok(())
    }
}

/// The display's entity table.
#[derive(Debug, Default)]
pub struct AggregatorStore {
    index: HashMap<String, usize>,
    entities: Vec<Entity>,
}

impl AggregatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a batch from `source` in order. Records of the other source's
    /// shape are skipped with a warning.
    pub fn apply(&mut self, source: SourceKind, records: &[Record]) {
        for record in records {
            match (source, record) {
                (SourceKind::Radar, Record::Radar(r)) => self.merge_radar(r),
                (SourceKind::Rt, Record::Rt(r)) => self.merge_rt(r),
                (source, other) => {
                    log::warn!("Ignoring {} record on the {} stream", other.source(), source);
                }
            }
        }
    }

    fn merge_radar(&mut self, record: &RadarRecord) {
        let entity = self.entry(Position { x: record.x, y: record.y, z: record.z });
        entity.radar = Some(RadarFields {
            dx: record.dx,
            dy: record.dy,
            dz: record.dz,
            reflectivity: record.reflectivity,
        });
    }

    fn merge_rt(&mut self, record: &RtRecord) {
        let entity = self.entry(Position { x: record.x, y: record.y, z: record.z });
        entity.emissions = Some(record.emissions.clone());
    }

    fn entry(&mut self, position: Position) -> &mut Entity {
        let key = position.key();
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.entities.push(Entity::at(position));
                let slot = self.entities.len() - 1;
                self.index.insert(key, slot);
                slot
            }
        };
        &mut self.entities[slot]
    }

    /// Current entities in first-sighting order.
    pub fn snapshot_view(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Entity> {
        self.index.get(key).map(|&slot| &self.entities[slot])
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
