use std::fmt;

use defense_rpc::{Coalition, UnitRecord};

/// Surface position of a unit in decimal degrees.
///
/// Latitude is clamped into `[-90, 90]` on construction; longitude is kept as
/// reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    latitude: f64,
    longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: latitude.clamp(-90.0, 90.0),
            longitude,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// MIL-STD-2525D symbol identification code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbology {
    sidc: String,
}

impl Symbology {
    pub fn from_sidc(sidc: impl Into<String>) -> Self {
        Self { sidc: sidc.into() }
    }

    pub fn sidc(&self) -> &str {
        &self.sidc
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sidc)
    }
}

/// Snapshot of one simulated unit.
///
/// Units are plain records: a newer snapshot for the same id replaces the old
/// one wholesale, and capability lookups or alarm commands are performed by
/// the monitor against the remote source, never through the unit itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    id: u32,
    pub name: String,
    pub callsign: String,
    pub player_name: Option<String>,
    pub group_name: String,
    pub coalition: Coalition,
    pub type_name: String,
    pub position: Position,
    pub altitude: f64,
    pub heading: f64,
    pub speed: f64,
    pub deleted: bool,
    pub symbology: Option<Symbology>,
}

impl Unit {
    /// Build a live unit from a stream record.
    pub fn from_record(record: UnitRecord, symbology: Option<Symbology>) -> Self {
        Self {
            id: record.id,
            name: record.name,
            callsign: record.callsign,
            player_name: record.player_name,
            group_name: record.group_name,
            coalition: record.coalition,
            type_name: record.type_name,
            position: Position::new(record.latitude, record.longitude),
            altitude: record.altitude,
            heading: record.heading,
            speed: record.speed,
            deleted: false,
            symbology,
        }
    }

    /// Minimal stand-in telling the store to forget `id`.
    pub fn tombstone(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            callsign: String::new(),
            player_name: None,
            group_name: String::new(),
            coalition: Coalition::ALL,
            type_name: String::new(),
            position: Position::default(),
            altitude: 0.0,
            heading: 0.0,
            speed: 0.0,
            deleted: true,
            symbology: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}
