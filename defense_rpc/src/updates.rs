use std::fmt;

use thiserror::Error;

use crate::pb;

/// Side identifier carried on every unit. Units of differing coalition are
/// hostile to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coalition(pub i32);

impl Coalition {
    pub const ALL: Coalition = Coalition(pb::Coalition::All as i32);
    pub const NEUTRAL: Coalition = Coalition(pb::Coalition::Neutral as i32);
    pub const RED: Coalition = Coalition(pb::Coalition::Red as i32);
    pub const BLUE: Coalition = Coalition(pb::Coalition::Blue as i32);

    pub fn is_hostile_to(self, other: Coalition) -> bool {
        self != other
    }
}

impl fmt::Display for Coalition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match pb::Coalition::try_from(self.0) {
            Ok(known) => write!(f, "{}", known.as_str_name()),
            Err(_) => write!(f, "COALITION_{}", self.0),
        }
    }
}

/// Full set of fields reported for a live unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub id: u32,
    pub name: String,
    pub callsign: String,
    pub coalition: Coalition,
    pub type_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
    pub speed: f64,
    pub group_name: String,
    pub player_name: Option<String>,
}

/// One decoded message from the unit stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceUpdate {
    /// A unit appeared or changed; the record replaces any previous one.
    Unit(UnitRecord),
    /// The unit left the mission.
    Gone { id: u32, name: String },
    /// The server sent an update with no payload set.
    Empty,
}

/// Readiness level commanded to an air-defense site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlarmState {
    Inactive = 0,
    Standby = 1,
    Active = 2,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlarmState::Inactive => "inactive",
            AlarmState::Standby => "standby",
            AlarmState::Active => "active",
        };
        f.write_str(label)
    }
}

/// Recipient of an alarm-state command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlarmTarget {
    Unit(String),
    Group(String),
}

impl fmt::Display for AlarmTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmTarget::Unit(name) => write!(f, "unit:{name}"),
            AlarmTarget::Group(name) => write!(f, "group:{name}"),
        }
    }
}

/// Error returned when a stream message cannot be turned into a [`SourceUpdate`].
///
/// These are recoverable: the offending update is dropped and the stream keeps
/// flowing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateDecodeError {
    #[error("{message} missing required field {field} (unit {id})")]
    MissingField {
        message: &'static str,
        field: &'static str,
        id: u32,
    },
}

impl SourceUpdate {
    /// Attempt to build a domain update from the protobuf representation.
    pub fn try_from_proto(proto: pb::UnitUpdate) -> Result<Self, UpdateDecodeError> {
        let Some(update) = proto.update else {
            return Ok(SourceUpdate::Empty);
        };

        match update {
            pb::unit_update::Update::Unit(unit) => {
                let position = unit.position.ok_or(UpdateDecodeError::MissingField {
                    message: "Unit",
                    field: "position",
                    id: unit.id,
                })?;
                Ok(SourceUpdate::Unit(UnitRecord {
                    id: unit.id,
                    name: unit.name,
                    callsign: unit.callsign,
                    coalition: Coalition(unit.coalition),
                    type_name: unit.r#type,
                    latitude: position.lat,
                    longitude: position.lon,
                    altitude: position.alt,
                    heading: unit.heading,
                    speed: unit.speed,
                    group_name: unit.group_name,
                    player_name: unit.player_name,
                }))
            }
            pb::unit_update::Update::Gone(gone) => Ok(SourceUpdate::Gone {
                id: gone.id,
                name: gone.name,
            }),
        }
    }
}

impl From<AlarmState> for pb::set_alarm_state_request::AlarmState {
    fn from(value: AlarmState) -> Self {
        match value {
            AlarmState::Inactive => pb::set_alarm_state_request::AlarmState::Inactive,
            AlarmState::Standby => pb::set_alarm_state_request::AlarmState::Standby,
            AlarmState::Active => pb::set_alarm_state_request::AlarmState::Active,
        }
    }
}

/// Build the protobuf request for an alarm-state command.
pub(crate) fn alarm_request_to_proto(
    target: &AlarmTarget,
    state: AlarmState,
) -> pb::SetAlarmStateRequest {
    let name = match target {
        AlarmTarget::Unit(unit) => pb::set_alarm_state_request::Name::UnitName(unit.clone()),
        AlarmTarget::Group(group) => pb::set_alarm_state_request::Name::GroupName(group.clone()),
    };
    pb::SetAlarmStateRequest {
        name: Some(name),
        alarm_state: pb::set_alarm_state_request::AlarmState::from(state) as i32,
    }
}
