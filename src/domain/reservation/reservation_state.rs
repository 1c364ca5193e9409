use serde_json::Value;
use std::fmt;

/// Shared in-use status of one machine, visible to every running client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReservationState {
    /// The machine is free to be selected by any operator.
    #[default]
    Available,

    /// An operator holds the machine for a staging run.
    Reserved,
}

impl ReservationState {
    pub fn toggled(self) -> Self {
        match self {
            ReservationState::Available => ReservationState::Reserved,
            ReservationState::Reserved => ReservationState::Available,
        }
    }

    /// Value written to the reservation store (`"on"` / `"off"`).
    pub fn to_wire(self) -> Value {
        match self {
            ReservationState::Available => Value::from("off"),
            ReservationState::Reserved => Value::from("on"),
        }
    }

    /// Parses a store value. Booleans are accepted as a legacy encoding.
    /// Returns `None` for anything else.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if s == "on" => Some(ReservationState::Reserved),
            Value::String(s) if s == "off" => Some(ReservationState::Available),
            Value::Bool(true) => Some(ReservationState::Reserved),
            Value::Bool(false) => Some(ReservationState::Available),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Available => write!(f, "off"),
            ReservationState::Reserved => write!(f, "on"),
        }
    }
}
