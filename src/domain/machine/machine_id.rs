use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a physical worker machine. Machines are numbered from 1.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MachineId(u32);

impl MachineId {
    /// Returns `None` for 0, which is never a valid machine.
    pub fn new(id: u32) -> Option<Self> {
        if id == 0 { None } else { Some(MachineId(id)) }
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Position of this machine in a zero based list (machine 1 is index 0).
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// Inverse of [`MachineId::index`]. Saturates at `u32::MAX`, never yields 0.
    pub fn from_index(index: usize) -> Self {
        MachineId(u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1))
    }

    /// Key used for this machine in the reservation store.
    pub fn store_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for MachineId {
    type Error = String;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        MachineId::new(id).ok_or_else(|| "machine numbers start at 1".to_string())
    }
}

impl From<MachineId> for u32 {
    fn from(machine: MachineId) -> Self {
        machine.0
    }
}

impl FromStr for MachineId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s.trim().parse().map_err(|_| format!("'{}' is not a machine number", s))?;
        MachineId::try_from(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(MachineId::new(0).is_none());
        assert!("0".parse::<MachineId>().is_err());
    }

    #[test]
    fn deserialization_rejects_zero() {
        assert!(serde_json::from_str::<MachineId>("0").is_err());
        assert_eq!(serde_json::from_str::<MachineId>("3").unwrap(), MachineId::new(3).unwrap());
        assert_eq!(serde_json::to_string(&MachineId::new(3).unwrap()).unwrap(), "3");
    }

    #[test]
    fn from_index_never_yields_zero() {
        assert_eq!(MachineId::from_index(usize::MAX).get(), u32::MAX);
    }

    #[test]
    fn index_round_trips_through_from_index() {
        let id = MachineId::new(7).unwrap();
        assert_eq!(id.index(), 6);
        assert_eq!(MachineId::from_index(6), id);
    }

    #[test]
    fn parses_store_keys() {
        assert_eq!(" 12 ".parse::<MachineId>().unwrap().get(), 12);
        assert!("twelve".parse::<MachineId>().is_err());
        assert_eq!(MachineId::new(12).unwrap().store_key(), "12");
    }
}
