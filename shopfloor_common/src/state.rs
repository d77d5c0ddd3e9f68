//! Machine lifecycle state shared by all phase engines.
//!
//! Exactly one `MachineState` is active per machine at any time. Cross
//! transitions go through `Idle`; the legal edges are enforced by the phase
//! engines, which pre-check before calling `BaseMachine::transition_to`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a production machine.
///
/// `UnplannedStop` exits only via error resolution back to `Idle`;
/// `PlannedStop` exits when the shift break ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineState {
    /// Ready, no active order cycle.
    Idle = 0,
    /// Preparing for production (die heating, calibration, electrode check).
    Setup = 1,
    /// Producing - the phase sub-FSM is advancing.
    Running = 2,
    /// Stopped for a scheduled shift break.
    PlannedStop = 3,
    /// Stopped on a simulated machine error until its expected end.
    UnplannedStop = 4,
}

impl MachineState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Setup),
            2 => Some(Self::Running),
            3 => Some(Self::PlannedStop),
            4 => Some(Self::UnplannedStop),
            _ => None,
        }
    }

    /// Stable display name used on OPC UA and the observer REST surface.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Setup => "Setup",
            Self::Running => "Running",
            Self::PlannedStop => "PlannedStop",
            Self::UnplannedStop => "UnplannedStop",
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_roundtrip() {
        for raw in 0..=4u8 {
            let state = MachineState::from_u8(raw).unwrap();
            assert_eq!(state as u8, raw);
        }
        assert_eq!(MachineState::from_u8(5), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(MachineState::Idle.to_string(), "Idle");
        assert_eq!(MachineState::UnplannedStop.to_string(), "UnplannedStop");
    }

    #[test]
    fn test_default_is_idle() {
        assert_eq!(MachineState::default(), MachineState::Idle);
    }
}
