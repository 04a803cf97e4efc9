//! Motion state of a covering.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

/// Tri-state motion indicator.
///
/// The discriminants are the connector's operation codes, which also match
/// the platform's position state values.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum PositionState {
    Decreasing = 0,
    Increasing = 1,
    #[default]
    Stopped = 2,
}

impl PositionState {
    /// Maps a connector operation code; unknown codes yield None.
    pub fn from_operation(code: u64) -> Option<Self> {
        PositionState::iter().find(|state| *state as u64 == code)
    }

    pub fn operation(&self) -> u8 {
        *self as u8
    }

    /// Direction of travel needed to move from `current` to `target`.
    ///
    /// Anything not strictly lower counts as increasing, including the
    /// current position itself.
    pub fn towards(current: u8, target: u8) -> Self {
        if target < current {
            PositionState::Decreasing
        } else {
            PositionState::Increasing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_operation() {
        assert_eq!(PositionState::from_operation(0), Some(PositionState::Decreasing));
        assert_eq!(PositionState::from_operation(1), Some(PositionState::Increasing));
        assert_eq!(PositionState::from_operation(2), Some(PositionState::Stopped));
        assert_eq!(PositionState::from_operation(7), None);
    }

    #[test]
    fn test_towards() {
        assert_eq!(PositionState::towards(70, 80), PositionState::Increasing);
        assert_eq!(PositionState::towards(90, 80), PositionState::Decreasing);
        assert_eq!(PositionState::towards(50, 50), PositionState::Increasing);
    }
}
