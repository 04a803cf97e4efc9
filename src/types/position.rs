//! Covering position.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Covering position in percent, where 0 is fully closed and 100 fully open.
///
/// Connector devices count the other way round (0 is fully open), so values
/// crossing the wire go through [`Position::inverted`].
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Position {
    pub(crate) value: u8,
}

impl Position {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 100;

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Returns None if value is outside valid range (0-100).
    ///
    /// # Examples
    ///
    /// ```
    /// use connector_bridge_rs::Position;
    ///
    /// assert!(Position::create(0).is_some());
    /// assert!(Position::create(100).is_some());
    /// assert!(Position::create(101).is_none());
    /// ```
    pub fn create(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Position { value })
        } else {
            None
        }
    }

    /// Like [`Position::create`] but reports the rejected value.
    pub fn try_create(value: u8) -> Result<Self, Error> {
        Self::create(value).ok_or(Error::InvalidPosition(value))
    }

    /// Builds a position from a raw device report, saturating at 100.
    pub fn saturating(value: u64) -> Self {
        Position {
            value: value.min(Self::MAX as u64) as u8,
        }
    }

    /// The same position expressed in the device's inverted convention.
    ///
    /// ```
    /// use connector_bridge_rs::Position;
    ///
    /// assert_eq!(Position::create(30).unwrap().inverted().value(), 70);
    /// ```
    pub fn inverted(&self) -> Self {
        Position {
            value: Self::MAX - self.value,
        }
    }
}

impl From<Position> for u8 {
    fn from(position: Position) -> Self {
        position.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_clamps_overflow() {
        assert_eq!(Position::saturating(250).value(), 100);
        assert_eq!(Position::saturating(42).value(), 42);
    }

    #[test]
    fn test_try_create_rejects_out_of_range() {
        assert_eq!(Position::try_create(101), Err(Error::InvalidPosition(101)));
        assert_eq!(Position::try_create(55).map(|p| p.value()).ok(), Some(55));
    }

    #[test]
    fn test_inverted_edges() {
        assert_eq!(Position::create(0).unwrap().inverted().value(), 100);
        assert_eq!(Position::create(100).unwrap().inverted().value(), 0);
    }
}
