//! Cached device state.

use serde::{Deserialize, Serialize};

use crate::event::DeviceReport;
use crate::types::{Position, PositionState};

/// Last known position and motion of a covering, in platform convention.
///
/// Starts out closed and stopped until the first report arrives.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    position: Position,
    state: PositionState,
}

impl DeviceState {
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    /// Applies a device report.
    ///
    /// The reported position is inverted into platform convention. Missing
    /// fields and unknown operation codes leave the cached value alone.
    /// Returns whether anything changed.
    ///
    /// # Examples
    ///
    /// ```
    /// use connector_bridge_rs::{DeviceState, InboundEvent, PositionState};
    /// use serde_json::json;
    ///
    /// let event = InboundEvent::from_value(json!({
    ///     "msgType": "ReadDeviceAck",
    ///     "mac": "AA:BB",
    ///     "data": {"currentPosition": 30, "operation": 1}
    /// })).unwrap();
    ///
    /// let mut state = DeviceState::default();
    /// assert!(state.apply(&event.device_report().unwrap()));
    /// assert_eq!(state.position().value(), 70);
    /// assert_eq!(state.state(), PositionState::Increasing);
    /// ```
    pub fn apply(&mut self, report: &DeviceReport) -> bool {
        let before = *self;
        if let Some(position) = report.platform_position() {
            self.position = position;
        }
        if let Some(state) = report.position_state() {
            self.state = state;
        }
        before != *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_operation_keeps_state() {
        let mut state = DeviceState::default();
        state.apply(&DeviceReport {
            position: Position::create(0),
            operation: Some(0),
        });
        assert_eq!(state.state(), PositionState::Decreasing);
        assert_eq!(state.position().value(), 100);

        let changed = state.apply(&DeviceReport {
            position: None,
            operation: Some(5),
        });
        assert!(!changed);
        assert_eq!(state.state(), PositionState::Decreasing);
    }
}
