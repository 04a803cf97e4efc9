//! Messages received from the connector bridge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Error;
use crate::types::{MessageType, Position, PositionState};

type Result<T> = std::result::Result<T, Error>;

/// A parsed inbound datagram.
///
/// The shape is whatever the bridge sent; nothing beyond "is a JSON object"
/// is checked before the event is broadcast. Accessors return `None` for
/// missing or mistyped fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundEvent {
    fields: Map<String, Value>,
}

impl InboundEvent {
    /// Parses a raw datagram.
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        let text = String::from_utf8(datagram.to_vec()).map_err(Error::Utf8Decode)?;
        let value: Value = serde_json::from_str(&text).map_err(Error::JsonLoad)?;
        Self::from_value(value)
    }

    /// Wraps an already decoded JSON value.
    ///
    /// ```
    /// use connector_bridge_rs::{InboundEvent, MessageType};
    /// use serde_json::json;
    ///
    /// let event = InboundEvent::from_value(json!({"msgType": "ReadDeviceAck", "mac": "AA:BB"})).unwrap();
    /// assert!(event.is_type(&MessageType::ReadDeviceAck));
    /// assert_eq!(event.mac(), Some("AA:BB"));
    /// assert!(InboundEvent::from_value(json!([1, 2])).is_err());
    /// ```
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(InboundEvent { fields }),
            _ => Err(Error::NotAnObject),
        }
    }

    pub fn msg_type(&self) -> Option<MessageType> {
        self.str_field("msgType").map(MessageType::from)
    }

    /// Checks the `msgType` field without allocating.
    pub fn is_type(&self, msg_type: &MessageType) -> bool {
        self.str_field("msgType") == Some(msg_type.as_str())
    }

    pub fn mac(&self) -> Option<&str> {
        self.str_field("mac")
    }

    pub fn device_type(&self) -> Option<&str> {
        self.str_field("deviceType")
    }

    pub fn msg_id(&self) -> Option<u64> {
        self.fields.get("msgId").and_then(Value::as_u64)
    }

    pub fn data(&self) -> Option<&Value> {
        self.fields.get("data")
    }

    /// Any top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Decodes the position report carried by `ReadDeviceAck` messages.
    ///
    /// Returns None when the event has no `data` object.
    pub fn device_report(&self) -> Option<DeviceReport> {
        let data = self.data()?.as_object()?;
        let position = data
            .get("currentPosition")
            .and_then(Value::as_f64)
            .map(|raw| Position::saturating(raw.max(0.0).round() as u64));
        let operation = data.get("operation").and_then(Value::as_u64);
        Some(DeviceReport {
            position,
            operation,
        })
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Position and motion as reported by a device, in device convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceReport {
    /// Raw `currentPosition`, where 0 means fully open.
    pub position: Option<Position>,
    /// Raw `operation` code.
    pub operation: Option<u64>,
}

impl DeviceReport {
    /// Position in platform convention.
    pub fn platform_position(&self) -> Option<Position> {
        self.position.map(|p| p.inverted())
    }

    /// Motion state, if the operation code is a known one.
    pub fn position_state(&self) -> Option<PositionState> {
        self.operation.and_then(PositionState::from_operation)
    }
}
