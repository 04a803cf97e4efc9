//! Commands sent to the connector bridge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::types::{MessageType, Position, PositionState};

/// A command to send through [`crate::BridgeTransport::send_message`].
///
/// Besides the fields every connector command has, arbitrary extra fields
/// can be attached with [`OutboundCommand::field`]; they are sent as-is.
/// The transport adds `msgId` and `AccessToken` when sending.
///
/// # Examples
///
/// ```
/// use connector_bridge_rs::{MessageType, OutboundCommand};
///
/// let cmd = OutboundCommand::read_device("AA:BB", "cover");
/// assert_eq!(cmd.msg_type(), &MessageType::ReadDevice);
/// assert!(cmd.payload().is_none());
/// ```
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCommand {
    pub(crate) msg_type: MessageType,
    pub(crate) mac: String,
    pub(crate) device_type: String,
    pub(crate) data: Option<Value>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

impl OutboundCommand {
    pub fn new(msg_type: MessageType, mac: &str, device_type: &str) -> Self {
        OutboundCommand {
            msg_type,
            mac: mac.to_string(),
            device_type: device_type.to_string(),
            data: None,
            extra: Map::new(),
        }
    }

    /// Asks the device to report its position and motion.
    pub fn read_device(mac: &str, device_type: &str) -> Self {
        Self::new(MessageType::ReadDevice, mac, device_type)
    }

    /// Moves the device towards `target`.
    ///
    /// `target` is in platform convention; the payload carries the inverted
    /// device value and the operation derived from the current position.
    ///
    /// ```
    /// use connector_bridge_rs::{OutboundCommand, Position};
    /// use serde_json::json;
    ///
    /// let current = Position::create(70).unwrap();
    /// let target = Position::create(80).unwrap();
    /// let cmd = OutboundCommand::write_position("AA:BB", "cover", current, target);
    /// assert_eq!(cmd.payload(), Some(&json!({"operation": 1, "targetPosition": 20})));
    /// ```
    pub fn write_position(
        mac: &str,
        device_type: &str,
        current: Position,
        target: Position,
    ) -> Self {
        let operation = PositionState::towards(current.value(), target.value());
        let mut cmd = Self::new(MessageType::WriteDevice, mac, device_type);
        cmd.data(json!({
            "operation": operation.operation(),
            "targetPosition": target.inverted().value(),
        }));
        cmd
    }

    /// Set the payload data.
    pub fn data(&mut self, data: Value) -> &mut Self {
        self.data = Some(data);
        self
    }

    /// Attach an extra top-level field.
    ///
    /// Fields named like the transport's own (`msgId`, `AccessToken`) are
    /// overwritten on send.
    pub fn field(&mut self, name: &str, value: Value) -> &mut Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    pub fn msg_type(&self) -> &MessageType {
        &self.msg_type
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn payload(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

/// The wire form of a command: the command plus transport-assigned fields.
#[derive(Debug)]
pub(crate) struct Envelope<'a> {
    pub command: &'a OutboundCommand,
    pub msg_id: u64,
    pub access_token: &'a str,
}

impl Envelope<'_> {
    /// Serializes the envelope into a JSON object.
    ///
    /// Going through a map first lets the injected fields win over any
    /// same-named extra field instead of producing duplicate keys.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut map = match serde_json::to_value(self.command)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        map.insert("msgId".to_string(), json!(self.msg_id));
        map.insert("AccessToken".to_string(), json!(self.access_token));
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_device_wire_shape() {
        let cmd = OutboundCommand::read_device("AA:BB", "cover");
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({"msgType": "ReadDevice", "mac": "AA:BB", "deviceType": "cover"})
        );
    }

    #[test]
    fn test_write_position_decreasing() {
        let cmd = OutboundCommand::write_position(
            "AA:BB",
            "cover",
            Position::create(90).unwrap(),
            Position::create(80).unwrap(),
        );
        assert_eq!(cmd.msg_type(), &MessageType::WriteDevice);
        assert_eq!(
            cmd.payload(),
            Some(&json!({"operation": 0, "targetPosition": 20}))
        );
    }

    #[test]
    fn test_envelope_injects_id_and_token() {
        let mut cmd = OutboundCommand::read_device("AA:BB", "cover");
        cmd.field("AccessToken", json!("stale")).field("zone", json!(3));
        let envelope = Envelope {
            command: &cmd,
            msg_id: 42,
            access_token: "secret",
        };
        let value = envelope.to_value().unwrap();
        assert_eq!(value["msgId"], json!(42));
        assert_eq!(value["AccessToken"], json!("secret"));
        assert_eq!(value["zone"], json!(3));
        assert_eq!(value["msgType"], json!("ReadDevice"));
    }
}
