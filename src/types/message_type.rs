//! Connector message types.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

/// The `msgType` field of a connector message.
///
/// Types the crate does not know about are carried verbatim in
/// [`MessageType::Other`] so they can still be routed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum MessageType {
    ReadDevice,
    ReadDeviceAck,
    WriteDevice,
    WriteDeviceAck,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::ReadDevice => "ReadDevice",
            MessageType::ReadDeviceAck => "ReadDeviceAck",
            MessageType::WriteDevice => "WriteDevice",
            MessageType::WriteDeviceAck => "WriteDeviceAck",
            MessageType::Other(name) => name,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ReadDevice" => MessageType::ReadDevice,
            "ReadDeviceAck" => MessageType::ReadDeviceAck,
            "WriteDevice" => MessageType::WriteDevice,
            "WriteDeviceAck" => MessageType::WriteDeviceAck,
            other => MessageType::Other(other.to_string()),
        })
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(msg_type) => msg_type,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_types_round_trip_through_json() {
        let value = serde_json::to_value(MessageType::ReadDeviceAck).unwrap();
        assert_eq!(value, json!("ReadDeviceAck"));
        let parsed: MessageType = serde_json::from_value(json!("WriteDevice")).unwrap();
        assert_eq!(parsed, MessageType::WriteDevice);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let parsed = MessageType::from("Heartbeat");
        assert_eq!(parsed, MessageType::Other("Heartbeat".to_string()));
        assert_eq!(parsed.to_string(), "Heartbeat");
    }
}
