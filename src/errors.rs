use std::string::FromUtf8Error;

/// All error types that can occur when talking to a connector bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bridge was acquired for the first time without a full endpoint.
    #[error("cannot create bridge transport; missing {missing}")]
    Construction { missing: String },

    /// Failed to serialize data to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// Failed to deserialize JSON data.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),

    /// A datagram decoded to JSON that is not an object.
    #[error("inbound message is not a json object")]
    NotAnObject,

    /// A network socket operation failed while communicating with the bridge.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// A datagram from the bridge contained invalid UTF-8.
    #[error("utf8 decoding error: {0:?}")]
    Utf8Decode(FromUtf8Error),

    /// The transport was closed and no longer sends.
    #[error("bridge transport is closed")]
    Closed,

    /// A position outside 0-100 was requested.
    #[error("invalid position {0}; expected 0-100")]
    InvalidPosition(u8),

    /// No covering with this mac is registered.
    #[error("unknown device {0}")]
    UnknownDevice(String),

    /// The platform configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new construction error naming the missing parts
    pub fn construction(missing: &[&str]) -> Self {
        Error::Construction {
            missing: missing.join(", "),
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
