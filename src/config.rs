//! Platform configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeOptions, SendFailurePolicy};
use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// One covering attached to the bridge.
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub mac: String,
    pub device_type: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceConfig {
    pub fn new(mac: &str, device_type: &str) -> Self {
        DeviceConfig {
            mac: mac.to_string(),
            device_type: device_type.to_string(),
            name: None,
        }
    }

    /// Display name, falling back to the mac.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.mac)
    }
}

/// The platform's configuration block.
///
/// Unknown keys, such as the host framework's own `platform` entry, are
/// ignored.
///
/// # Examples
///
/// ```
/// use connector_bridge_rs::PlatformConfig;
///
/// let config = PlatformConfig::from_json(r#"{
///     "platform": "ConnectorBridge",
///     "host": "192.168.1.20",
///     "port": 32100,
///     "accessToken": "abc",
///     "refreshInterval": 5000,
///     "devices": [{"mac": "AA:BB", "deviceType": "10000000", "name": "Study"}]
/// }"#).unwrap();
/// assert_eq!(config.devices[0].display_name(), "Study");
/// assert_eq!(config.refresh_interval().as_secs(), 5);
/// ```
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Poll interval in milliseconds.
    #[serde(default = "PlatformConfig::default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub send_failure_policy: SendFailurePolicy,
}

impl PlatformConfig {
    pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10_000;

    fn default_refresh_interval() -> u64 {
        Self::DEFAULT_REFRESH_INTERVAL_MS
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::JsonLoad)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval)
    }

    /// `base` with the configured send failure policy.
    pub fn bridge_options(&self, base: &BridgeOptions) -> BridgeOptions {
        BridgeOptions {
            send_failure_policy: self.send_failure_policy,
            ..base.clone()
        }
    }

    /// Checks the parts the platform relies on.
    ///
    /// The bridge endpoint itself is checked when the bridge is acquired.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval == 0 {
            return Err(Error::Config("refreshInterval must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.mac.is_empty() {
                return Err(Error::Config("device without mac".to_string()));
            }
            if device.device_type.is_empty() {
                return Err(Error::Config(format!(
                    "device {} has no deviceType",
                    device.mac
                )));
            }
            if !seen.insert(device.mac.as_str()) {
                return Err(Error::Config(format!("duplicate device {}", device.mac)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlatformConfig::from_json("{}").unwrap();
        assert_eq!(config.refresh_interval, PlatformConfig::DEFAULT_REFRESH_INTERVAL_MS);
        assert_eq!(config.send_failure_policy, SendFailurePolicy::KeepOpen);
        assert!(config.devices.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_from_json() {
        let config = PlatformConfig::from_json(r#"{"sendFailurePolicy": "close"}"#).unwrap();
        let base = BridgeOptions {
            bind_addr: "127.0.0.1:0".to_string(),
            ..BridgeOptions::default()
        };
        let options = config.bridge_options(&base);
        assert_eq!(options.send_failure_policy, SendFailurePolicy::Close);
        assert_eq!(options.bind_addr, "127.0.0.1:0");
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_interval() {
        let mut config = PlatformConfig::from_json(
            r#"{"devices": [{"mac": "AA:BB", "deviceType": "x"}, {"mac": "AA:BB", "deviceType": "x"}]}"#,
        )
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(Error::Config("duplicate device AA:BB".to_string()))
        );

        config.devices.pop();
        config.refresh_interval = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            PlatformConfig::from_json("{\"port\": \"x\"}"),
            Err(Error::JsonLoad(_))
        ));
    }
}
