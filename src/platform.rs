//! The platform: one bridge, many coverings.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::bridge::{BridgeContext, BridgeTransport};
use crate::config::{DeviceConfig, PlatformConfig};
use crate::covering::WindowCovering;
use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Owns the coverings configured for a bridge.
///
/// Coverings are kept in configuration order and looked up by mac.
/// Dropping the platform stops every poller and subscription; the bridge
/// itself stays with its [`BridgeContext`].
pub struct Platform {
    bridge: Arc<BridgeTransport>,
    coverings: Vec<WindowCovering>,
    refresh_interval: Duration,
}

impl Platform {
    /// Acquires the bridge from `context` and starts polling every
    /// configured device.
    ///
    /// If this creates the bridge, it uses the context's options with the
    /// configured send failure policy.
    pub async fn start(config: &PlatformConfig, context: &BridgeContext) -> Result<Self> {
        config.validate()?;
        let bridge = context
            .acquire_with(
                config.host.as_deref(),
                config.port,
                config.access_token.as_deref(),
                config.bridge_options(context.options()),
            )
            .await?;

        let mut platform = Platform::new(bridge, config.refresh_interval());
        for device in &config.devices {
            platform.add_device(device.clone())?;
        }
        info!(
            "Platform {} started with {} coverings on {}",
            config.name.as_deref().unwrap_or("connector"),
            platform.len(),
            platform.bridge.endpoint().address()
        );
        Ok(platform)
    }

    /// A platform without devices on an existing bridge.
    pub fn new(bridge: Arc<BridgeTransport>, refresh_interval: Duration) -> Self {
        Platform {
            bridge,
            coverings: Vec::new(),
            refresh_interval,
        }
    }

    pub fn bridge(&self) -> &Arc<BridgeTransport> {
        &self.bridge
    }

    /// Registers a covering and starts polling it.
    pub fn add_device(&mut self, device: DeviceConfig) -> Result<&WindowCovering> {
        if self.covering(&device.mac).is_some() {
            return Err(Error::Config(format!("duplicate device {}", device.mac)));
        }

        let mac = device.mac.clone();
        let covering = WindowCovering::new(Arc::clone(&self.bridge), device);
        covering.start_polling(self.refresh_interval);
        self.coverings.push(covering);
        self.coverings.last().ok_or(Error::UnknownDevice(mac))
    }

    /// Unregisters a covering, stopping its poller and subscription.
    pub fn remove_device(&mut self, mac: &str) -> Result<()> {
        let index = self
            .coverings
            .iter()
            .position(|c| c.device().mac == mac)
            .ok_or_else(|| Error::UnknownDevice(mac.to_string()))?;
        self.coverings.remove(index);
        Ok(())
    }

    pub fn covering(&self, mac: &str) -> Option<&WindowCovering> {
        self.coverings.iter().find(|c| c.device().mac == mac)
    }

    pub fn coverings(&self) -> impl Iterator<Item = &WindowCovering> {
        self.coverings.iter()
    }

    pub fn len(&self) -> usize {
        self.coverings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coverings.is_empty()
    }

    /// Polls every covering once, outside the regular schedule.
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn poll_all(&self) -> Result<()> {
        let mut first_error = None;
        for covering in &self.coverings {
            if let Err(e) = covering.poll().await {
                warn!("Polling {} failed: {}", covering.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stops polling and drops every covering.
    pub fn shutdown(&mut self) {
        for covering in &self.coverings {
            covering.stop_polling();
        }
        self.coverings.clear();
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("bridge", &self.bridge)
            .field("coverings", &self.coverings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeOptions, SendFailurePolicy};
    use crate::event::InboundEvent;
    use serde_json::json;
    use tokio::net::UdpSocket as TestSocket;

    fn local_context() -> BridgeContext {
        BridgeContext::with_options(BridgeOptions {
            bind_addr: "127.0.0.1:0".to_string(),
            ..BridgeOptions::default()
        })
    }

    fn config_for(bridge: &TestSocket) -> PlatformConfig {
        let port = bridge.local_addr().unwrap().port();
        PlatformConfig::from_json(&format!(
            r#"{{
                "host": "127.0.0.1",
                "port": {port},
                "accessToken": "secret",
                "refreshInterval": 60000,
                "devices": [
                    {{"mac": "AA:BB", "deviceType": "cover", "name": "Study"}},
                    {{"mac": "CC:DD", "deviceType": "cover"}}
                ]
            }}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_builds_coverings() {
        let bridge = TestSocket::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(&bridge);
        let context = local_context();

        let platform = Platform::start(&config, &context).await.unwrap();
        assert_eq!(platform.len(), 2);
        assert_eq!(platform.covering("AA:BB").map(|c| c.name()), Some("Study"));
        assert_eq!(platform.covering("CC:DD").map(|c| c.name()), Some("CC:DD"));
        assert!(platform.coverings().all(|c| c.is_polling()));
        assert!(Arc::ptr_eq(platform.bridge(), &context.get().await.unwrap()));

        let event = InboundEvent::from_value(json!({
            "msgType": "ReadDeviceAck",
            "mac": "CC:DD",
            "data": {"currentPosition": 75, "operation": 2}
        }))
        .unwrap();
        platform.bridge().router().publish(&event);
        assert_eq!(platform.covering("CC:DD").unwrap().current_position().value(), 25);
        assert_eq!(platform.covering("AA:BB").unwrap().current_position().value(), 0);
    }

    #[tokio::test]
    async fn test_start_without_endpoint_fails() {
        let config = PlatformConfig::from_json(r#"{"devices": []}"#).unwrap();
        let err = Platform::start(&config, &local_context()).await.unwrap_err();
        assert!(matches!(err, Error::Construction { .. }));
    }

    #[tokio::test]
    async fn test_start_applies_send_failure_policy() {
        // An IPv4 socket cannot reach an IPv6 bridge, so every send fails.
        let config = PlatformConfig::from_json(
            r#"{
                "host": "::1",
                "port": 9,
                "accessToken": "secret",
                "refreshInterval": 60000,
                "sendFailurePolicy": "close",
                "devices": [{"mac": "AA:BB", "deviceType": "cover"}]
            }"#,
        )
        .unwrap();
        let context = local_context();
        let platform = Platform::start(&config, &context).await.unwrap();
        assert_eq!(platform.bridge().send_failure_policy(), SendFailurePolicy::Close);

        assert!(platform.poll_all().await.is_err());
        assert!(!platform.bridge().is_open());
        assert_eq!(platform.poll_all().await, Err(Error::Closed));
    }

    #[tokio::test]
    async fn test_add_device_returns_new_covering() {
        let bridge = TestSocket::bind("127.0.0.1:0").await.unwrap();
        let context = local_context();
        let mut platform = Platform::start(&config_for(&bridge), &context).await.unwrap();

        let mut device = DeviceConfig::new("EE:FF", "cover");
        device.name = Some("Kitchen".to_string());
        let covering = platform.add_device(device).unwrap();
        assert_eq!(covering.name(), "Kitchen");
        assert!(covering.is_polling());
        assert_eq!(platform.len(), 3);
    }

    #[tokio::test]
    async fn test_add_and_remove_devices() {
        let bridge = TestSocket::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(&bridge);
        let context = local_context();
        let mut platform = Platform::start(&config, &context).await.unwrap();

        assert!(platform.add_device(DeviceConfig::new("AA:BB", "cover")).is_err());
        platform.remove_device("AA:BB").unwrap();
        assert_eq!(
            platform.remove_device("AA:BB"),
            Err(Error::UnknownDevice("AA:BB".to_string()))
        );
        assert_eq!(platform.bridge().router().subscriber_count(), 1);

        platform.poll_all().await.unwrap();
        let mut buf = [0u8; 1024];
        let (size, _) = bridge.recv_from(&mut buf).await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&buf[..size]).unwrap();
        assert_eq!(sent["mac"], json!("CC:DD"));

        platform.shutdown();
        assert!(platform.is_empty());
        assert_eq!(platform.bridge().router().subscriber_count(), 0);
    }
}
