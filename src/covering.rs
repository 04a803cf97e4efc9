//! Window covering accessory backed by a connector device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};

use crate::bridge::BridgeTransport;
use crate::command::OutboundCommand;
use crate::config::DeviceConfig;
use crate::errors::Error;
use crate::router::{self, EventFilter, Subscription};
use crate::runtime::{self, JoinHandle};
use crate::state::DeviceState;
use crate::types::{MessageType, Position, PositionState};

type Result<T> = std::result::Result<T, Error>;

struct Poller {
    running: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl Poller {
    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// A covering whose state is kept current by polling the bridge.
///
/// The covering listens for `ReadDeviceAck` messages carrying its mac and
/// caches what they report. Getters only read that cache, so they never
/// block on the network; a reply that never comes just leaves the cache
/// stale until a later poll is answered.
///
/// Dropping the covering stops its poller and its subscription.
pub struct WindowCovering {
    device: DeviceConfig,
    bridge: Arc<BridgeTransport>,
    state: Arc<Mutex<DeviceState>>,
    _subscription: Subscription,
    poller: Mutex<Option<Poller>>,
}

impl WindowCovering {
    pub fn new(bridge: Arc<BridgeTransport>, device: DeviceConfig) -> Self {
        let state = Arc::new(Mutex::new(DeviceState::default()));

        let cache = Arc::clone(&state);
        let mac = device.mac.clone();
        let subscription = bridge.subscribe(
            EventFilter::device(&device.mac, MessageType::ReadDeviceAck),
            move |event| {
                let Some(report) = event.device_report() else {
                    debug!("ReadDeviceAck for {} without data", mac);
                    return;
                };
                let mut state = router::lock(&cache);
                if state.apply(&report) {
                    debug!(
                        "{} now at {} ({:?})",
                        mac,
                        state.position().value(),
                        state.state()
                    );
                }
            },
        );

        WindowCovering {
            device,
            bridge,
            state,
            _subscription: subscription,
            poller: Mutex::new(None),
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn name(&self) -> &str {
        self.device.display_name()
    }

    /// Snapshot of the cached state.
    pub fn state(&self) -> DeviceState {
        *router::lock(&self.state)
    }

    pub fn current_position(&self) -> Position {
        let position = self.state().position();
        debug!("Get CurrentPosition of {}: {}", self.name(), position.value());
        position
    }

    pub fn position_state(&self) -> PositionState {
        let state = self.state().state();
        debug!("Get PositionState of {}: {:?}", self.name(), state);
        state
    }

    /// The bridge does not report targets, so this is the current position.
    pub fn target_position(&self) -> Position {
        self.state().position()
    }

    /// Moves the covering to `value` percent open.
    ///
    /// The cache is not touched; it follows the next report.
    pub async fn set_target_position(&self, value: u8) -> Result<()> {
        let target = Position::try_create(value)?;
        let current = self.state().position();
        debug!(
            "Set TargetPosition of {}: {} -> {}",
            self.name(),
            current.value(),
            target.value()
        );
        self.bridge
            .send_message(OutboundCommand::write_position(
                &self.device.mac,
                &self.device.device_type,
                current,
                target,
            ))
            .await
    }

    /// Asks the device for a fresh report.
    pub async fn poll(&self) -> Result<()> {
        self.bridge
            .read_device(&self.device.mac, &self.device.device_type)
            .await
    }

    /// Polls every `interval`, first after one interval has passed.
    ///
    /// Replaces a poller that is already running. Send failures are logged
    /// and retried on the next tick; polling ends once the bridge is closed.
    pub fn start_polling(&self, interval: Duration) {
        let running = Arc::new(AtomicBool::new(true));
        let bridge = Arc::clone(&self.bridge);
        let device = self.device.clone();
        let flag = Arc::clone(&running);

        let handle = runtime::spawn(async move {
            loop {
                runtime::sleep(interval).await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                match bridge.read_device(&device.mac, &device.device_type).await {
                    Ok(()) => {}
                    Err(Error::Closed) => {
                        debug!("Bridge closed; stop polling {}", device.mac);
                        break;
                    }
                    Err(e) => warn!("Polling {} failed: {}", device.mac, e),
                }
            }
        });

        let previous = router::lock(&self.poller).replace(Poller {
            running,
            _handle: handle,
        });
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn stop_polling(&self) {
        if let Some(poller) = router::lock(&self.poller).take() {
            poller.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        router::lock(&self.poller)
            .as_ref()
            .is_some_and(|p| p.running.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for WindowCovering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowCovering")
            .field("device", &self.device)
            .field("state", &self.state())
            .field("polling", &self.is_polling())
            .finish()
    }
}

impl Drop for WindowCovering {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeEndpoint, BridgeOptions};
    use crate::event::InboundEvent;
    use serde_json::{Value, json};
    use tokio::net::UdpSocket as TestSocket;

    async fn setup() -> (TestSocket, Arc<BridgeTransport>) {
        let bridge_socket = TestSocket::bind("127.0.0.1:0").await.unwrap();
        let port = bridge_socket.local_addr().unwrap().port();
        let endpoint = BridgeEndpoint::new(Some("127.0.0.1"), Some(port), Some("secret")).unwrap();
        let transport = BridgeTransport::connect(
            endpoint,
            BridgeOptions {
                bind_addr: "127.0.0.1:0".to_string(),
                ..BridgeOptions::default()
            },
        )
        .await
        .unwrap();
        (bridge_socket, transport)
    }

    async fn recv_json(socket: &TestSocket) -> Value {
        let mut buf = [0u8; 4096];
        let (size, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&buf[..size]).unwrap()
    }

    fn ack(mac: &str, current_position: u64, operation: u64) -> InboundEvent {
        InboundEvent::from_value(json!({
            "msgType": "ReadDeviceAck",
            "mac": mac,
            "data": {"currentPosition": current_position, "operation": operation}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ack_updates_state() {
        let (_bridge, transport) = setup().await;
        let covering = WindowCovering::new(Arc::clone(&transport), DeviceConfig::new("AA:BB", "cover"));

        transport.router().publish(&ack("AA:BB", 30, 1));
        assert_eq!(covering.current_position().value(), 70);
        assert_eq!(covering.target_position().value(), 70);
        assert_eq!(covering.position_state(), PositionState::Increasing);

        transport.router().publish(&ack("CC:DD", 0, 0));
        assert_eq!(covering.current_position().value(), 70);
    }

    #[tokio::test]
    async fn test_set_target_position_direction_and_inversion() {
        let (bridge, transport) = setup().await;
        let covering = WindowCovering::new(Arc::clone(&transport), DeviceConfig::new("AA:BB", "cover"));

        transport.router().publish(&ack("AA:BB", 30, 2));
        covering.set_target_position(80).await.unwrap();
        let sent = recv_json(&bridge).await;
        assert_eq!(sent["msgType"], json!("WriteDevice"));
        assert_eq!(sent["mac"], json!("AA:BB"));
        assert_eq!(sent["data"], json!({"operation": 1, "targetPosition": 20}));

        transport.router().publish(&ack("AA:BB", 10, 2));
        covering.set_target_position(80).await.unwrap();
        let sent = recv_json(&bridge).await;
        assert_eq!(sent["data"], json!({"operation": 0, "targetPosition": 20}));
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_target() {
        let (_bridge, transport) = setup().await;
        let covering = WindowCovering::new(transport, DeviceConfig::new("AA:BB", "cover"));
        assert_eq!(
            covering.set_target_position(150).await,
            Err(Error::InvalidPosition(150))
        );
    }

    #[tokio::test]
    async fn test_polling_sends_read_device() {
        let (bridge, transport) = setup().await;
        let covering = WindowCovering::new(Arc::clone(&transport), DeviceConfig::new("AA:BB", "cover"));

        covering.start_polling(Duration::from_millis(20));
        assert!(covering.is_polling());
        let sent = recv_json(&bridge).await;
        assert_eq!(sent["msgType"], json!("ReadDevice"));
        assert_eq!(sent["deviceType"], json!("cover"));

        covering.stop_polling();
        assert!(!covering.is_polling());
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let (_bridge, transport) = setup().await;
        let covering = WindowCovering::new(Arc::clone(&transport), DeviceConfig::new("AA:BB", "cover"));
        assert_eq!(transport.router().subscriber_count(), 1);
        drop(covering);
        assert_eq!(transport.router().subscriber_count(), 0);
    }
}
