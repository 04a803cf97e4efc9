//! # connector_bridge_rs
//!
//! An async Rust client for connector bridges, the UDP gateways that drive
//! motorised blinds and other window coverings.
//!
//! The bridge speaks JSON over UDP without any request/reply correlation:
//! commands go out fire-and-forget, and whatever the bridge sends back is
//! published on an in-process event router. Consumers subscribe with a
//! filter on device mac and message type.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use connector_bridge_rs::{BridgeContext, DeviceConfig, WindowCovering};
//!
//! async fn control_blind() -> Result<(), Box<dyn std::error::Error>> {
//!     // The first acquisition needs the full endpoint; later ones don't.
//!     let bridge = BridgeContext::global()
//!         .acquire(Some("192.168.1.20"), Some(32100), Some("access-token"))
//!         .await?;
//!
//!     let blind = WindowCovering::new(bridge, DeviceConfig::new("f0f5bd2c31d2", "10000000"));
//!     blind.start_polling(Duration::from_secs(10));
//!
//!     blind.set_target_position(40).await?;
//!     println!("at {}", blind.current_position().value());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Single socket**: [`BridgeContext`] hands out one [`BridgeTransport`]
//!   per context, and [`BridgeContext::global`] one per process
//! - **Fire-and-forget commands**: [`BridgeTransport::send_message`] adds
//!   the message id and access token to an [`OutboundCommand`]
//! - **Event fan-out**: [`EventRouter`] delivers every [`InboundEvent`] to
//!   each subscriber whose [`EventFilter`] matches, in arrival order
//! - **Window coverings**: [`WindowCovering`] polls a device and caches its
//!   [`DeviceState`]
//! - **Platform**: [`Platform`] wires up every device in a [`PlatformConfig`]
//! - **Diagnostics**: [`MessageHistory`] keeps recent traffic per bridge
//!
//! ## Runtime Selection
//!
//! Like the socket layer it sits on, the crate is runtime-agnostic:
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod bridge;
mod command;
mod config;
mod covering;
mod errors;
mod event;
mod history;
mod platform;
mod router;
pub mod runtime;
mod state;
mod types;

// Re-export public API
pub use bridge::{
    BridgeContext, BridgeDiagnostics, BridgeEndpoint, BridgeOptions, BridgeTransport,
    SendFailurePolicy,
};
pub use command::OutboundCommand;
pub use config::{DeviceConfig, PlatformConfig};
pub use covering::WindowCovering;
pub use errors::Error;
pub use event::{DeviceReport, InboundEvent};
pub use history::{Direction, HistoryEntry, HistorySummary, MessageHistory};
pub use platform::Platform;
pub use router::{EventFilter, EventRouter, EventStream, Subscription};
pub use state::DeviceState;
pub use types::{MessageType, Position, PositionState};
