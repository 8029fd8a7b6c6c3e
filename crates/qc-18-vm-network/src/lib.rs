//! # QC-18 VM Application Network
//!
//! Multiplexes several independent sub-protocols over the single
//! application-level transport the host engine gives a VM.
//!
//! **Subsystem ID:** 18
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! The host offers one [`AppSender`] and calls one [`AppHandler`] per VM.
//! Gossip, state sync and any other sub-protocol running inside the VM each
//! need their own view of that transport:
//! - Gossip and requests carry a one-byte handler tag at the end of the payload
//! - Request ids are virtualized per peer so handlers pick ids independently
//! - Connect/disconnect events are fanned out to every bound handler
//!
//! ## Wire Format
//!
//! | Message | Layout | Routed by |
//! |---------|--------|-----------|
//! | Gossip | `payload ‖ handler_id` | trailing tag |
//! | Request | `payload ‖ handler_id` | trailing tag |
//! | Response | `payload` | virtual request id |
//! | Request failed | - | virtual request id |
//!
//! ## Module Structure
//!
//! ```text
//! qc-18-vm-network/
//! ├── domain/          # NodeId, HandlerId, registry, virtualizer, framing, config
//! ├── events/          # NetworkError, ConfigError
//! ├── ports/           # AppHandler, NetworkHandler, AppSender, ConfigProvider
//! ├── service          # NetworkManager (inbound routing, fan-out)
//! ├── sender           # WrappedAppSender (outbound tagging, id virtualization)
//! └── adapters/        # TOML config, in-process loopback transport
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = Arc::new(NetworkManager::new(NetworkConfig::default(), host_sender)?);
//!
//! let (id, sender) = manager.register()?;
//! let gossip = Arc::new(GossipHandler::new(sender));
//! manager.set_handler(id, gossip);
//!
//! // host engine now drives `manager` through `AppHandler`
//! ```

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;
pub mod sender;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use adapters::{LoopbackHub, LoopbackSender, StaticConfigProvider, TomlConfigProvider};
pub use domain::{
    AppVersion, ChainId, HandlerId, NetworkConfig, NetworkMetricsSnapshot, NodeId, RequestId,
};
pub use events::{ConfigError, NetworkError};
pub use ports::{AppHandler, AppSender, ConfigProvider, NetworkHandler};
pub use sender::WrappedAppSender;
pub use service::{NetworkManager, SharedHandler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
