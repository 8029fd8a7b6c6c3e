//! Ports: the traits the manager exposes and the traits it depends on.

pub mod inbound;
pub mod outbound;

pub use inbound::{AppHandler, NetworkHandler};
pub use outbound::{AppSender, ConfigProvider};
