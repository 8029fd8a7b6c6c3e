//! Adapters: configuration sources and an in-process transport.

mod config;
pub mod loopback;

pub use config::{StaticConfigProvider, TomlConfigProvider};
pub use loopback::{LoopbackHub, LoopbackSender, DEFAULT_REQUEST_TIMEOUT};
