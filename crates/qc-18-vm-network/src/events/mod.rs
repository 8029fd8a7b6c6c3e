//! Error types for the VM network subsystem.

use crate::domain::{ChainId, HandlerId, NodeId};
use thiserror::Error;

/// VM network errors.
///
/// Only transport failures and request-id exhaustion ever reach a caller of
/// the wrapped sender. Everything else is logged where it is detected.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Handler limit reached (max: {max})")]
    HandlerLimitReached { max: usize },

    #[error("Handler {0} is not pending")]
    HandlerNotPending(HandlerId),

    #[error("Handler {0} is already bound")]
    HandlerAlreadyBound(HandlerId),

    #[error("Request ids exhausted: {pending} outstanding (max: {max})")]
    RequestIdsExhausted { pending: usize, max: usize },

    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),

    #[error("Unknown chain: {0}")]
    UnknownChain(ChainId),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
