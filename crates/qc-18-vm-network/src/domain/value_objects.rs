//! Configuration and metrics for the VM network layer.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{HandlerId, RequestId};
use crate::events::ConfigError;

/// VM network configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Maximum number of handlers that may ever be registered.
    pub max_handlers: usize,
    /// Maximum outstanding virtual request ids per peer (and for the
    /// cross-chain table).
    pub max_pending_requests_per_peer: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_handlers: HandlerId::SPACE,
            max_pending_requests_per_peer: 65_536,
        }
    }
}

impl NetworkConfig {
    /// Small limits for exercising exhaustion paths in tests.
    pub fn for_testing() -> Self {
        Self {
            max_handlers: 8,
            max_pending_requests_per_peer: 16,
        }
    }

    /// Check limits against what the wire format can express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_handlers == 0 || self.max_handlers > HandlerId::SPACE {
            return Err(ConfigError::Invalid(format!(
                "max_handlers must be in 1..={} (got {})",
                HandlerId::SPACE,
                self.max_handlers
            )));
        }
        if self.max_pending_requests_per_peer == 0
            || self.max_pending_requests_per_peer > RequestId::MAX as usize
        {
            return Err(ConfigError::Invalid(format!(
                "max_pending_requests_per_peer must be in 1..={} (got {})",
                RequestId::MAX,
                self.max_pending_requests_per_peer
            )));
        }
        Ok(())
    }
}

/// Live routing counters.
#[derive(Debug, Default)]
pub struct NetworkMetrics {
    gossip_routed: AtomicU64,
    requests_routed: AtomicU64,
    responses_routed: AtomicU64,
    failures_routed: AtomicU64,
    messages_dropped: AtomicU64,
    handler_errors: AtomicU64,
    requests_sent: AtomicU64,
}

impl NetworkMetrics {
    pub fn record_gossip_routed(&self) {
        self.gossip_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_routed(&self) {
        self.requests_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_routed(&self) {
        self.responses_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure_routed(&self) {
        self.failures_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> NetworkMetricsSnapshot {
        NetworkMetricsSnapshot {
            gossip_routed: self.gossip_routed.load(Ordering::Relaxed),
            requests_routed: self.requests_routed.load(Ordering::Relaxed),
            responses_routed: self.responses_routed.load(Ordering::Relaxed),
            failures_routed: self.failures_routed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`NetworkMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkMetricsSnapshot {
    /// Inbound gossip delivered to a handler.
    pub gossip_routed: u64,
    /// Inbound requests (peer and cross-chain) delivered to a handler.
    pub requests_routed: u64,
    /// Inbound responses (peer and cross-chain) delivered to a handler.
    pub responses_routed: u64,
    /// Inbound request failures (peer and cross-chain) delivered to a handler.
    pub failures_routed: u64,
    /// Inbound messages dropped as unroutable or unresolvable.
    pub messages_dropped: u64,
    /// Handler callbacks that returned an error.
    pub handler_errors: u64,
    /// Single-destination requests handed to the transport.
    pub requests_sent: u64,
}
