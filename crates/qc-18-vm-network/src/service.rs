//! # VM Network Manager
//!
//! Multiplexes every registered sub-protocol over the single [`AppSender`]
//! the host engine gives the VM.
//!
//! ## Architecture
//!
//! ```text
//!            register()/set_handler()
//! [gossip]  ─────────────┐
//! [sync]    ─────────────┤      ┌──────────────────────┐
//! [warp]    ─────────────┴────→ │    NetworkManager    │ ──AppSender──→ host
//!                               │ registry │ virtualizer│ ←─AppHandler── host
//!                               └──────────────────────┘
//! ```
//!
//! - Gossip and requests are routed by their trailing handler tag.
//! - Responses and failures are routed by resolving the transport request id
//!   through the virtualizer.
//! - Connect/disconnect are broadcast to every bound handler.
//!
//! ## Thread Safety
//!
//! All bookkeeping sits behind one `RwLock`. Guards are dropped before any
//! handler callback or transport send is awaited, so a slow handler never
//! stalls routing or registration.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{
    strip_handler_tag, AppVersion, ChainId, HandlerId, HandlerRegistry, NetworkConfig,
    NetworkMetrics, NetworkMetricsSnapshot, NodeId, RequestId, RequestIdVirtualizer,
    RequesterKey,
};
use crate::events::{ConfigError, NetworkError};
use crate::ports::inbound::{AppHandler, NetworkHandler};
use crate::ports::outbound::{AppSender, ConfigProvider};
use crate::sender::WrappedAppSender;

/// Handler as stored in the handler table.
pub type SharedHandler = Arc<dyn NetworkHandler>;

/// Why an inbound message reached no handler.
#[derive(Debug, Error)]
enum DropReason {
    #[error("empty message")]
    EmptyMessage,

    #[error("no handler bound for tag {0}")]
    UnboundHandler(HandlerId),

    #[error("unknown request id")]
    UnknownRequest,

    #[error("handler {0} resolved but not bound")]
    ResolvedToPending(HandlerId),
}

/// State guarded by the manager-wide lock.
struct ManagerState {
    registry: HandlerRegistry<SharedHandler>,
    requests: RequestIdVirtualizer,
}

/// Shared core of a manager and every sender it hands out.
pub(crate) struct ManagerCore<S> {
    pub(crate) sender: Arc<S>,
    pub(crate) metrics: NetworkMetrics,
    state: RwLock<ManagerState>,
}

impl<S> ManagerCore<S> {
    /// Mint a virtual id for an outbound request.
    pub(crate) fn allocate_request_id(
        &self,
        key: RequesterKey,
        handler: HandlerId,
        request_id: RequestId,
    ) -> Result<RequestId, NetworkError> {
        self.state.write().requests.allocate(key, handler, request_id)
    }

    /// Drop the mapping for a virtual id whose send never went out.
    pub(crate) fn release_request_id(&self, key: RequesterKey, virtual_id: RequestId) {
        self.state.write().requests.resolve(key, virtual_id);
    }

    /// Find the handler for a tagged gossip or request payload.
    fn route_incoming(
        &self,
        msg: Vec<u8>,
    ) -> Result<(HandlerId, SharedHandler, Vec<u8>), DropReason> {
        let (handler_id, payload) = strip_handler_tag(msg).ok_or(DropReason::EmptyMessage)?;
        let handler = self
            .state
            .read()
            .registry
            .get(handler_id)
            .cloned()
            .ok_or(DropReason::UnboundHandler(handler_id))?;
        Ok((handler_id, handler, payload))
    }

    /// Resolve a response or failure back to the handler that issued the
    /// request and the request id it chose. Consumes the mapping.
    fn resolve_request(
        &self,
        key: RequesterKey,
        virtual_id: RequestId,
    ) -> Result<(HandlerId, SharedHandler, RequestId), DropReason> {
        let mut state = self.state.write();
        let pending = state
            .requests
            .resolve(key, virtual_id)
            .ok_or(DropReason::UnknownRequest)?;
        let handler = state
            .registry
            .get(pending.handler)
            .cloned()
            .ok_or(DropReason::ResolvedToPending(pending.handler))?;
        Ok((pending.handler, handler, pending.request_id))
    }

    /// Snapshot of bound handlers in ascending id order.
    fn bound_handlers(&self) -> Vec<(HandlerId, SharedHandler)> {
        self.state
            .read()
            .registry
            .iter()
            .map(|(id, h)| (id, Arc::clone(h)))
            .collect()
    }

    /// Log and count a failed handler callback.
    fn observe(
        &self,
        kind: &'static str,
        handler: HandlerId,
        source: &dyn Display,
        result: Result<(), NetworkError>,
    ) {
        if let Err(e) = result {
            self.metrics.record_handler_error();
            warn!(
                handler = %handler,
                source = %source,
                error = %e,
                "Handler could not handle {}",
                kind
            );
        }
    }

    /// Log and count an inbound message that reached no handler.
    fn dropped(
        &self,
        kind: &'static str,
        source: &dyn Display,
        request_id: Option<RequestId>,
        reason: DropReason,
    ) {
        self.metrics.record_dropped();
        debug!(
            source = %source,
            request_id = ?request_id,
            reason = %reason,
            "Could not route incoming {}",
            kind
        );
    }
}

/// VM network manager.
///
/// Sub-protocols call [`register`](Self::register) at startup to obtain a
/// [`HandlerId`] and a [`WrappedAppSender`], then bind their implementation
/// with [`set_handler`](Self::set_handler). The host engine drives the
/// manager through [`AppHandler`].
pub struct NetworkManager<S: AppSender> {
    config: NetworkConfig,
    core: Arc<ManagerCore<S>>,
}

impl<S: AppSender> NetworkManager<S> {
    /// Create a manager over the host transport.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the limits exceed what the wire
    /// format can address.
    pub fn new(config: NetworkConfig, sender: Arc<S>) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = ManagerState {
            registry: HandlerRegistry::new(config.max_handlers),
            requests: RequestIdVirtualizer::new(config.max_pending_requests_per_peer),
        };
        Ok(Self {
            config,
            core: Arc::new(ManagerCore {
                sender,
                metrics: NetworkMetrics::default(),
                state: RwLock::new(state),
            }),
        })
    }

    /// Create a manager with limits taken from a [`ConfigProvider`].
    pub fn from_provider(
        provider: &dyn ConfigProvider,
        sender: Arc<S>,
    ) -> Result<Self, ConfigError> {
        Self::new(provider.network_config(), sender)
    }

    /// Reserve a handler id and return the sender bound to it.
    ///
    /// The sender is usable immediately, before any implementation is bound,
    /// so it can be passed to the constructor that builds the handler.
    ///
    /// # Errors
    ///
    /// Returns `HandlerLimitReached` once `max_handlers` ids were handed out.
    pub fn register(&self) -> Result<(HandlerId, WrappedAppSender<S>), NetworkError> {
        let id = self.core.state.write().registry.reserve()?;
        info!(handler = %id, "Registered network handler");
        Ok((id, WrappedAppSender::new(id, Arc::clone(&self.core))))
    }

    /// Bind an implementation to a registered id.
    ///
    /// Binding an id that is not pending (already bound, or never
    /// registered) is logged and ignored.
    pub fn set_handler(&self, id: HandlerId, handler: SharedHandler) {
        let result = self.core.state.write().registry.bind(id, handler);
        match result {
            Ok(()) => info!(handler = %id, "Bound network handler"),
            Err(e) => error!(handler = %id, error = %e, "Pending handler does not exist"),
        }
    }

    pub fn is_pending(&self, id: HandlerId) -> bool {
        self.core.state.read().registry.is_pending(id)
    }

    pub fn is_bound(&self, id: HandlerId) -> bool {
        self.core.state.read().registry.is_bound(id)
    }

    /// Ids of bound handlers in ascending order.
    pub fn handler_ids(&self) -> Vec<HandlerId> {
        self.core
            .state
            .read()
            .registry
            .iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Outstanding virtual request ids across all peers and chains.
    pub fn pending_requests(&self) -> usize {
        self.core.state.read().requests.pending_total()
    }

    /// Outstanding virtual request ids towards one peer.
    pub fn pending_requests_for(&self, node_id: NodeId) -> usize {
        self.core
            .state
            .read()
            .requests
            .pending_for(&RequesterKey::Node(node_id))
    }

    pub fn metrics(&self) -> NetworkMetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}

#[async_trait]
impl<S: AppSender> AppHandler for NetworkManager<S> {
    async fn connected(&self, node_id: NodeId, version: &AppVersion) {
        for (handler_id, handler) in self.core.bound_handlers() {
            let result = handler.connected(node_id, version).await;
            self.core.observe("Connected", handler_id, &node_id, result);
        }
    }

    async fn disconnected(&self, node_id: NodeId) {
        for (handler_id, handler) in self.core.bound_handlers() {
            let result = handler.disconnected(node_id).await;
            self.core.observe("Disconnected", handler_id, &node_id, result);
        }
    }

    async fn app_gossip(&self, node_id: NodeId, msg: Vec<u8>) {
        let (handler_id, handler, payload) = match self.core.route_incoming(msg) {
            Ok(route) => route,
            Err(reason) => return self.core.dropped("AppGossip", &node_id, None, reason),
        };
        self.core.metrics.record_gossip_routed();
        let result = handler.app_gossip(node_id, payload).await;
        self.core.observe("AppGossip", handler_id, &node_id, result);
    }

    async fn app_request(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) {
        let (handler_id, handler, payload) = match self.core.route_incoming(request) {
            Ok(route) => route,
            Err(reason) => {
                return self
                    .core
                    .dropped("AppRequest", &node_id, Some(request_id), reason)
            }
        };
        self.core.metrics.record_request_routed();
        let result = handler
            .app_request(node_id, request_id, deadline, payload)
            .await;
        self.core.observe("AppRequest", handler_id, &node_id, result);
    }

    async fn app_request_failed(&self, node_id: NodeId, request_id: RequestId) {
        let resolved = self
            .core
            .resolve_request(RequesterKey::Node(node_id), request_id);
        let (handler_id, handler, original_id) = match resolved {
            Ok(route) => route,
            Err(reason) => {
                return self
                    .core
                    .dropped("AppRequestFailed", &node_id, Some(request_id), reason)
            }
        };
        self.core.metrics.record_failure_routed();
        let result = handler.app_request_failed(node_id, original_id).await;
        self.core
            .observe("AppRequestFailed", handler_id, &node_id, result);
    }

    async fn app_response(&self, node_id: NodeId, request_id: RequestId, response: Vec<u8>) {
        let resolved = self
            .core
            .resolve_request(RequesterKey::Node(node_id), request_id);
        let (handler_id, handler, original_id) = match resolved {
            Ok(route) => route,
            Err(reason) => {
                return self
                    .core
                    .dropped("AppResponse", &node_id, Some(request_id), reason)
            }
        };
        self.core.metrics.record_response_routed();
        let result = handler.app_response(node_id, original_id, response).await;
        self.core.observe("AppResponse", handler_id, &node_id, result);
    }

    async fn cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) {
        let (handler_id, handler, payload) = match self.core.route_incoming(request) {
            Ok(route) => route,
            Err(reason) => {
                return self.core.dropped(
                    "CrossChainAppRequest",
                    &chain_id,
                    Some(request_id),
                    reason,
                )
            }
        };
        self.core.metrics.record_request_routed();
        let result = handler
            .cross_chain_app_request(chain_id, request_id, deadline, payload)
            .await;
        self.core
            .observe("CrossChainAppRequest", handler_id, &chain_id, result);
    }

    async fn cross_chain_app_request_failed(&self, chain_id: ChainId, request_id: RequestId) {
        let resolved = self
            .core
            .resolve_request(RequesterKey::CrossChain, request_id);
        let (handler_id, handler, original_id) = match resolved {
            Ok(route) => route,
            Err(reason) => {
                return self.core.dropped(
                    "CrossChainAppRequestFailed",
                    &chain_id,
                    Some(request_id),
                    reason,
                )
            }
        };
        self.core.metrics.record_failure_routed();
        let result = handler
            .cross_chain_app_request_failed(chain_id, original_id)
            .await;
        self.core
            .observe("CrossChainAppRequestFailed", handler_id, &chain_id, result);
    }

    async fn cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) {
        let resolved = self
            .core
            .resolve_request(RequesterKey::CrossChain, request_id);
        let (handler_id, handler, original_id) = match resolved {
            Ok(route) => route,
            Err(reason) => {
                return self.core.dropped(
                    "CrossChainAppResponse",
                    &chain_id,
                    Some(request_id),
                    reason,
                )
            }
        };
        self.core.metrics.record_response_routed();
        let result = handler
            .cross_chain_app_response(chain_id, original_id, response)
            .await;
        self.core
            .observe("CrossChainAppResponse", handler_id, &chain_id, result);
    }
}
