//! In-process transport connecting several VMs without sockets.
//!
//! Every VM is attached to a [`LoopbackHub`] under a `(node, chain)` address.
//! Peer traffic stays on one chain and crosses nodes; cross-chain traffic
//! stays on one node and crosses chains. Deliveries run on spawned Tokio
//! tasks, so a handler calling back into the hub never re-enters itself.
//!
//! Requests are tracked until answered. If no response arrives within the
//! hub's request timeout the requester gets a request-failed notification,
//! so every accepted request ends in exactly one response or failure.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::domain::{AppVersion, ChainId, NodeId, RequestId};
use crate::events::NetworkError;
use crate::ports::{AppHandler, AppSender};

/// Request timeout used by [`LoopbackHub::with_default_timeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Address {
    node: NodeId,
    chain: ChainId,
}

/// A request awaiting its response or timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Exchange {
    requester: Address,
    responder: Address,
    request_id: RequestId,
}

struct Endpoint {
    version: AppVersion,
    handler: Weak<dyn AppHandler>,
}

/// One inbound call to a VM.
enum Delivery {
    Connected(NodeId, AppVersion),
    Disconnected(NodeId),
    Gossip(NodeId, Vec<u8>),
    Request(NodeId, RequestId, Instant, Vec<u8>),
    RequestFailed(NodeId, RequestId),
    Response(NodeId, RequestId, Vec<u8>),
    CrossChainRequest(ChainId, RequestId, Instant, Vec<u8>),
    CrossChainRequestFailed(ChainId, RequestId),
    CrossChainResponse(ChainId, RequestId, Vec<u8>),
}

impl Delivery {
    async fn dispatch(self, handler: &dyn AppHandler) {
        match self {
            Delivery::Connected(node, version) => handler.connected(node, &version).await,
            Delivery::Disconnected(node) => handler.disconnected(node).await,
            Delivery::Gossip(node, msg) => handler.app_gossip(node, msg).await,
            Delivery::Request(node, id, deadline, msg) => {
                handler.app_request(node, id, deadline, msg).await
            }
            Delivery::RequestFailed(node, id) => handler.app_request_failed(node, id).await,
            Delivery::Response(node, id, msg) => handler.app_response(node, id, msg).await,
            Delivery::CrossChainRequest(chain, id, deadline, msg) => {
                handler
                    .cross_chain_app_request(chain, id, deadline, msg)
                    .await
            }
            Delivery::CrossChainRequestFailed(chain, id) => {
                handler.cross_chain_app_request_failed(chain, id).await
            }
            Delivery::CrossChainResponse(chain, id, msg) => {
                handler.cross_chain_app_response(chain, id, msg).await
            }
        }
    }
}

fn deliver(handler: Weak<dyn AppHandler>, delivery: Delivery) {
    tokio::spawn(async move {
        if let Some(handler) = handler.upgrade() {
            delivery.dispatch(handler.as_ref()).await;
        }
    });
}

/// Tell every VM on `departed`'s chain that it disconnected.
fn announce_departure(endpoints: &HashMap<Address, Endpoint>, departed: Address) {
    for (peer, endpoint) in endpoints {
        if peer.chain == departed.chain && peer.node != departed.node {
            deliver(
                endpoint.handler.clone(),
                Delivery::Disconnected(departed.node),
            );
        }
    }
}

/// Shared medium for a set of in-process VMs.
///
/// Holds handlers weakly; dropping a VM detaches it in effect, although
/// [`detach`](Self::detach) should be used to notify its peers.
pub struct LoopbackHub {
    endpoints: RwLock<HashMap<Address, Endpoint>>,
    outstanding: Mutex<HashSet<Exchange>>,
    request_timeout: Duration,
}

impl LoopbackHub {
    pub fn new(request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            outstanding: Mutex::new(HashSet::new()),
            request_timeout,
        })
    }

    pub fn with_default_timeout() -> Arc<Self> {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Transport for the VM at `(node_id, chain_id)`.
    pub fn sender(self: &Arc<Self>, node_id: NodeId, chain_id: ChainId) -> LoopbackSender {
        LoopbackSender {
            address: Address {
                node: node_id,
                chain: chain_id,
            },
            hub: Arc::clone(self),
        }
    }

    /// Attach a VM and exchange connect notifications with every VM already
    /// on the same chain. Re-attaching an address first detaches the old VM,
    /// so its peers see a disconnect before the new connect. Must be called
    /// within a Tokio runtime.
    pub fn attach<H>(
        &self,
        node_id: NodeId,
        chain_id: ChainId,
        version: AppVersion,
        handler: &Arc<H>,
    ) where
        H: AppHandler + 'static,
    {
        let handler: Arc<dyn AppHandler> = handler.clone();
        let handler = Arc::downgrade(&handler);
        let address = Address {
            node: node_id,
            chain: chain_id,
        };

        let mut endpoints = self.endpoints.write();
        if endpoints.remove(&address).is_some() {
            announce_departure(&endpoints, address);
            debug!(node = %node_id, chain = %chain_id, "Replacing VM on loopback hub");
        }
        for (peer, endpoint) in endpoints.iter() {
            if peer.chain != chain_id || peer.node == node_id {
                continue;
            }
            deliver(
                endpoint.handler.clone(),
                Delivery::Connected(node_id, version.clone()),
            );
            deliver(
                handler.clone(),
                Delivery::Connected(peer.node, endpoint.version.clone()),
            );
        }
        endpoints.insert(address, Endpoint { version, handler });
        debug!(node = %node_id, chain = %chain_id, "Attached VM to loopback hub");
    }

    /// Detach a VM and notify its peers on the same chain. Requests it had
    /// not answered time out.
    pub fn detach(&self, node_id: NodeId, chain_id: ChainId) {
        let address = Address {
            node: node_id,
            chain: chain_id,
        };
        let mut endpoints = self.endpoints.write();
        if endpoints.remove(&address).is_none() {
            return;
        }
        announce_departure(&endpoints, address);
        debug!(node = %node_id, chain = %chain_id, "Detached VM from loopback hub");
    }

    pub fn is_attached(&self, node_id: NodeId, chain_id: ChainId) -> bool {
        self.endpoints.read().contains_key(&Address {
            node: node_id,
            chain: chain_id,
        })
    }

    /// Requests accepted but neither answered nor timed out.
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding.lock().len()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn lookup(&self, address: Address) -> Option<Weak<dyn AppHandler>> {
        self.endpoints
            .read()
            .get(&address)
            .map(|endpoint| endpoint.handler.clone())
    }

    fn chain_peers(&self, from: Address) -> Vec<(NodeId, Weak<dyn AppHandler>)> {
        self.endpoints
            .read()
            .iter()
            .filter(|(address, _)| address.chain == from.chain && address.node != from.node)
            .map(|(address, endpoint)| (address.node, endpoint.handler.clone()))
            .collect()
    }

    /// Record all exchanges or none of them.
    fn open(&self, exchanges: &[Exchange]) -> Result<(), NetworkError> {
        let mut outstanding = self.outstanding.lock();
        if let Some(dup) = exchanges.iter().find(|e| outstanding.contains(e)) {
            return Err(NetworkError::Transport(format!(
                "request id {} already outstanding",
                dup.request_id
            )));
        }
        outstanding.extend(exchanges.iter().copied());
        Ok(())
    }

    fn close(&self, exchange: &Exchange) -> bool {
        self.outstanding.lock().remove(exchange)
    }

    fn arm_timeout(self: &Arc<Self>, exchange: Exchange, failure: Delivery) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(hub.request_timeout).await;
            if !hub.close(&exchange) {
                return;
            }
            trace!(
                request_id = exchange.request_id,
                responder = %exchange.responder.node,
                "Loopback request timed out"
            );
            if let Some(requester) = hub.lookup(exchange.requester) {
                deliver(requester, failure);
            }
        });
    }
}

/// [`AppSender`] for one VM attached to a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackSender {
    address: Address,
    hub: Arc<LoopbackHub>,
}

impl LoopbackSender {
    pub fn node_id(&self) -> NodeId {
        self.address.node
    }

    pub fn chain_id(&self) -> ChainId {
        self.address.chain
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.hub.request_timeout
    }
}

#[async_trait]
impl AppSender for LoopbackSender {
    /// Refuses the whole call if any destination is not attached.
    async fn send_app_request(
        &self,
        node_ids: &HashSet<NodeId>,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let mut targets = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let responder = Address {
                node: *node_id,
                chain: self.address.chain,
            };
            let handler = self
                .hub
                .lookup(responder)
                .ok_or(NetworkError::UnknownPeer(*node_id))?;
            let exchange = Exchange {
                requester: self.address,
                responder,
                request_id,
            };
            targets.push((exchange, handler));
        }

        let exchanges: Vec<Exchange> = targets.iter().map(|(e, _)| *e).collect();
        self.hub.open(&exchanges)?;

        let deadline = self.deadline();
        for (exchange, handler) in targets {
            deliver(
                handler,
                Delivery::Request(self.address.node, request_id, deadline, request.clone()),
            );
            self.hub.arm_timeout(
                exchange,
                Delivery::RequestFailed(exchange.responder.node, request_id),
            );
        }
        Ok(())
    }

    async fn send_app_response(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let exchange = Exchange {
            requester: Address {
                node: node_id,
                chain: self.address.chain,
            },
            responder: self.address,
            request_id,
        };
        if !self.hub.close(&exchange) {
            trace!(peer = %node_id, request_id, "Dropping response to unknown request");
            return Ok(());
        }
        if let Some(requester) = self.hub.lookup(exchange.requester) {
            deliver(
                requester,
                Delivery::Response(self.address.node, request_id, response),
            );
        }
        Ok(())
    }

    async fn send_app_gossip(&self, gossip: Vec<u8>) -> Result<(), NetworkError> {
        for (_, handler) in self.hub.chain_peers(self.address) {
            deliver(handler, Delivery::Gossip(self.address.node, gossip.clone()));
        }
        Ok(())
    }

    async fn send_app_gossip_specific(
        &self,
        node_ids: &HashSet<NodeId>,
        gossip: Vec<u8>,
    ) -> Result<(), NetworkError> {
        for node_id in node_ids {
            if *node_id == self.address.node {
                continue;
            }
            let peer = Address {
                node: *node_id,
                chain: self.address.chain,
            };
            if let Some(handler) = self.hub.lookup(peer) {
                deliver(handler, Delivery::Gossip(self.address.node, gossip.clone()));
            }
        }
        Ok(())
    }

    async fn send_cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let responder = Address {
            node: self.address.node,
            chain: chain_id,
        };
        let handler = self
            .hub
            .lookup(responder)
            .ok_or(NetworkError::UnknownChain(chain_id))?;
        let exchange = Exchange {
            requester: self.address,
            responder,
            request_id,
        };
        self.hub.open(&[exchange])?;

        deliver(
            handler,
            Delivery::CrossChainRequest(self.address.chain, request_id, self.deadline(), request),
        );
        self.hub.arm_timeout(
            exchange,
            Delivery::CrossChainRequestFailed(chain_id, request_id),
        );
        Ok(())
    }

    async fn send_cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let exchange = Exchange {
            requester: Address {
                node: self.address.node,
                chain: chain_id,
            },
            responder: self.address,
            request_id,
        };
        if !self.hub.close(&exchange) {
            trace!(chain = %chain_id, request_id, "Dropping response to unknown cross-chain request");
            return Ok(());
        }
        if let Some(requester) = self.hub.lookup(exchange.requester) {
            deliver(
                requester,
                Delivery::CrossChainResponse(self.address.chain, request_id, response),
            );
        }
        Ok(())
    }
}
