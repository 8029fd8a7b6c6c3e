//! Inbound ports (API) for the VM network subsystem.

use async_trait::async_trait;
use std::time::Instant;

use crate::domain::{AppVersion, ChainId, NodeId, RequestId};
use crate::events::NetworkError;

/// Entry points the host engine calls for traffic addressed to this VM.
///
/// Implemented by [`NetworkManager`](crate::NetworkManager). None of these
/// calls report failures upward: unroutable traffic and handler errors are
/// logged and dropped.
#[async_trait]
pub trait AppHandler: Send + Sync {
    /// A peer connected.
    async fn connected(&self, node_id: NodeId, version: &AppVersion);

    /// A peer disconnected.
    async fn disconnected(&self, node_id: NodeId);

    /// Gossip from a peer. The payload still carries its handler tag.
    async fn app_gossip(&self, node_id: NodeId, msg: Vec<u8>);

    /// Request from a peer. The payload still carries its handler tag.
    async fn app_request(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    );

    /// A request this VM sent under `request_id` will not be answered.
    async fn app_request_failed(&self, node_id: NodeId, request_id: RequestId);

    /// Response to a request this VM sent under `request_id`.
    async fn app_response(&self, node_id: NodeId, request_id: RequestId, response: Vec<u8>);

    /// Request from another chain on this node.
    async fn cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    );

    /// A cross-chain request this VM sent will not be answered.
    async fn cross_chain_app_request_failed(&self, chain_id: ChainId, request_id: RequestId);

    /// Response to a cross-chain request this VM sent.
    async fn cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    );
}

/// Capability set every registered sub-protocol implements.
///
/// The manager strips the handler tag before calling in, and request ids on
/// responses and failures are the ids the handler itself chose when sending.
#[async_trait]
pub trait NetworkHandler: Send + Sync {
    async fn connected(&self, node_id: NodeId, version: &AppVersion) -> Result<(), NetworkError>;

    async fn disconnected(&self, node_id: NodeId) -> Result<(), NetworkError>;

    async fn app_gossip(&self, node_id: NodeId, msg: Vec<u8>) -> Result<(), NetworkError>;

    /// `deadline` is the host's, passed through untouched.
    async fn app_request(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) -> Result<(), NetworkError>;

    async fn app_request_failed(
        &self,
        node_id: NodeId,
        request_id: RequestId,
    ) -> Result<(), NetworkError>;

    async fn app_response(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError>;

    async fn cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) -> Result<(), NetworkError>;

    async fn cross_chain_app_request_failed(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
    ) -> Result<(), NetworkError>;

    async fn cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError>;
}
