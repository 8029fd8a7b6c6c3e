//! Outbound ports (SPI) for the VM network subsystem.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::domain::{ChainId, NetworkConfig, NodeId, RequestId};
use crate::events::NetworkError;

/// Application-level sender.
///
/// The host transport implements this once per VM. Every handler is handed a
/// [`WrappedAppSender`](crate::WrappedAppSender), which implements the same
/// trait, so a handler cannot tell it is sharing the transport.
///
/// An error from any method is fatal for that call.
#[async_trait]
pub trait AppSender: Send + Sync {
    /// Send a request to each node in `node_ids`.
    ///
    /// `Ok` guarantees that for each node exactly one of `app_response` or
    /// `app_request_failed` carrying `request_id` will eventually arrive.
    async fn send_app_request(
        &self,
        node_ids: &HashSet<NodeId>,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError>;

    /// Answer a request received from `node_id` under `request_id`.
    async fn send_app_response(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError>;

    /// Gossip to the transport's choice of peers.
    async fn send_app_gossip(&self, gossip: Vec<u8>) -> Result<(), NetworkError>;

    /// Gossip to the given peers.
    async fn send_app_gossip_specific(
        &self,
        node_ids: &HashSet<NodeId>,
        gossip: Vec<u8>,
    ) -> Result<(), NetworkError>;

    /// Send a request to another chain on this node.
    ///
    /// `Ok` guarantees exactly one of `cross_chain_app_response` or
    /// `cross_chain_app_request_failed` from `chain_id` carrying `request_id`.
    async fn send_cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError>;

    /// Answer a cross-chain request received from `chain_id`.
    async fn send_cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError>;
}

/// Source of [`NetworkConfig`].
pub trait ConfigProvider: Send + Sync {
    fn network_config(&self) -> NetworkConfig;
}
