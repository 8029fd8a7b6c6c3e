//! Per-handler sender facade.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::domain::{append_handler_tag, ChainId, HandlerId, NodeId, RequestId, RequesterKey};
use crate::events::NetworkError;
use crate::ports::outbound::AppSender;
use crate::service::ManagerCore;

/// Sender handed to a registered handler.
///
/// Tags gossip and requests with the handler id and re-issues every request
/// under a virtual id, so the handler can pick request ids freely. Holds no
/// mutable state of its own.
pub struct WrappedAppSender<S> {
    handler: HandlerId,
    core: Arc<ManagerCore<S>>,
}

impl<S> WrappedAppSender<S> {
    pub(crate) fn new(handler: HandlerId, core: Arc<ManagerCore<S>>) -> Self {
        Self { handler, core }
    }

    /// Id of the handler this sender tags traffic with.
    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }
}

impl<S> Clone for WrappedAppSender<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler,
            core: Arc::clone(&self.core),
        }
    }
}

impl<S> WrappedAppSender<S> {
    /// Mint a virtual id for a request this handler sends to `key`.
    fn allocate(&self, key: RequesterKey, request_id: RequestId) -> Result<RequestId, NetworkError> {
        let virtual_id = self
            .core
            .allocate_request_id(key, self.handler, request_id)?;
        trace!(
            handler = %self.handler,
            target = %key,
            request_id,
            virtual_id,
            "Issuing virtualized request"
        );
        Ok(virtual_id)
    }

    /// Account for the transport's verdict on a virtualized send. A refused
    /// send can never be answered, so its virtual id is released.
    fn settle(
        &self,
        key: RequesterKey,
        request_id: RequestId,
        virtual_id: RequestId,
        result: Result<(), NetworkError>,
    ) -> Result<(), NetworkError> {
        match result {
            Ok(()) => {
                self.core.metrics.record_request_sent();
                Ok(())
            }
            Err(e) => {
                self.core.release_request_id(key, virtual_id);
                debug!(
                    handler = %self.handler,
                    target = %key,
                    request_id,
                    error = %e,
                    "Transport rejected request"
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<S: AppSender> AppSender for WrappedAppSender<S> {
    /// Fatal on the first transport error; requests already sent to earlier
    /// nodes stay in flight.
    async fn send_app_request(
        &self,
        node_ids: &HashSet<NodeId>,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let request = append_handler_tag(request, self.handler);
        for node_id in node_ids {
            let key = RequesterKey::Node(*node_id);
            let virtual_id = self.allocate(key, request_id)?;
            let destination = HashSet::from([*node_id]);
            let result = self
                .core
                .sender
                .send_app_request(&destination, virtual_id, request.clone())
                .await;
            self.settle(key, request_id, virtual_id, result)?;
        }
        Ok(())
    }

    async fn send_app_response(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        // The requester recovers its handler from the request id.
        self.core
            .sender
            .send_app_response(node_id, request_id, response)
            .await
    }

    async fn send_app_gossip(&self, gossip: Vec<u8>) -> Result<(), NetworkError> {
        self.core
            .sender
            .send_app_gossip(append_handler_tag(gossip, self.handler))
            .await
    }

    async fn send_app_gossip_specific(
        &self,
        node_ids: &HashSet<NodeId>,
        gossip: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.core
            .sender
            .send_app_gossip_specific(node_ids, append_handler_tag(gossip, self.handler))
            .await
    }

    async fn send_cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let key = RequesterKey::CrossChain;
        let virtual_id = self.allocate(key, request_id)?;
        let result = self
            .core
            .sender
            .send_cross_chain_app_request(
                chain_id,
                virtual_id,
                append_handler_tag(request, self.handler),
            )
            .await;
        self.settle(key, request_id, virtual_id, result)
    }

    async fn send_cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.core
            .sender
            .send_cross_chain_app_response(chain_id, request_id, response)
            .await
    }
}
