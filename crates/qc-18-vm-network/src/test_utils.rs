//! Recording doubles for the VM network ports.
//!
//! Available to this crate's tests and, through the `test-utils` feature, to
//! the workspace integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use crate::domain::{AppVersion, ChainId, NodeId, RequestId};
use crate::events::NetworkError;
use crate::ports::{AppHandler, AppSender, NetworkHandler};

/// Install a test-friendly subscriber once per process. Honors `RUST_LOG`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A call observed by a recording handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerEvent {
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

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<HandlerEvent>>,
    notify: Notify,
}

impl EventLog {
    fn push(&self, event: HandlerEvent) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }

    fn snapshot(&self) -> Vec<HandlerEvent> {
        self.events.lock().clone()
    }

    async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let reached = async {
            loop {
                let notified = self.notify.notified();
                if self.events.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, reached).await.is_ok()
    }
}

/// Host-facing recorder: stands in for a whole VM behind a transport.
#[derive(Default)]
pub struct RecordingApp {
    log: EventLog,
}

impl RecordingApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.log.snapshot()
    }

    /// Wait until at least `count` events were recorded.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.log.wait_for(count, timeout).await
    }
}

#[async_trait]
impl AppHandler for RecordingApp {
    async fn connected(&self, node_id: NodeId, version: &AppVersion) {
        self.log
            .push(HandlerEvent::Connected(node_id, version.clone()));
    }

    async fn disconnected(&self, node_id: NodeId) {
        self.log.push(HandlerEvent::Disconnected(node_id));
    }

    async fn app_gossip(&self, node_id: NodeId, msg: Vec<u8>) {
        self.log.push(HandlerEvent::Gossip(node_id, msg));
    }

    async fn app_request(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) {
        self.log
            .push(HandlerEvent::Request(node_id, request_id, deadline, request));
    }

    async fn app_request_failed(&self, node_id: NodeId, request_id: RequestId) {
        self.log
            .push(HandlerEvent::RequestFailed(node_id, request_id));
    }

    async fn app_response(&self, node_id: NodeId, request_id: RequestId, response: Vec<u8>) {
        self.log
            .push(HandlerEvent::Response(node_id, request_id, response));
    }

    async fn cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) {
        self.log.push(HandlerEvent::CrossChainRequest(
            chain_id, request_id, deadline, request,
        ));
    }

    async fn cross_chain_app_request_failed(&self, chain_id: ChainId, request_id: RequestId) {
        self.log
            .push(HandlerEvent::CrossChainRequestFailed(chain_id, request_id));
    }

    async fn cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) {
        self.log
            .push(HandlerEvent::CrossChainResponse(chain_id, request_id, response));
    }
}

/// Sub-protocol recorder. Optionally fails every call after recording it.
#[derive(Default)]
pub struct RecordingHandler {
    log: EventLog,
    failing: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that records, then returns an error from every call.
    pub fn failing() -> Self {
        let handler = Self::default();
        handler.failing.store(true, Ordering::SeqCst);
        handler
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.log.snapshot()
    }

    /// Wait until at least `count` events were recorded.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.log.wait_for(count, timeout).await
    }

    fn record(&self, event: HandlerEvent) -> Result<(), NetworkError> {
        self.log.push(event);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NetworkError::Handler("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkHandler for RecordingHandler {
    async fn connected(&self, node_id: NodeId, version: &AppVersion) -> Result<(), NetworkError> {
        self.record(HandlerEvent::Connected(node_id, version.clone()))
    }

    async fn disconnected(&self, node_id: NodeId) -> Result<(), NetworkError> {
        self.record(HandlerEvent::Disconnected(node_id))
    }

    async fn app_gossip(&self, node_id: NodeId, msg: Vec<u8>) -> Result<(), NetworkError> {
        self.record(HandlerEvent::Gossip(node_id, msg))
    }

    async fn app_request(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.record(HandlerEvent::Request(node_id, request_id, deadline, request))
    }

    async fn app_request_failed(
        &self,
        node_id: NodeId,
        request_id: RequestId,
    ) -> Result<(), NetworkError> {
        self.record(HandlerEvent::RequestFailed(node_id, request_id))
    }

    async fn app_response(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.record(HandlerEvent::Response(node_id, request_id, response))
    }

    async fn cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        deadline: Instant,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.record(HandlerEvent::CrossChainRequest(
            chain_id, request_id, deadline, request,
        ))
    }

    async fn cross_chain_app_request_failed(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
    ) -> Result<(), NetworkError> {
        self.record(HandlerEvent::CrossChainRequestFailed(chain_id, request_id))
    }

    async fn cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.record(HandlerEvent::CrossChainResponse(chain_id, request_id, response))
    }
}

/// A message accepted by a [`RecordingSender`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    Request(HashSet<NodeId>, RequestId, Vec<u8>),
    Response(NodeId, RequestId, Vec<u8>),
    Gossip(Vec<u8>),
    GossipSpecific(HashSet<NodeId>, Vec<u8>),
    CrossChainRequest(ChainId, RequestId, Vec<u8>),
    CrossChainResponse(ChainId, RequestId, Vec<u8>),
}

/// Host transport double. Records accepted sends; refused sends are not
/// recorded.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMessage>>,
    fail_all: AtomicBool,
    failing_nodes: Mutex<HashSet<NodeId>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every send while `fail` is set.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Refuse requests addressed to `node_id`.
    pub fn fail_node(&self, node_id: NodeId) {
        self.failing_nodes.lock().insert(node_id);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Accepted requests flattened to `(node, request id, payload)`.
    pub fn requests(&self) -> Vec<(NodeId, RequestId, Vec<u8>)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                SentMessage::Request(nodes, id, payload) => Some(
                    nodes
                        .iter()
                        .map(|n| (*n, *id, payload.clone()))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    fn check(&self, node_ids: &[NodeId]) -> Result<(), NetworkError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(NetworkError::Transport("transport closed".into()));
        }
        let failing = self.failing_nodes.lock();
        if let Some(node_id) = node_ids.iter().find(|n| failing.contains(*n)) {
            return Err(NetworkError::Transport(format!("{node_id} unreachable")));
        }
        Ok(())
    }

    fn record(&self, msg: SentMessage) -> Result<(), NetworkError> {
        self.sent.lock().push(msg);
        Ok(())
    }
}

#[async_trait]
impl AppSender for RecordingSender {
    async fn send_app_request(
        &self,
        node_ids: &HashSet<NodeId>,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let nodes: Vec<NodeId> = node_ids.iter().copied().collect();
        self.check(&nodes)?;
        self.record(SentMessage::Request(node_ids.clone(), request_id, request))
    }

    async fn send_app_response(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.check(&[])?;
        self.record(SentMessage::Response(node_id, request_id, response))
    }

    async fn send_app_gossip(&self, gossip: Vec<u8>) -> Result<(), NetworkError> {
        self.check(&[])?;
        self.record(SentMessage::Gossip(gossip))
    }

    async fn send_app_gossip_specific(
        &self,
        node_ids: &HashSet<NodeId>,
        gossip: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.check(&[])?;
        self.record(SentMessage::GossipSpecific(node_ids.clone(), gossip))
    }

    async fn send_cross_chain_app_request(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        request: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.check(&[])?;
        self.record(SentMessage::CrossChainRequest(chain_id, request_id, request))
    }

    async fn send_cross_chain_app_response(
        &self,
        chain_id: ChainId,
        request_id: RequestId,
        response: Vec<u8>,
    ) -> Result<(), NetworkError> {
        self.check(&[])?;
        self.record(SentMessage::CrossChainResponse(chain_id, request_id, response))
    }
}
