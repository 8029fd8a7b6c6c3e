//! # Multi-VM Flows
//!
//! Every VM registers the same sub-protocols in the same order, so handler
//! ids line up across nodes. Tested flows:
//!
//! 1. **Request/response**: two handlers on one VM reuse request id 7 towards
//!    the same peer and each gets its own answer back
//! 2. **Timeout**: an unanswered request surfaces as a failure carrying the
//!    handler's own id
//! 3. **Gossip**: a handler's gossip reaches only the same handler on peers
//! 4. **Cross-chain**: request/response between two chains on one node
//! 5. **Lifecycle**: connect/disconnect reach every handler

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use qc_18_vm_network::test_utils::{init_test_tracing, HandlerEvent, RecordingHandler};
    use qc_18_vm_network::{
        AppSender, AppVersion, ChainId, HandlerId, LoopbackHub, LoopbackSender, NetworkConfig,
        NetworkError, NetworkHandler, NetworkManager, NodeId, RequestId, WrappedAppSender,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const WAIT: Duration = Duration::from_secs(2);

    const NODE_A: NodeId = NodeId([0xA0; 20]);
    const NODE_B: NodeId = NodeId([0xB0; 20]);
    const NODE_C: NodeId = NodeId([0xC0; 20]);
    const NODE_Z: NodeId = NodeId([0xFF; 20]);

    const CHAIN_1: ChainId = ChainId([0x01; 32]);
    const CHAIN_2: ChainId = ChainId([0x02; 32]);

    fn version() -> AppVersion {
        AppVersion::new("qc-vm", 1, 0, 0)
    }

    /// Sub-protocol that records everything and, if `answers`, replies to
    /// each request with `re:` followed by its handler tag and the request.
    struct EchoHandler {
        sender: WrappedAppSender<LoopbackSender>,
        log: RecordingHandler,
        answers: bool,
    }

    impl EchoHandler {
        fn reply(&self, request: &[u8]) -> Vec<u8> {
            let mut reply = b"re:".to_vec();
            reply.push(self.sender.handler_id().tag());
            reply.extend_from_slice(request);
            reply
        }
    }

    #[async_trait]
    impl NetworkHandler for EchoHandler {
        async fn connected(
            &self,
            node_id: NodeId,
            version: &AppVersion,
        ) -> Result<(), NetworkError> {
            self.log.connected(node_id, version).await
        }

        async fn disconnected(&self, node_id: NodeId) -> Result<(), NetworkError> {
            self.log.disconnected(node_id).await
        }

        async fn app_gossip(&self, node_id: NodeId, msg: Vec<u8>) -> Result<(), NetworkError> {
            self.log.app_gossip(node_id, msg).await
        }

        async fn app_request(
            &self,
            node_id: NodeId,
            request_id: RequestId,
            deadline: Instant,
            request: Vec<u8>,
        ) -> Result<(), NetworkError> {
            let reply = self.reply(&request);
            self.log
                .app_request(node_id, request_id, deadline, request)
                .await?;
            if self.answers {
                self.sender
                    .send_app_response(node_id, request_id, reply)
                    .await?;
            }
            Ok(())
        }

        async fn app_request_failed(
            &self,
            node_id: NodeId,
            request_id: RequestId,
        ) -> Result<(), NetworkError> {
            self.log.app_request_failed(node_id, request_id).await
        }

        async fn app_response(
            &self,
            node_id: NodeId,
            request_id: RequestId,
            response: Vec<u8>,
        ) -> Result<(), NetworkError> {
            self.log.app_response(node_id, request_id, response).await
        }

        async fn cross_chain_app_request(
            &self,
            chain_id: ChainId,
            request_id: RequestId,
            deadline: Instant,
            request: Vec<u8>,
        ) -> Result<(), NetworkError> {
            let reply = self.reply(&request);
            self.log
                .cross_chain_app_request(chain_id, request_id, deadline, request)
                .await?;
            if self.answers {
                self.sender
                    .send_cross_chain_app_response(chain_id, request_id, reply)
                    .await?;
            }
            Ok(())
        }

        async fn cross_chain_app_request_failed(
            &self,
            chain_id: ChainId,
            request_id: RequestId,
        ) -> Result<(), NetworkError> {
            self.log
                .cross_chain_app_request_failed(chain_id, request_id)
                .await
        }

        async fn cross_chain_app_response(
            &self,
            chain_id: ChainId,
            request_id: RequestId,
            response: Vec<u8>,
        ) -> Result<(), NetworkError> {
            self.log
                .cross_chain_app_response(chain_id, request_id, response)
                .await
        }
    }

    /// A VM with two echo sub-protocols (ids 0 and 1) attached to the hub.
    struct TestVm {
        manager: Arc<NetworkManager<LoopbackSender>>,
        handlers: Vec<Arc<EchoHandler>>,
    }

    impl TestVm {
        fn sender(&self, i: usize) -> &WrappedAppSender<LoopbackSender> {
            &self.handlers[i].sender
        }

        fn log(&self, i: usize) -> &RecordingHandler {
            &self.handlers[i].log
        }
    }

    fn spawn_vm(hub: &Arc<LoopbackHub>, node: NodeId, chain: ChainId, answers: bool) -> TestVm {
        init_test_tracing();
        let transport = Arc::new(hub.sender(node, chain));
        let manager = Arc::new(NetworkManager::new(NetworkConfig::default(), transport).unwrap());

        let handlers: Vec<Arc<EchoHandler>> = (0..2)
            .map(|_| {
                let (id, sender) = manager.register().unwrap();
                let handler = Arc::new(EchoHandler {
                    sender,
                    log: RecordingHandler::new(),
                    answers,
                });
                manager.set_handler(id, handler.clone());
                handler
            })
            .collect();

        hub.attach(node, chain, version(), &manager);
        TestVm { manager, handlers }
    }

    fn only(node: NodeId) -> HashSet<NodeId> {
        HashSet::from([node])
    }

    fn responses(events: &[HandlerEvent]) -> Vec<HandlerEvent> {
        events
            .iter()
            .filter(|e| matches!(e, HandlerEvent::Response(..)))
            .cloned()
            .collect()
    }

    // =============================================================================
    // TEST GROUP 1: Request/response virtualization
    // =============================================================================

    #[tokio::test]
    async fn test_colliding_request_ids_answered_separately() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let _b = spawn_vm(&hub, NODE_B, CHAIN_1, true);
        assert!(a.log(1).wait_for(1, WAIT).await);

        a.sender(0)
            .send_app_request(&only(NODE_B), 7, b"from-0".to_vec())
            .await
            .unwrap();
        a.sender(1)
            .send_app_request(&only(NODE_B), 7, b"from-1".to_vec())
            .await
            .unwrap();

        // connected + response
        assert!(a.log(0).wait_for(2, WAIT).await);
        assert!(a.log(1).wait_for(2, WAIT).await);

        assert_eq!(
            responses(&a.log(0).events()),
            vec![HandlerEvent::Response(NODE_B, 7, b"re:\x00from-0".to_vec())]
        );
        assert_eq!(
            responses(&a.log(1).events()),
            vec![HandlerEvent::Response(NODE_B, 7, b"re:\x01from-1".to_vec())]
        );
        assert_eq!(a.manager.pending_requests(), 0);
        assert_eq!(hub.outstanding_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_seen_by_matching_handler_only() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let b = spawn_vm(&hub, NODE_B, CHAIN_1, true);
        assert!(b.log(1).wait_for(1, WAIT).await);

        a.sender(1)
            .send_app_request(&only(NODE_B), 3, b"ping".to_vec())
            .await
            .unwrap();
        assert!(b.log(1).wait_for(2, WAIT).await);

        assert!(matches!(
            &b.log(1).events()[1],
            HandlerEvent::Request(from, _, _, msg) if *from == NODE_A && msg == b"ping"
        ));
        assert_eq!(b.log(0).events().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_request_to_several_peers() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let _b = spawn_vm(&hub, NODE_B, CHAIN_1, true);
        let _c = spawn_vm(&hub, NODE_C, CHAIN_1, true);
        assert!(a.log(0).wait_for(2, WAIT).await);

        a.sender(0)
            .send_app_request(&HashSet::from([NODE_B, NODE_C]), 42, b"q".to_vec())
            .await
            .unwrap();
        assert!(a.log(0).wait_for(4, WAIT).await);

        let mut from: Vec<NodeId> = responses(&a.log(0).events())
            .into_iter()
            .map(|e| match e {
                HandlerEvent::Response(node, 42, _) => node,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        from.sort();
        assert_eq!(from, vec![NODE_B, NODE_C]);
    }

    #[tokio::test]
    async fn test_request_to_unknown_peer_releases_virtual_id() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);

        let result = a
            .sender(0)
            .send_app_request(&only(NODE_Z), 1, vec![])
            .await;

        assert!(matches!(result, Err(NetworkError::UnknownPeer(n)) if n == NODE_Z));
        assert_eq!(a.manager.pending_requests(), 0);
    }

    // =============================================================================
    // TEST GROUP 2: Timeouts
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_fails_with_original_id() {
        let hub = LoopbackHub::new(Duration::from_millis(200));
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let b = spawn_vm(&hub, NODE_B, CHAIN_1, false);
        assert!(a.log(1).wait_for(1, WAIT).await);

        // Burn a virtual id so the transport id differs from the handler's.
        a.sender(0)
            .send_app_request(&only(NODE_B), 0, vec![])
            .await
            .unwrap();
        a.sender(1)
            .send_app_request(&only(NODE_B), 77, vec![])
            .await
            .unwrap();

        assert!(a.log(1).wait_for(2, WAIT).await);
        assert_eq!(
            a.log(1).events()[1],
            HandlerEvent::RequestFailed(NODE_B, 77)
        );
        assert!(b.log(1).wait_for(2, WAIT).await);
        assert!(a.log(0).wait_for(2, WAIT).await);
        assert_eq!(a.manager.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_peer_times_out() {
        let hub = LoopbackHub::new(Duration::from_millis(200));
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let b = spawn_vm(&hub, NODE_B, CHAIN_1, false);
        assert!(a.log(0).wait_for(1, WAIT).await);

        a.sender(0)
            .send_app_request(&only(NODE_B), 5, vec![])
            .await
            .unwrap();
        hub.detach(NODE_B, CHAIN_1);

        // connected, disconnected, failed
        assert!(a.log(0).wait_for(3, WAIT).await);
        let events = a.log(0).events();
        assert!(events.contains(&HandlerEvent::Disconnected(NODE_B)));
        assert!(events.contains(&HandlerEvent::RequestFailed(NODE_B, 5)));
    }

    // =============================================================================
    // TEST GROUP 3: Gossip
    // =============================================================================

    #[tokio::test]
    async fn test_gossip_reaches_same_handler_on_every_peer() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let b = spawn_vm(&hub, NODE_B, CHAIN_1, true);
        let c = spawn_vm(&hub, NODE_C, CHAIN_1, true);
        for vm in [&b, &c] {
            assert!(vm.log(1).wait_for(2, WAIT).await);
        }

        a.sender(1).send_app_gossip(b"tx".to_vec()).await.unwrap();

        for vm in [&b, &c] {
            assert!(vm.log(1).wait_for(3, WAIT).await);
            assert!(vm
                .log(1)
                .events()
                .contains(&HandlerEvent::Gossip(NODE_A, b"tx".to_vec())));
            assert_eq!(vm.log(0).events().len(), 2);
        }
        assert_eq!(a.log(1).events().len(), 2);
    }

    #[tokio::test]
    async fn test_gossip_specific_reaches_listed_peers() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let b = spawn_vm(&hub, NODE_B, CHAIN_1, true);
        let c = spawn_vm(&hub, NODE_C, CHAIN_1, true);
        assert!(c.log(0).wait_for(2, WAIT).await);

        a.sender(0)
            .send_app_gossip_specific(&only(NODE_B), b"direct".to_vec())
            .await
            .unwrap();

        assert!(b.log(0).wait_for(3, WAIT).await);
        assert!(!c.log(0).wait_for(3, Duration::from_millis(100)).await);
    }

    // =============================================================================
    // TEST GROUP 4: Cross-chain
    // =============================================================================

    #[tokio::test]
    async fn test_cross_chain_round_trip() {
        let hub = LoopbackHub::with_default_timeout();
        let x = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let y = spawn_vm(&hub, NODE_A, CHAIN_2, true);

        x.sender(1)
            .send_cross_chain_app_request(CHAIN_2, 9, b"state?".to_vec())
            .await
            .unwrap();

        assert!(x.log(1).wait_for(1, WAIT).await);
        assert_eq!(
            x.log(1).events(),
            vec![HandlerEvent::CrossChainResponse(
                CHAIN_2,
                9,
                b"re:\x01state?".to_vec()
            )]
        );
        assert!(matches!(
            &y.log(1).events()[0],
            HandlerEvent::CrossChainRequest(from, _, _, _) if *from == CHAIN_1
        ));
        assert!(x.log(0).events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_chain_timeout() {
        let hub = LoopbackHub::new(Duration::from_millis(200));
        let x = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let _y = spawn_vm(&hub, NODE_A, CHAIN_2, false);

        x.sender(0)
            .send_cross_chain_app_request(CHAIN_2, 4, vec![])
            .await
            .unwrap();

        assert!(x.log(0).wait_for(1, WAIT).await);
        assert_eq!(
            x.log(0).events(),
            vec![HandlerEvent::CrossChainRequestFailed(CHAIN_2, 4)]
        );
    }

    // =============================================================================
    // TEST GROUP 5: Lifecycle
    // =============================================================================

    #[tokio::test]
    async fn test_connect_and_disconnect_reach_every_handler() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let _b = spawn_vm(&hub, NODE_B, CHAIN_1, true);

        for i in 0..2 {
            assert!(a.log(i).wait_for(1, WAIT).await);
            assert_eq!(
                a.log(i).events(),
                vec![HandlerEvent::Connected(NODE_B, version())]
            );
        }

        hub.detach(NODE_B, CHAIN_1);

        for i in 0..2 {
            assert!(a.log(i).wait_for(2, WAIT).await);
            assert_eq!(a.log(i).events()[1], HandlerEvent::Disconnected(NODE_B));
        }
        assert_eq!(a.manager.handler_ids(), vec![HandlerId::new(0), HandlerId::new(1)]);
    }

    #[tokio::test]
    async fn test_metrics_reflect_traffic() {
        let hub = LoopbackHub::with_default_timeout();
        let a = spawn_vm(&hub, NODE_A, CHAIN_1, true);
        let b = spawn_vm(&hub, NODE_B, CHAIN_1, true);
        assert!(a.log(0).wait_for(1, WAIT).await);

        a.sender(0)
            .send_app_request(&only(NODE_B), 1, vec![])
            .await
            .unwrap();
        a.sender(0).send_app_gossip(vec![]).await.unwrap();
        assert!(a.log(0).wait_for(2, WAIT).await);
        assert!(b.log(0).wait_for(3, WAIT).await);

        let sent = a.manager.metrics();
        assert_eq!(sent.requests_sent, 1);
        assert_eq!(sent.responses_routed, 1);

        let received = b.manager.metrics();
        assert_eq!(received.requests_routed, 1);
        assert_eq!(received.gossip_routed, 1);
        assert_eq!(received.messages_dropped, 0);
    }
}
