//! Two client nodes exchanging messages through a real gateway and
//! rendezvous node on loopback.

use std::net::SocketAddr;
use std::time::Duration;

use hsn_client::{ClientConfig, DeliveryStatus, Node};
use hsn_server::{AppState, ServerConfig};
use hsn_shared::types::DeliveryRoute;
use hsn_shared::ChainId;
use hsn_store::{ledger, Store};

async fn spawn_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(hsn_server::serve_on(AppState::new(ServerConfig::default()), listener));
    addr
}

fn node(config: ClientConfig) -> (Node, Store) {
    let store = Store::open_in_memory().unwrap();
    let node = Node::with_store(config, store.clone()).unwrap();
    (node, store)
}

#[tokio::test]
async fn test_conversation_over_gateway() {
    let addr = spawn_server().await;
    let config = ClientConfig {
        transit_base: Some(format!("http://{addr}")),
        ..ClientConfig::default()
    };
    let (alice, alice_store) = node(config.clone());
    let (bob, bob_store) = node(config);

    for round in 0..2 {
        let sent = alice
            .orchestrator()
            .send_text(bob.fingerprint(), &format!("ping {round}"))
            .await
            .unwrap();
        assert_eq!(sent.status, DeliveryStatus::Delivered(DeliveryRoute::Fallback));
        assert_eq!(bob.poll_once().await.unwrap().appended, 1);

        let reply = bob
            .orchestrator()
            .send_text(alice.fingerprint(), &format!("pong {round}"))
            .await
            .unwrap();
        assert_eq!(reply.status, DeliveryStatus::Delivered(DeliveryRoute::Fallback));
        assert_eq!(alice.poll_once().await.unwrap().appended, 1);
    }

    let texts = |node: &Node| -> Vec<String> {
        node.orchestrator()
            .messages()
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect()
    };
    let expected = vec!["ping 0", "pong 0", "ping 1", "pong 1"];
    assert_eq!(texts(&alice), expected);
    assert_eq!(texts(&bob), expected);

    let chain = ChainId::between(alice.fingerprint(), bob.fingerprint());
    assert_eq!(
        ledger::chain_head_hash(&alice_store, &chain, bob.fingerprint()).unwrap(),
        ledger::chain_head_hash(&bob_store, &chain, bob.fingerprint()).unwrap()
    );
    assert_eq!(alice.orchestrator().pending_count().unwrap(), 0);
    assert_eq!(bob.orchestrator().pending_count().unwrap(), 0);
}

#[tokio::test]
async fn test_outbox_drains_once_gateway_is_known() {
    let addr = spawn_server().await;
    let gateway = ClientConfig {
        transit_base: Some(format!("http://{addr}")),
        ..ClientConfig::default()
    };

    // Alice starts without a gateway, so her message stays queued.
    let alice_store = Store::open_in_memory().unwrap();
    let offline = Node::with_store(ClientConfig::default(), alice_store.clone()).unwrap();
    let (bob, _) = node(gateway.clone());

    let queued = offline
        .orchestrator()
        .send_text(bob.fingerprint(), "queued")
        .await
        .unwrap();
    assert_eq!(queued.status, DeliveryStatus::Pending);
    drop(offline);

    // Same store, now with a gateway: the retry pass delivers it.
    let alice = Node::with_store(gateway, alice_store).unwrap();
    assert_eq!(alice.orchestrator().pending_count().unwrap(), 1);
    let report = alice.orchestrator().retry_pending().await.unwrap();
    assert_eq!((report.attempted, report.delivered), (1, 1));

    assert_eq!(bob.poll_once().await.unwrap().appended, 1);
    assert_eq!(bob.orchestrator().messages().unwrap()[0].text, "queued");
}

#[tokio::test]
async fn test_gateway_found_through_discovery() {
    let addr = spawn_server().await;
    let signal_nodes = vec![format!("ws://{addr}/ws")];

    // Bob advertises the gateway; Alice only knows the rendezvous node.
    let (bob, _) = node(ClientConfig {
        signal_nodes: signal_nodes.clone(),
        transit_base: Some(format!("http://{addr}")),
        advertise_direct: false,
        discovery_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    });
    let (alice, _) = node(ClientConfig {
        signal_nodes,
        advertise_direct: false,
        discovery_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    });

    let bob_discovery = bob.discovery().unwrap();
    let alice_discovery = alice.discovery().unwrap();
    assert!(bob_discovery.wait_connected(Duration::from_secs(5)).await);
    assert!(alice_discovery.wait_connected(Duration::from_secs(5)).await);
    bob.publish_reachability().await;

    let mut published = false;
    for _ in 0..50 {
        if alice_discovery.query(bob.fingerprint()).await.is_some() {
            published = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(published, "bob's descriptor never reached the node");

    let sent = alice
        .orchestrator()
        .send_text(bob.fingerprint(), "found you")
        .await
        .unwrap();
    assert_eq!(sent.status, DeliveryStatus::Delivered(DeliveryRoute::Fallback));
    assert_eq!(bob.poll_once().await.unwrap().appended, 1);
}
