//! Discovery client against a real rendezvous node on loopback.

use std::net::SocketAddr;
use std::time::Duration;

use hsn_net::{DiscoveryClient, DiscoveryConfig, Signaling};
use hsn_server::{AppState, ServerConfig};
use hsn_shared::protocol::{DirectReach, Reachability, SignalPayload};
use hsn_shared::{Fingerprint, Hrd, Identity};

async fn spawn_node() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(hsn_server::serve_on(AppState::new(ServerConfig::default()), listener));
    addr
}

async fn connect(addr: SocketAddr, hik: &Fingerprint) -> DiscoveryClient {
    let client = DiscoveryClient::spawn(DiscoveryConfig {
        nodes: vec![format!("ws://{addr}/ws")],
        hik: hik.clone(),
        query_timeout: Duration::from_secs(2),
    });
    assert!(client.wait_connected(Duration::from_secs(5)).await);
    client
}

#[tokio::test]
async fn test_publish_then_query() {
    let addr = spawn_node().await;
    let alice = Identity::generate();
    let bob = Identity::generate();
    let alice_client = connect(addr, alice.fingerprint()).await;
    let bob_client = connect(addr, bob.fingerprint()).await;

    let hrd = Hrd::for_identity(
        &alice,
        Reachability {
            direct: Some(DirectReach {
                supports_peer_link: true,
            }),
            fallback: None,
        },
    );
    alice_client.publish(hrd.clone()).await;

    // Publishing is fire-and-forget; poll until the node has it.
    let mut found = None;
    for _ in 0..50 {
        found = bob_client.query(alice.fingerprint()).await;
        if found.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(found, Some(hrd));

    // Unknown identities resolve to None as soon as the node answers.
    let started = std::time::Instant::now();
    assert!(bob_client.query(&Fingerprint::new("nobody")).await.is_none());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_signal_relay() {
    let addr = spawn_node().await;
    let alice = Identity::generate();
    let bob = Identity::generate();
    let alice_client = connect(addr, alice.fingerprint()).await;
    let bob_client = connect(addr, bob.fingerprint()).await;
    let mut bob_signals = bob_client.subscribe_signals();

    let offer = SignalPayload::Offer {
        session: "s-1".into(),
        sdp: "v=0".into(),
    };

    // The node registers a session slightly after the client handshake
    // completes, so resend until one arrives.
    let mut received = None;
    for _ in 0..50 {
        alice_client
            .signal(bob.fingerprint(), offer.clone())
            .await
            .unwrap();
        if let Ok(Ok(signal)) =
            tokio::time::timeout(Duration::from_millis(100), bob_signals.recv()).await
        {
            received = Some(signal);
            break;
        }
    }

    let signal = received.expect("signal never relayed");
    assert_eq!(&signal.from, alice.fingerprint());
    assert_eq!(signal.data, offer);
}
