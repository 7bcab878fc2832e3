//! Integration tests for the router and its control surface

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use sable_core::{
    CloveDelivery, DatabaseStore, Garlic, GarlicClove, IdentHash, Lease, LeaseSet, LeaseSetBuilder,
    MockLookup, MockTransport, MockTunnelProvider, PeerAddress, PeerInfo, RouterMessage,
    TransportStyle, TunnelDirection, TunnelId, TunnelInfo, TunnelKey, wait_until,
};
use sable_crypto::{
    CryptoError, DestinationKeys, GarlicKey, RouterKeys, encrypt_garlic, sign_lease_set, sign_peer_info,
};
use sable_router::{
    HostLookup, MessageStatus, Router, RouterConfig, RouterDeps, RouterError, SessionConfigBody,
    SessionId, SessionStatus, SignedSessionConfig,
};
use sable_session::SessionEvent;
use tempfile::TempDir;

struct TestRouter {
    router: Arc<Router>,
    lookup: Arc<MockLookup>,
    tunnels: Arc<MockTunnelProvider>,
}

async fn start_router(config: RouterConfig) -> TestRouter {
    sable_logging::init_testing();
    let lookup = Arc::new(MockLookup::new());
    let tunnels = Arc::new(MockTunnelProvider::new());
    let deps = RouterDeps::new(
        RouterKeys::generate(),
        Arc::new(MockTransport::new()),
        lookup.clone(),
        tunnels.clone(),
    );
    let router = Router::start(config, deps).await.unwrap();
    TestRouter {
        router,
        lookup,
        tunnels,
    }
}

fn signed_config(keys: &DestinationKeys) -> SignedSessionConfig {
    let body = SessionConfigBody::new(keys.destination()).with_option("inbound.quantity", "1");
    SignedSessionConfig::sign(body, &keys.signing).unwrap()
}

fn lease_set(keys: &DestinationKeys, encryption_key: [u8; 32]) -> LeaseSet {
    let mut builder = LeaseSetBuilder::new(keys.destination(), encryption_key);
    builder.add_lease(Lease {
        gateway: IdentHash::new([31; 32]),
        tunnel_id: TunnelId(4),
        expires: Utc::now() + chrono::Duration::minutes(10),
    });
    sign_lease_set(&builder, &keys.signing).unwrap()
}

fn tunnel(key: u64, direction: TunnelDirection) -> TunnelInfo {
    TunnelInfo::new(
        TunnelKey(key),
        direction,
        IdentHash::new([key as u8; 32]),
        TunnelId(key as u32),
        Utc::now(),
        chrono::Duration::minutes(10),
    )
}

fn peer_info(keys: &RouterKeys) -> PeerInfo {
    let mut options = BTreeMap::new();
    options.insert("caps".to_string(), "fR".to_string());
    let info = PeerInfo::unsigned(
        keys.identity(),
        Utc::now(),
        options,
        vec![PeerAddress::new(TransportStyle::Ntcp, "10.1.2.3", 7654)],
    );
    sign_peer_info(info, &keys.signing).unwrap()
}

#[tokio::test]
async fn test_router_lifecycle() {
    let test = start_router(RouterConfig::testing()).await;
    assert!(test.router.is_running());
    assert_eq!(test.router.session_count(), 0);

    test.router.shutdown().await;
    assert!(!test.router.is_running());
    test.router.shutdown().await;

    let (status, id) = test.router.create_session(signed_config(&DestinationKeys::generate()));
    assert_eq!(status, SessionStatus::Refused);
    assert!(id.is_none());
}

#[tokio::test]
async fn test_create_session_statuses() {
    let test = start_router(RouterConfig::testing().with_max_sessions(2)).await;
    let keys = DestinationKeys::generate();

    let (status, id) = test.router.create_session(signed_config(&keys));
    assert_eq!(status, SessionStatus::Created);
    let id = id.unwrap();
    assert_eq!(test.router.session(id).unwrap().ident_hash(), keys.ident_hash());
    assert_eq!(test.router.session(id).unwrap().config().inbound_quantity, 1);

    // Same destination twice
    let (status, _) = test.router.create_session(signed_config(&keys));
    assert_eq!(status, SessionStatus::Refused);

    // Signed by someone else
    let other = DestinationKeys::generate();
    let forged = SignedSessionConfig::sign(SessionConfigBody::new(other.destination()), &keys.signing).unwrap();
    let (status, _) = test.router.create_session(forged);
    assert_eq!(status, SessionStatus::Invalid);

    let (status, _) = test.router.create_session(signed_config(&other));
    assert_eq!(status, SessionStatus::Created);
    let (status, _) = test.router.create_session(signed_config(&DestinationKeys::generate()));
    assert_eq!(status, SessionStatus::Refused);

    test.router.shutdown().await;
}

#[tokio::test]
async fn test_reconfigure_and_destroy() {
    let test = start_router(RouterConfig::testing()).await;
    let keys = DestinationKeys::generate();
    let (_, id) = test.router.create_session(signed_config(&keys));
    let id = id.unwrap();

    let mut options = BTreeMap::new();
    options.insert("outbound.quantity".to_string(), "3".to_string());
    assert_eq!(test.router.reconfigure(id, &options).unwrap(), SessionStatus::Updated);
    assert_eq!(test.router.session(id).unwrap().config().outbound_quantity, 3);

    assert_eq!(test.router.destroy_session(id).await.unwrap(), SessionStatus::Destroyed);
    assert_eq!(test.tunnels.released(), vec![keys.ident_hash()]);
    assert!(matches!(test.router.session(id), Err(RouterError::SessionNotFound(_))));
    assert!(matches!(
        test.router.destroy_session(id).await,
        Err(RouterError::SessionNotFound(_))
    ));
    assert!(matches!(
        test.router.reconfigure(SessionId(999), &options),
        Err(RouterError::SessionNotFound(_))
    ));

    // The destination is free again
    let (status, _) = test.router.create_session(signed_config(&keys));
    assert_eq!(status, SessionStatus::Created);
    test.router.shutdown().await;
}

#[tokio::test]
async fn test_create_lease_set() {
    let test = start_router(RouterConfig::testing()).await;
    let keys = DestinationKeys::generate();
    let (_, id) = test.router.create_session(signed_config(&keys));
    let id = id.unwrap();

    let temporary = GarlicKey::generate();
    let mismatched = lease_set(&keys, GarlicKey::generate().public_key());
    assert!(matches!(
        test.router.create_lease_set(id, mismatched, temporary.clone()),
        Err(RouterError::Crypto(CryptoError::KeyMismatch))
    ));

    let foreign_keys = DestinationKeys::generate();
    let foreign = lease_set(&foreign_keys, temporary.public_key());
    assert!(matches!(
        test.router.create_lease_set(id, foreign, temporary.clone()),
        Err(RouterError::Session(_))
    ));

    let own = lease_set(&keys, temporary.public_key());
    test.router.create_lease_set(id, own, temporary).unwrap();
    let session = test.router.session(id).unwrap();
    assert!(session.signed_lease_set().is_some());
    assert!(test.router.directory().find_lease_set(&keys.ident_hash()).is_some());
    test.router.shutdown().await;
}

#[tokio::test]
async fn test_send_message_statuses() {
    let test = start_router(RouterConfig::testing()).await;
    let keys = DestinationKeys::generate();
    let mut options = BTreeMap::new();
    options.insert("inbound.quantity".to_string(), "1".to_string());
    options.insert("outbound.quantity".to_string(), "1".to_string());
    let id = test.router.create_local_session(&keys, &options).unwrap();
    assert!(matches!(
        test.router.create_local_session(&keys, &options),
        Err(RouterError::Refused(_))
    ));

    let remote = DestinationKeys::generate();
    test.router
        .directory()
        .add_lease_set(lease_set(&remote, remote.encryption.public_key()))
        .unwrap();

    let status = test
        .router
        .send_message(id, remote.ident_hash(), Bytes::from_static(b"early"))
        .await
        .unwrap();
    assert_eq!(status, MessageStatus::NoLocalTunnels);

    let session = test.router.session(id).unwrap();
    session.tunnel_established(tunnel(1, TunnelDirection::Inbound));
    session.tunnel_established(tunnel(2, TunnelDirection::Outbound));

    let status = test
        .router
        .send_message_expires(
            id,
            remote.ident_hash(),
            Bytes::from_static(b"now"),
            Utc::now() + chrono::Duration::seconds(30),
        )
        .await
        .unwrap();
    assert_eq!(status, MessageStatus::GuaranteedSuccess);

    let status = test
        .router
        .send_message(id, IdentHash::new([99; 32]), Bytes::from_static(b"who"))
        .await
        .unwrap();
    assert_eq!(status, MessageStatus::NoLeaseSet);

    // The early message goes out once tunnels exist
    assert!(wait_until(Duration::from_secs(2), || test.tunnels.send_count() >= 2).await);
    test.router.shutdown().await;
}

#[tokio::test]
async fn test_host_lookups() {
    let test = start_router(RouterConfig::testing()).await;
    let remote = DestinationKeys::generate();
    test.router
        .directory()
        .add_lease_set(lease_set(&remote, remote.encryption.public_key()))
        .unwrap();

    let name = format!("{}.sable", remote.ident_hash().to_hex());
    let found = test.router.lookup(None, HostLookup::Name(name)).await.unwrap();
    assert_eq!(found.unwrap().ident_hash(), remote.ident_hash());

    let found = test
        .router
        .lookup(None, HostLookup::Name("not-a-hash".into()))
        .await
        .unwrap();
    assert!(found.is_none());

    // Unknown to the network
    let missing = IdentHash::new([7; 32]);
    let found = tokio::time::timeout(
        Duration::from_secs(2),
        test.router.lookup(None, HostLookup::Hash(missing)),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(found.is_none());
    assert!(test.lookup.lease_set_calls().contains(&missing));

    // Through a session, with retries
    let id = test
        .router
        .create_local_session(&DestinationKeys::generate(), &BTreeMap::new())
        .unwrap();
    let other = IdentHash::new([8; 32]);
    let found = tokio::time::timeout(
        Duration::from_secs(3),
        test.router.lookup(Some(id), HostLookup::Hash(other)),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(found.is_none());
    let calls = test.lookup.lease_set_calls();
    assert_eq!(calls.iter().filter(|k| **k == other).count(), 5);
    test.router.shutdown().await;
}

#[tokio::test]
async fn test_router_messages_reach_directory() {
    let test = start_router(RouterConfig::testing()).await;
    let peer = RouterKeys::generate();
    let info = peer_info(&peer);
    test.router
        .handle_router_message(RouterMessage::DatabaseStore(DatabaseStore::peer_info(info, 0)));
    assert!(test.router.directory().contains(&peer.ident_hash()));
    assert_eq!(test.router.directory().floodfill_count(), 1);

    test.router
        .handle_router_message(RouterMessage::DeliveryStatus { message_id: 12 });
    test.router
        .handle_router_message(RouterMessage::Data(Bytes::from_static(b"tunnel data")));
    assert_eq!(test.tunnels.local_messages().len(), 1);
    test.router.shutdown().await;
}

#[tokio::test]
async fn test_directory_persists_across_restart() {
    let temp = TempDir::new().unwrap();
    let config = || RouterConfig {
        data_dir: Some(temp.path().to_path_buf()),
        ..RouterConfig::testing()
    };
    let peer = RouterKeys::generate();

    {
        let test = start_router(config()).await;
        test.router.handle_router_message(RouterMessage::DatabaseStore(DatabaseStore::peer_info(
            peer_info(&peer),
            0,
        )));
        test.router.shutdown().await;
    }

    let test = start_router(config()).await;
    assert!(test.router.directory().contains(&peer.ident_hash()));
    assert_eq!(test.router.directory().peer_count(), 1);
    test.router.shutdown().await;
}

#[tokio::test]
async fn test_garlic_routed_to_session() {
    let test = start_router(RouterConfig::testing()).await;
    let keys = DestinationKeys::generate();
    let (_, id) = test.router.create_session(signed_config(&keys));
    let id = id.unwrap();
    let temporary = GarlicKey::generate();
    test.router
        .create_lease_set(id, lease_set(&keys, temporary.public_key()), temporary.clone())
        .unwrap();

    let session = test.router.session(id).unwrap();
    let mut events = session.subscribe();
    let garlic = Garlic::new(vec![GarlicClove::new(
        CloveDelivery::Destination {
            destination: keys.ident_hash(),
        },
        RouterMessage::Data(Bytes::from_static(b"inbound")),
    )]);
    let sealed = encrypt_garlic(&temporary.public_key(), &garlic).unwrap();

    assert_eq!(test.router.garlic_received(&keys.ident_hash(), sealed.clone()).await, 1);
    assert_eq!(test.router.garlic_received(&IdentHash::new([1; 32]), sealed).await, 0);

    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(SessionEvent::DataReceived { payload, .. }) = events.recv().await {
                return payload;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event, Bytes::from_static(b"inbound"));
    test.router.shutdown().await;
}
