
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use harness::{echo_roundtrip, wait_until, FakeSentinel, ProxyHandle, TcpEchoBackend};
use sentinel_proxy::{DiscoveryConfig, DiscoveryCoordinator, EndpointAddress, RetryPolicy};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

fn test_policy() -> RetryPolicy {
    RetryPolicy {
        connect_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_secs(10),
        reconnect_delay: Duration::from_millis(50),
        requery_delay: Duration::from_millis(50),
        poll_interval: Duration::from_millis(50),
    }
}

fn discovery_config(sentinels: Vec<EndpointAddress>) -> DiscoveryConfig {
    let mut config = DiscoveryConfig::new(sentinels, "mymaster");
    config.liveness_window = Duration::from_millis(500);
    config.retry = test_policy();
    config
}

async fn expect_closed_without_data(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let _ = timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .expect("proxy should close the connection");
    assert!(buf.is_empty(), "no bytes should be forwarded");
}

#[tokio::test]
async fn forwards_to_current_master() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn().await.unwrap();
    proxy.registry.set(backend.endpoint());

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    let reply = echo_roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(reply, b"*1\r\n$4\r\nPING\r\n");
    assert_eq!(backend.connection_count(), 1);
}

#[tokio::test]
async fn connection_closed_when_no_master_known() {
    let proxy = ProxyHandle::spawn().await.unwrap();

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    expect_closed_without_data(&mut client).await;

    let stats = proxy.listener.stats();
    assert!(
        wait_until(Duration::from_secs(1), || {
            stats.sessions_without_master.load(Ordering::Relaxed) == 1
        })
        .await
    );
}

#[tokio::test]
async fn unreachable_master_closes_client() {
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let proxy = ProxyHandle::spawn().await.unwrap();
    proxy
        .registry
        .set(EndpointAddress::new("127.0.0.1", dead_port).unwrap());

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    expect_closed_without_data(&mut client).await;

    let stats = proxy.listener.stats();
    assert!(
        wait_until(Duration::from_secs(1), || {
            stats.backend_failed.load(Ordering::Relaxed) == 1
        })
        .await
    );
}

#[tokio::test]
async fn live_session_counts_as_backend_connected() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn().await.unwrap();
    proxy.registry.set(backend.endpoint());

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut client, b"open").await.unwrap(), b"open");

    // Still open: the dial is counted before the session ends.
    let stats = proxy.listener.stats();
    assert_eq!(stats.backend_connected.load(Ordering::Relaxed), 1);
    assert_eq!(stats.connections_active.load(Ordering::Relaxed), 1);
    assert_eq!(stats.connections_closed.load(Ordering::Relaxed), 0);

    drop(client);
    assert!(
        wait_until(Duration::from_secs(2), || {
            stats.connections_closed.load(Ordering::Relaxed) == 1
        })
        .await
    );
    assert_eq!(stats.backend_connected.load(Ordering::Relaxed), 1);
    assert_eq!(stats.bytes_to_backend.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn existing_session_stays_on_old_master() {
    let old_master = TcpEchoBackend::spawn().await.unwrap();
    let new_master = TcpEchoBackend::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn().await.unwrap();
    proxy.registry.set(old_master.endpoint());

    let mut before = TcpStream::connect(proxy.listen_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut before, b"one").await.unwrap(), b"one");

    proxy.registry.set(new_master.endpoint());

    // The open session keeps talking to the old master.
    assert_eq!(echo_roundtrip(&mut before, b"two").await.unwrap(), b"two");
    assert_eq!(old_master.bytes_received.load(Ordering::Relaxed), 6);

    // New connections follow the registry.
    let mut after = TcpStream::connect(proxy.listen_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut after, b"three").await.unwrap(), b"three");

    assert_eq!(old_master.connection_count(), 1);
    assert_eq!(new_master.connection_count(), 1);
}

#[tokio::test]
async fn discovered_master_receives_traffic() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let sentinel = FakeSentinel::always(backend.endpoint()).await.unwrap();
    let proxy = ProxyHandle::spawn().await.unwrap();

    let coordinator = DiscoveryCoordinator::new(
        discovery_config(vec![sentinel.endpoint()]),
        Arc::clone(&proxy.registry),
    );
    tokio::spawn(coordinator.run(proxy.shutdown_receiver()));

    let registry = Arc::clone(&proxy.registry);
    assert!(wait_until(Duration::from_secs(3), || registry.get().is_some()).await);
    assert_eq!(*proxy.registry.get().unwrap(), backend.endpoint());

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut client, b"hello").await.unwrap(), b"hello");
}

#[tokio::test]
async fn sentinel_failover_redirects_new_connections() {
    let old_master = TcpEchoBackend::spawn().await.unwrap();
    let new_master = TcpEchoBackend::spawn().await.unwrap();
    let sentinel = FakeSentinel::always(old_master.endpoint()).await.unwrap();
    let proxy = ProxyHandle::spawn().await.unwrap();

    let coordinator = DiscoveryCoordinator::new(
        discovery_config(vec![sentinel.endpoint()]),
        Arc::clone(&proxy.registry),
    );
    tokio::spawn(coordinator.run(proxy.shutdown_receiver()));

    let registry = Arc::clone(&proxy.registry);
    let old = old_master.endpoint();
    assert!(
        wait_until(Duration::from_secs(3), || {
            registry.get().as_deref() == Some(&old)
        })
        .await
    );

    sentinel.set_master(new_master.endpoint());
    let new = new_master.endpoint();
    assert!(
        wait_until(Duration::from_secs(3), || {
            registry.get().as_deref() == Some(&new)
        })
        .await
    );

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut client, b"moved").await.unwrap(), b"moved");
    assert_eq!(new_master.connection_count(), 1);
    assert_eq!(old_master.connection_count(), 0);
}

#[tokio::test]
async fn slower_sentinel_wins_over_majority() {
    let a = EndpointAddress::new("10.0.0.1", 6379).unwrap();
    let b = EndpointAddress::new("10.0.0.2", 6379).unwrap();

    // Two sentinels agree on A right away; a lagging one reports B later.
    // Each answers once and then stays silent.
    let first = FakeSentinel::spawn(a.clone(), 1, Duration::ZERO).await.unwrap();
    let second = FakeSentinel::spawn(a.clone(), 1, Duration::ZERO).await.unwrap();
    let lagging = FakeSentinel::spawn(b.clone(), 1, Duration::from_millis(300))
        .await
        .unwrap();

    let registry = Arc::new(sentinel_proxy::MasterRegistry::new());
    let coordinator = DiscoveryCoordinator::new(
        discovery_config(vec![first.endpoint(), second.endpoint(), lagging.endpoint()]),
        Arc::clone(&registry),
    );
    let stats = coordinator.stats();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(coordinator.run(shutdown_rx));

    assert!(
        wait_until(Duration::from_secs(3), || {
            stats.reports_applied.load(Ordering::Relaxed) == 3
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*registry.get().unwrap(), b);
    assert_eq!(stats.reports_applied.load(Ordering::Relaxed), 3);

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn silent_sentinels_keep_last_master() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let sentinel = FakeSentinel::spawn(backend.endpoint(), 1, Duration::ZERO)
        .await
        .unwrap();
    let proxy = ProxyHandle::spawn().await.unwrap();

    let mut config = discovery_config(vec![sentinel.endpoint()]);
    config.liveness_window = Duration::from_millis(100);
    let coordinator = DiscoveryCoordinator::new(config, Arc::clone(&proxy.registry));
    let stats = coordinator.stats();
    tokio::spawn(coordinator.run(proxy.shutdown_receiver()));

    assert!(
        wait_until(Duration::from_secs(3), || {
            stats.liveness_warnings.load(Ordering::Relaxed) >= 2
        })
        .await
    );
    assert_eq!(stats.reports_applied.load(Ordering::Relaxed), 1);

    // Forwarding keeps using the last known master.
    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut client, b"stale").await.unwrap(), b"stale");
}
