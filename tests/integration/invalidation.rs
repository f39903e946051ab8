//! Cache invalidation from live site updates.

use std::time::Duration;

use nsite_integration_tests::{Network, TestGateway, wait_until};
use nsite_types::unix_now;
use reqwest::StatusCode;

#[tokio::test]
async fn test_update_is_served_after_broadcast() {
    let net = Network::start().await;
    net.publish("/index.html", b"version one", unix_now() - 60);

    let mut config = net.config();
    config.subscription_relays = vec![net.outbox.url()];
    let gateway = TestGateway::start(config).await;
    assert!(gateway.listener_active());
    net.outbox.wait_for_watchers(1).await;

    let host = net.publisher.host();
    let (_, _, body) = gateway.fetch(&host, "/").await;
    assert_eq!(body.as_ref(), b"version one");

    net.mirror.put(b"version two");
    net.outbox
        .broadcast(net.publisher.file("/index.html", b"version two", unix_now()));

    let identity = net.publisher.identity;
    let cache = gateway.cache.clone();
    let mut evicted = false;
    for _ in 0..100 {
        if cache.sites.lookup(&identity.to_hex()).await.is_none() {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(evicted, "record set was not evicted");

    let (status, _, body) = gateway.fetch(&host, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"version two");
}

#[tokio::test]
async fn test_no_subscription_relays_means_no_listener() {
    let net = Network::start().await;
    let gateway = TestGateway::start(net.config()).await;

    assert!(!gateway.listener_active());
    assert_eq!(net.outbox.watchers(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_the_subscription() {
    let net = Network::start().await;
    let mut config = net.config();
    config.subscription_relays = vec![net.outbox.url()];
    let gateway = TestGateway::start(config).await;
    net.outbox.wait_for_watchers(1).await;

    gateway.shutdown().await;
    wait_until(Duration::from_secs(5), || net.outbox.watchers() == 0).await;
}
