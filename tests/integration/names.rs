//! Hostnames resolved through a name directory.

use nsite_integration_tests::{LocalDirectory, Network, TestGateway};
use reqwest::StatusCode;

#[tokio::test]
async fn test_directory_name_serves_site() {
    let net = Network::start().await;
    net.publish("/index.html", b"named site", 1_700_000_000);
    let directory = LocalDirectory::start().await;
    directory.register("alice", &net.publisher.identity);

    let mut config = net.config();
    config.identity.name_domains = vec![directory.domain()];
    let gateway = TestGateway::start(config).await;

    let (status, _, body) = gateway.fetch("alice.sites.test", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"named site");

    let (status, _, _) = gateway.fetch("bob.sites.test", "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resolved_name_is_cached() {
    let net = Network::start().await;
    let directory = LocalDirectory::start().await;
    directory.register("alice", &net.publisher.identity);

    let mut config = net.config();
    config.identity.name_domains = vec![directory.domain()];
    let gateway = TestGateway::start(config).await;

    assert_eq!(
        gateway.gateway.cache().domains.lookup("alice.sites.test").await,
        None
    );
    let _ = gateway.fetch("alice.sites.test", "/").await;
    assert_eq!(
        gateway.cache.domains.lookup("alice.sites.test").await,
        Some(Some(net.publisher.identity))
    );
}
