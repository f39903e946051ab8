//! Serving sites end to end: relays over WebSocket, mirrors over HTTP, and
//! the gateway's own HTTP front end.

use std::time::Duration;

use nsite_cache::{CacheFabric, CacheSettings, FjallBackend};
use nsite_integration_tests::{LocalMirror, Network, TestGateway};
use nsite_types::{Sha256Hash, unix_now};
use reqwest::StatusCode;
use reqwest::header;

#[tokio::test]
async fn test_serves_site_over_the_network() {
    let net = Network::start().await;
    net.publish("/index.html", b"<h1>home</h1>", 1_700_000_000);
    net.publish("/style.css", b"body { margin: 0 }", 1_700_000_000);
    let gateway = TestGateway::start(net.config()).await;
    let host = net.publisher.host();

    let (status, headers, body) = gateway.fetch(&host, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"<h1>home</h1>");
    assert_eq!(headers[header::CONTENT_TYPE], "text/html");
    assert_eq!(
        headers[header::ETAG].to_str().unwrap(),
        format!("\"{}\"", Sha256Hash::digest(b"<h1>home</h1>"))
    );
    assert!(
        headers[header::CACHE_CONTROL]
            .to_str()
            .unwrap()
            .starts_with("public, max-age=")
    );

    let (status, headers, body) = gateway.fetch(&host, "/style.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"body { margin: 0 }");
    assert_eq!(headers[header::CONTENT_TYPE], "text/css");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_head_returns_headers_only() {
    let net = Network::start().await;
    net.publish("/index.html", b"<p>hi</p>", 1_700_000_000);
    let gateway = TestGateway::start(net.config()).await;

    let response = gateway
        .request(reqwest::Method::HEAD, &net.publisher.host(), "/index.html")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeat_requests_are_served_from_cache() {
    let net = Network::start().await;
    net.publish("/index.html", b"cached", 1_700_000_000);
    let gateway = TestGateway::start(net.config()).await;
    let host = net.publisher.host();

    let (status, _, _) = gateway.fetch(&host, "/").await;
    assert_eq!(status, StatusCode::OK);
    let lookup_reqs = net.lookup.reqs();
    let outbox_reqs = net.outbox.reqs();
    let probes = net.mirror.probes();

    let (status, _, body) = gateway.fetch(&host, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"cached");
    assert_eq!(net.lookup.reqs(), lookup_reqs);
    assert_eq!(net.outbox.reqs(), outbox_reqs);
    assert_eq!(net.mirror.probes(), probes);
    assert_eq!(net.mirror.gets(), 2);
}

#[tokio::test]
async fn test_falls_back_to_mirror_that_has_the_blob() {
    let net = Network::start().await;
    let backup = LocalMirror::start().await;
    let body = b"only on the backup";
    backup.put(body);
    net.outbox
        .store(net.publisher.file("/index.html", body, 1_700_000_000));

    let mut config = net.config();
    config.extra_mirrors = vec![backup.url()];
    let gateway = TestGateway::start(config).await;

    let (status, _, served) = gateway.fetch(&net.publisher.host(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served.as_ref(), body);
    assert_eq!(net.mirror.gets(), 0);
    assert_eq!(backup.gets(), 1);
}

#[tokio::test]
async fn test_slow_mirror_is_skipped() {
    let net = Network::start().await;
    let backup = LocalMirror::start().await;
    let body = b"fast copy";
    net.publish("/index.html", body, 1_700_000_000);
    backup.put(body);
    net.mirror.set_delay(Duration::from_secs(2));

    let mut config = net.config();
    config.extra_mirrors = vec![backup.url()];
    let gateway = TestGateway::start(config).await;

    let (status, _, served) = gateway.fetch(&net.publisher.host(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served.as_ref(), body);
    assert_eq!(net.mirror.gets(), 0);
}

#[tokio::test]
async fn test_lying_mirror_never_completes_the_body() {
    let net = Network::start().await;
    let real = b"the real content";
    net.outbox
        .store(net.publisher.file("/index.html", real, 1_700_000_000));
    net.mirror
        .put_as(&Sha256Hash::digest(real), b"forged content!!");
    let gateway = TestGateway::start(net.config()).await;

    let response = gateway.get(&net.publisher.host(), "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.is_err());
}

#[tokio::test]
async fn test_missing_path_lists_searched_relays() {
    let net = Network::start().await;
    net.publish("/index.html", b"home", 1_700_000_000);
    let gateway = TestGateway::start(net.config()).await;

    let (status, headers, body) = gateway.fetch(&net.publisher.host(), "/missing.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(
        headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("path: /missing.html"));
    assert!(text.contains(&net.outbox.url()));
}

#[tokio::test]
async fn test_site_not_found_page_is_served_with_404() {
    let net = Network::start().await;
    net.publish("/index.html", b"home", 1_700_000_000);
    net.publish("/404.html", b"<h1>lost?</h1>", 1_700_000_000);
    let gateway = TestGateway::start(net.config()).await;

    let (status, headers, body) = gateway.fetch(&net.publisher.host(), "/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.as_ref(), b"<h1>lost?</h1>");
    assert_eq!(headers[header::CONTENT_TYPE], "text/html");
}

#[tokio::test]
async fn test_unavailable_blob_is_a_bad_gateway() {
    let net = Network::start().await;
    net.outbox
        .store(net.publisher.file("/index.html", b"never uploaded", 1_700_000_000));
    let gateway = TestGateway::start(net.config()).await;

    let (status, _, body) = gateway.fetch(&net.publisher.host(), "/").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("Failed to find blob"));
    assert!(text.contains(&net.mirror.url()));
}

#[tokio::test]
async fn test_unknown_host_is_not_found() {
    let net = Network::start().await;
    let gateway = TestGateway::start(net.config()).await;

    let (status, _, _) = gateway.fetch("plain.example", "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(net.lookup.reqs(), 0);
}

#[tokio::test]
async fn test_homepage_serves_the_public_domain() {
    let net = Network::start().await;
    net.publish("/index.html", b"gateway home", 1_700_000_000);

    let mut config = net.config();
    config.public_domain = Some("gateway.test".into());
    config.homepage = Some(net.publisher.identity);
    let gateway = TestGateway::start(config).await;

    let (status, _, body) = gateway.fetch("gateway.test", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"gateway home");

    let (status, _, _) = gateway.fetch("other.test", "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_newest_record_wins() {
    let net = Network::start().await;
    let now = unix_now();
    net.publish("/index.html", b"old", now - 100);
    net.publish("/index.html", b"new", now - 10);
    let gateway = TestGateway::start(net.config()).await;

    let (_, _, body) = gateway.fetch(&net.publisher.host(), "/").await;
    assert_eq!(body.as_ref(), b"new");
}

#[tokio::test]
async fn test_persistent_cache_is_populated() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FjallBackend::open(dir.path()).unwrap();
    let cache = CacheFabric::new(std::sync::Arc::new(backend), CacheSettings::default());

    let net = Network::start().await;
    net.publish("/index.html", b"on disk", 1_700_000_000);
    let gateway = TestGateway::start_with_cache(net.config(), cache.clone()).await;

    let (status, _, body) = gateway.fetch(&net.publisher.host(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"on disk");

    let key = net.publisher.identity.to_hex();
    assert_eq!(
        cache.relays.lookup(&key).await,
        Some(vec![net.outbox.url()])
    );
    assert_eq!(
        cache.servers.lookup(&key).await,
        Some(vec![net.mirror.url()])
    );
    let set = cache.sites.lookup(&key).await.unwrap();
    assert!(set.get("/index.html").is_some());
}
