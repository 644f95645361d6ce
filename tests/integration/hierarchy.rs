//! Integration tests for trees built from configuration
//!
//! These tests verify that:
//! - Monitor builds one node per configured application, service and instance
//! - Probe results reach the collection root
//! - Service thresholds shape application and collection counters

use pretty_assertions::assert_eq;
use uptree::{Monitor, SubscribeOptions, Subscriber, config::parse_config};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn target(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_monitor_builds_configured_tree() {
    let healthy = target(200).await;
    let broken = target(500).await;
    let up = format!("{}/health", healthy.uri());
    let down = format!("{}/health", broken.uri());

    let config = single_service_config(&[up.clone(), down.clone()], 1);
    let monitor = Monitor::start(config, late_rng()).await.unwrap();

    let shop = monitor.collection().child("shop").unwrap();
    let web = shop.child("web").unwrap();
    assert_eq!(web.children().count(), 2);
    assert_eq!(monitor.probes().len(), 2);

    let mut root = monitor
        .collection()
        .subscribe(SubscribeOptions::snapshot(u8::MAX))
        .await
        .unwrap();

    assert!(monitor.probe(&up).unwrap().check_now().await.unwrap().up);
    assert!(!monitor.probe(&down).unwrap().check_now().await.unwrap().up);

    let status = next_until(&mut root, |s| s.summary.instances_total == 2).await;
    let web = &status.children["shop"].children["web"];
    assert_eq!(web.summary.instances_up, 1);
    assert_eq!(web.summary.max_failures, 1);
    assert!(web.summary.degraded);
    assert!(!web.summary.failed);

    assert_eq!(status.summary.applications_degraded, 1);
    assert_eq!(status.summary.applications_failed, 0);
    assert_eq!(status.summary.services_degraded, 1);

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_threshold_breach_fails_application() {
    let a = target(503).await;
    let b = target(503).await;
    let addresses = [format!("{}/health", a.uri()), format!("{}/health", b.uri())];

    let config = single_service_config(&addresses, 1);
    let monitor = Monitor::start(config, late_rng()).await.unwrap();

    for address in &addresses {
        monitor.probe(address).unwrap().check_now().await.unwrap();
    }

    let mut app = monitor
        .collection()
        .child("shop")
        .unwrap()
        .subscribe(SubscribeOptions::snapshot(1))
        .await
        .unwrap();
    let status = next_until(&mut app, |s| s.summary.instances_failed == 2).await;
    assert!(status.summary.failed);
    assert_eq!(status.summary.services_failed, 1);
    assert_eq!(status.summary.services_up, 0);
    assert!(status.children["web"].children.is_empty());
}

#[tokio::test]
async fn test_multiple_applications_are_independent() {
    let server = target(200).await;
    let address = format!("{}/health", server.uri());
    let json = serde_json::json!({
        "applications": {
            "shop": { "services": { "web": { "instances": [address], "check": { "interval": 3600 } } } },
            "blog": { "services": { "db": { "instances": ["127.0.0.1:9"], "check": { "interval": 3600 } } } }
        }
    });
    let config = parse_config(&json.to_string(), None).unwrap();
    let monitor = Monitor::start(config, late_rng()).await.unwrap();

    monitor.probe(&address).unwrap().check_now().await.unwrap();

    let shop = monitor.collection().child("shop").unwrap();
    let status = shop.get_status(0).await.unwrap();
    assert_eq!(status.summary.instances_up, 1);

    let mut root = monitor
        .collection()
        .subscribe(SubscribeOptions::snapshot(1))
        .await
        .unwrap();
    let status = next(&mut root).await;
    assert_eq!(status.children.keys().collect::<Vec<_>>(), vec!["shop"]);
    assert_eq!(status.summary.applications_total, 1);
}
