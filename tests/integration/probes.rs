//! Integration tests for probe scheduling
//!
//! These tests verify that:
//! - Probes check on their own at the configured interval
//! - Results from scheduled checks reach the service node without manual triggers

use std::time::Duration;

use uptree::{
    Monitor, SubscribeOptions, Subscriber,
    actors::probe::ProbeHandle,
    config::{CheckConfig, CheckOptions, CheckType, parse_config},
    tree::InstanceNode,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn every_second(kind: CheckType) -> CheckOptions {
    CheckOptions {
        kind,
        interval: Duration::from_secs(1),
        ..CheckConfig::default().resolve("")
    }
}

#[tokio::test]
async fn test_probe_checks_on_schedule() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let address = format!("{}/ready", server.uri());
    let node = InstanceNode::new(&address, Default::default());
    let mut sub = node.subscribe(SubscribeOptions::deltas()).await.unwrap();
    let probe = ProbeHandle::spawn(&address, &every_second(CheckType::HttpStatus), node.feed(), &mut eager_rng())
        .unwrap();

    // first check fires immediately, the second one a second later
    let first = next(&mut sub).await;
    assert!(first.up);
    let second = next(&mut sub).await;
    assert!(second.clock.idx > first.clock.idx);
    assert_eq!(second.clock.cidx, first.clock.cidx);

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.len() >= 2);

    probe.shutdown().await;
}

#[tokio::test]
async fn test_scheduled_failure_reaches_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let address = format!("{}/ready", server.uri());
    let json = serde_json::json!({
        "applications": {
            "shop": {
                "services": {
                    "web": { "instances": [address], "check": { "interval": 1 } }
                }
            }
        }
    });
    let config = parse_config(&json.to_string(), None).unwrap();
    let monitor = Monitor::start(config, eager_rng()).await.unwrap();

    let mut service = monitor
        .collection()
        .child("shop")
        .unwrap()
        .child("web")
        .unwrap()
        .subscribe(SubscribeOptions::snapshot(1))
        .await
        .unwrap();

    let status = next_until(&mut service, |s| s.summary.instances_failed == 1).await;
    assert!(status.summary.failed);
    assert!(!status.children[&address].up);

    monitor.shutdown().await;
}
