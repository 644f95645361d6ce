//! Integration tests for the OpenTSDB exporter
//!
//! These tests verify that:
//! - Collection updates are posted to `/api/put` with level tags
//! - Rejected batches stay buffered
//! - A slow database does not cut the exporter off from the collection

use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, timeout};
use uptree::{
    ApplicationStatus, ChangeClock, CollectionStatus, InstanceStatus, ServiceStatus,
    actors::broker::{BrokerConfig, BrokerHandle},
    actors::exporter::ExporterHandle,
    config::OpenTsdbConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

const SHOP: Layout<'static> = &[("shop", "web", 0, &["a", "b"])];

fn opentsdb(server: &MockServer) -> OpenTsdbConfig {
    OpenTsdbConfig {
        address: server.uri(),
        host: Some("hub-1".to_string()),
        flush_interval: 3600,
        batch_size: 1000,
    }
}

async fn posted_points(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|request| serde_json::from_slice::<Vec<Value>>(&request.body).ok())
        .flatten()
        .collect()
}

#[tokio::test]
async fn test_exporter_posts_tagged_points() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/put"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut tree = TestTree::build(SHOP).await;
    let exporter = ExporterHandle::spawn(&tree.collection, &opentsdb(&server)).await.unwrap();

    tree.push("shop/web/a", true).await;
    tree.push("shop/web/b", false).await;

    let instance_down = |point: &Value| {
        point["metric"] == "uptree.instance.up"
            && point["tags"]["instance"] == "b"
            && point["value"] == 0.0
    };

    let points = timeout(WAIT, async {
        loop {
            exporter.flush().await.unwrap();
            let points = posted_points(&server).await;
            if points.iter().any(instance_down) {
                return points;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("instance point never exported");

    let point = points.iter().find(|p| instance_down(p)).unwrap();
    assert_eq!(point["tags"]["host"], "hub-1");
    assert_eq!(point["tags"]["application"], "shop");
    assert_eq!(point["tags"]["service"], "web");

    assert!(points.iter().any(|p| p["metric"] == "uptree.service.instances_failed"));
    assert!(points.iter().any(|p| p["metric"] == "uptree.application.failed"));
    assert!(points.iter().any(|p| p["metric"] == "uptree.applications_total"));

    let stats = exporter.get_stats().await.unwrap();
    assert_eq!(stats.buffered, 0);
    assert!(stats.sent >= points.len() as u64);
    assert!(stats.flush_count >= 1);
}

#[tokio::test]
async fn test_rejected_batch_stays_buffered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/put"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut tree = TestTree::build(SHOP).await;
    let exporter = ExporterHandle::spawn(&tree.collection, &opentsdb(&server)).await.unwrap();
    tree.push("shop/web/a", true).await;

    let buffered = timeout(WAIT, async {
        loop {
            let stats = exporter.get_stats().await.unwrap();
            if stats.buffered > 0 {
                return stats.buffered;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("nothing was buffered");

    assert!(exporter.flush().await.is_err());

    let stats = exporter.get_stats().await.unwrap();
    assert!(stats.buffered >= buffered);
    assert_eq!(stats.sent, 0);
    assert_eq!(stats.flush_count, 0);
    assert_eq!(stats.dropped, 0);
}

fn collection_delta(i: u64) -> CollectionStatus {
    let clock = ChangeClock::new(i, i);
    let instance = InstanceStatus {
        up: i % 2 == 0,
        response_time: Duration::from_millis(i),
        clock,
        ..Default::default()
    };
    let service = ServiceStatus::delta("a", instance, clock);
    let application = ApplicationStatus::delta("web", service, clock);
    CollectionStatus::delta("shop", application, clock)
}

#[tokio::test]
async fn test_slow_database_keeps_exporter_subscribed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/put"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(20)))
        .mount(&server)
        .await;

    let collection: BrokerHandle<CollectionStatus> = BrokerHandle::spawn(
        "applications",
        CollectionStatus::default(),
        None,
        BrokerConfig { delivery_buffer: 4 },
    );
    let config = OpenTsdbConfig {
        batch_size: 8,
        ..opentsdb(&server)
    };
    let exporter = ExporterHandle::spawn(&collection, &config).await.unwrap();

    for i in 1..=20 {
        collection.publish(collection_delta(i)).await.unwrap();
    }

    let last_delta = |point: &Value| {
        point["metric"] == "uptree.instance.response_time"
            && point["value"].as_f64().is_some_and(|ms| (ms - 20.0).abs() < 1e-6)
    };
    timeout(Duration::from_secs(10), async {
        loop {
            exporter.flush().await.unwrap();
            if posted_points(&server).await.iter().any(last_delta) {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("last delta never exported");

    let stats = exporter.get_stats().await.unwrap();
    assert_eq!(stats.buffered, 0);
    assert_eq!(stats.dropped, 0);
}
