//! Integration tests for deliveries through the whole broker tree
//!
//! These tests verify that:
//! - Instance samples reach every layer up to the collection root
//! - Late subscribers receive the merged state immediately
//! - only_changes, depth and refresh options shape what a subscriber sees

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use uptree::{SubscribeOptions, Subscriber};

use crate::helpers::*;

const SHOP: Layout<'static> = &[
    ("shop", "web", 0, &["a", "b"]),
    ("shop", "db", 0, &["primary"]),
];

#[tokio::test]
async fn test_service_scenario_flip_to_healthy() {
    let mut tree = TestTree::build(SHOP).await;
    let mut sub = tree
        .service("shop", "web")
        .subscribe(SubscribeOptions::snapshot(1))
        .await
        .unwrap();

    tree.push("shop/web/a", true).await;
    tree.push("shop/web/b", false).await;

    let status = next_until(&mut sub, |s| s.children.len() == 2).await;
    assert_eq!(status.summary.instances_up, 1);
    assert_eq!(status.summary.instances_failed, 1);
    assert!(status.summary.failed);
    assert!(status.summary.degraded);
    let cidx = status.clock.cidx;

    tree.push("shop/web/b", true).await;
    let status = next(&mut sub).await;
    assert_eq!(status.summary.instances_up, 2);
    assert_eq!(status.summary.instances_failed, 0);
    assert!(!status.summary.failed);
    assert!(!status.summary.degraded);
    assert!(status.clock.cidx > cidx);
}

#[tokio::test]
async fn test_failed_service_propagates_to_root() {
    let mut tree = TestTree::build(SHOP).await;
    let mut root = tree
        .collection
        .subscribe(SubscribeOptions::snapshot(0))
        .await
        .unwrap();

    for instance in ["shop/web/a", "shop/web/b", "shop/db/primary"] {
        tree.push(instance, true).await;
    }
    let healthy = next_until(&mut root, |s| s.summary.instances_total == 3).await;
    assert_eq!(healthy.summary.applications_up, 1);
    assert_eq!(healthy.summary.services_up, 2);
    assert_eq!(healthy.summary.applications_failed, 0);
    assert!(healthy.children.is_empty());

    tree.push("shop/db/primary", false).await;
    let failed = next_until(&mut root, |s| s.summary.applications_failed == 1).await;
    assert_eq!(failed.summary.services_failed, 1);
    assert_eq!(failed.summary.instances_failed, 1);
    assert!(failed.summary.failed);
}

#[tokio::test]
async fn test_late_subscriber_sees_merged_state() {
    let mut tree = TestTree::build(SHOP).await;
    let mut probe = tree
        .collection
        .subscribe(SubscribeOptions::snapshot(0))
        .await
        .unwrap();

    tree.push("shop/web/a", true).await;
    tree.push("shop/web/b", false).await;
    tree.push("shop/db/primary", true).await;
    next_until(&mut probe, |s| s.summary.instances_total == 3).await;

    let started = Instant::now();
    let status = tree.collection.get_status(u8::MAX).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    let web = &status.children["shop"].children["web"];
    assert_eq!(web.children.len(), 2);
    assert!(web.children["a"].up);
    assert!(!web.children["b"].up);
    assert_eq!(status.summary.instances_up, 2);
}

#[tokio::test]
async fn test_depth_limits_nested_maps() {
    let mut tree = TestTree::build(SHOP).await;
    tree.push("shop/web/a", true).await;
    tree.push("shop/web/b", true).await;
    tree.push("shop/db/primary", true).await;

    let mut full = tree
        .collection
        .subscribe(SubscribeOptions::snapshot(3))
        .await
        .unwrap();
    let complete = next_until(&mut full, |s| s.summary.instances_total == 3).await;

    let summary = tree.collection.get_status(0).await.unwrap();
    assert!(summary.children.is_empty());
    assert_eq!(summary.summary, complete.summary);

    let apps = tree.collection.get_status(1).await.unwrap();
    assert!(apps.children["shop"].children.is_empty());

    let services = tree.collection.get_status(2).await.unwrap();
    let web = &services.children["shop"].children["web"];
    assert!(web.children.is_empty());
    assert_eq!(web.summary.instances_up, 2);

    assert_eq!(complete.children["shop"].children["web"].children.len(), 2);
}

#[tokio::test]
async fn test_only_changes_ignores_refreshes() {
    let mut tree = TestTree::build(SHOP).await;
    tree.push("shop/web/a", true).await;

    let mut watcher = tree
        .collection
        .subscribe(SubscribeOptions::new(true, u8::MAX, Duration::ZERO, true))
        .await
        .unwrap();
    // settle on the initial picture
    while tokio::time::timeout(Duration::from_millis(100), watcher.next())
        .await
        .is_ok()
    {}

    for _ in 0..5 {
        tree.push("shop/web/a", true).await;
    }
    expect_silence(&mut watcher, Duration::from_millis(200)).await;

    tree.push("shop/web/a", false).await;
    let change = next(&mut watcher).await;
    assert!(!change.children["shop"].children["web"].children["a"].up);
}

#[tokio::test]
async fn test_refresh_bounds_staleness() {
    let mut tree = TestTree::build(SHOP).await;
    tree.push("shop/db/primary", true).await;

    let max_stale = Duration::from_millis(100);
    let mut sub = tree
        .service("shop", "db")
        .subscribe(SubscribeOptions::new(true, 1, max_stale, false))
        .await
        .unwrap();
    next(&mut sub).await;

    let mut last = Instant::now();
    for _ in 0..4 {
        let status = next(&mut sub).await;
        assert_eq!(status.summary.instances_up, 1);
        assert!(last.elapsed() < max_stale + Duration::from_millis(80));
        last = Instant::now();
    }
}

#[tokio::test]
async fn test_incremental_subscriber_receives_changed_child_only() {
    let mut tree = TestTree::build(SHOP).await;
    tree.push("shop/web/a", true).await;
    tree.push("shop/db/primary", true).await;

    let mut deltas = tree.collection.subscribe(SubscribeOptions::deltas()).await.unwrap();
    next_until(&mut deltas, |s| s.summary.instances_total == 2).await;

    tree.push("shop/web/b", false).await;
    let delta = next_until(&mut deltas, |s| s.summary.instances_total == 3).await;
    let shop = &delta.children["shop"];
    assert_eq!(shop.children.keys().collect::<Vec<_>>(), vec!["web"]);
    assert_eq!(shop.children["web"].children.keys().collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(delta.summary.instances_failed, 1);
}
