//! Integration tests for the HTTP API against a live server
//!
//! These tests verify that:
//! - Point-in-time reads return the requested depth
//! - Server-Sent Events and WebSocket endpoints stream status updates
//! - The legacy applications path redirects

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uptree::{
    Monitor,
    api::{ApiConfig, ApiState, spawn_api_server},
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

struct Fixture {
    addr: SocketAddr,
    monitor: Arc<Monitor>,
    address: String,
    _target: MockServer,
}

impl Fixture {
    async fn start() -> Self {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&target)
            .await;
        let address = format!("{}/health", target.uri());

        let config = single_service_config(&[address.clone()], 0);
        let monitor = Arc::new(Monitor::start(config, late_rng()).await.unwrap());

        let api = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let state = ApiState::new(monitor.clone(), Duration::from_secs(2));
        let addr = spawn_api_server(api, state).await.unwrap();

        Self {
            addr,
            monitor,
            address,
            _target: target,
        }
    }

    async fn check(&self) {
        self.monitor.probe(&self.address).unwrap().check_now().await.unwrap();
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn get_json(url: &str) -> Value {
    let response = reqwest::get(url).await.unwrap();
    assert!(response.status().is_success(), "{url}: {}", response.status());
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_health_and_config() {
    let fixture = Fixture::start().await;

    let health = get_json(&fixture.url("/api/health")).await;
    assert_eq!(health["status"], "ok");

    let config = get_json(&fixture.url("/api/config")).await;
    assert_eq!(
        config["applications"]["shop"]["services"]["web"]["instances"][0],
        fixture.address.as_str()
    );
}

#[tokio::test]
async fn test_status_depths() {
    let fixture = Fixture::start().await;
    fixture.check().await;

    let full = get_json(&fixture.url("/api/status/applications")).await;
    assert_eq!(full["instances_up"], 1);
    assert_eq!(
        full["children"]["shop"]["children"]["web"]["children"][&fixture.address]["up"],
        true
    );

    let summary = get_json(&fixture.url("/api/status/applications?depth=0")).await;
    assert_eq!(summary["instances_up"], full["instances_up"]);
    assert!(summary["children"].as_object().is_none_or(|children| children.is_empty()));

    let service = get_json(&fixture.url("/api/status/application/shop/web?depth=0")).await;
    assert_eq!(service["instances_total"], 1);
    assert_eq!(service["failed"], false);
}

#[tokio::test]
async fn test_instance_address_with_slashes() {
    let fixture = Fixture::start().await;
    fixture.check().await;

    let instance = get_json(&fixture.url(&format!(
        "/api/status/application/shop/web/{}",
        fixture.address
    )))
    .await;
    assert_eq!(instance["up"], true);
}

#[tokio::test]
async fn test_sse_stream_delivers_events() {
    let fixture = Fixture::start().await;
    fixture.check().await;

    let mut response = reqwest::get(fixture.url("/api/streaming/application/shop?depth=1"))
        .await
        .unwrap();
    assert!(response.status().is_success());

    let mut body = String::new();
    timeout(WAIT, async {
        while !body.contains("\n\n") {
            let chunk = response.chunk().await.unwrap().expect("stream ended");
            body.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("no event received");

    let data = body
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .expect("no data line");
    let event: Value = serde_json::from_str(data.trim()).unwrap();
    assert_eq!(event["services_up"], 1);
    assert!(event["children"]["web"].is_object());
}

#[tokio::test]
async fn test_websocket_streams_changes() {
    let fixture = Fixture::start().await;
    fixture.check().await;

    let url = format!("ws://{}/api/ws/applications?depth=0", fixture.addr);
    let (mut ws, _) = connect_async(url).await.unwrap();

    let first = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = first else {
        panic!("expected a text message, got {first:?}");
    };
    let status: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(status["applications_up"], 1);
}

#[tokio::test]
async fn test_applications_path_redirects() {
    let fixture = Fixture::start().await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = client.get(fixture.url("/api/applications")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()["location"], "/api/status/applications");
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let fixture = Fixture::start().await;
    let response = reqwest::get(fixture.url("/api/status/application/shop/cache"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}
