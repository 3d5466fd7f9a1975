#![allow(clippy::unwrap_used, dead_code)]
// Shared fixtures: wiremock endpoints and a scripted in-memory broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use embercloud_api::{BrokerConnector, BrokerEvent, BrokerLink, Error};
use embercloud_core::{CloudConfig, ReconnectConfig};

// ── Config ──────────────────────────────────────────────────────────

pub const TOPIC_PREFIX: &str = "updates";

pub fn config_for(server: &MockServer) -> CloudConfig {
    let identity = Url::parse(&format!("{}/identity/", server.uri())).unwrap();
    let api = Url::parse(&format!("{}/prod/", server.uri())).unwrap();

    let mut config = CloudConfig::new("cook@example.com", SecretString::from("pw".to_string()))
        .unwrap()
        .with_endpoints(identity, api);
    config.broker.topic_prefix = TOPIC_PREFIX.into();
    config.broker.reconnect = ReconnectConfig {
        floor: Duration::from_millis(10),
        ceiling: Duration::from_millis(20),
    };
    config
}

// ── Mock endpoints ──────────────────────────────────────────────────

pub async fn mount_identity(server: &MockServer, token: &str, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path("/identity/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "AuthenticationResult": { "IdToken": token, "ExpiresIn": expires_in }
        })))
        .mount(server)
        .await;
}

pub async fn mount_directory(server: &MockServer, devices: &[&str]) {
    let things: Vec<Value> = devices
        .iter()
        .map(|name| json!({ "thingName": name, "friendlyName": format!("{name} grill") }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/prod/users/self"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "things": things })))
        .mount(server)
        .await;
}

pub fn lease_mock(expiration_seconds: u64) -> Mock {
    Mock::given(method("POST"))
        .and(path("/prod/mqtt-connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "signedUrl": "wss://broker.example.com/mqtt?X-Amz-Signature=abc",
            "expirationSeconds": expiration_seconds
        })))
}

pub async fn mount_commands(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/prod/things/[^/]+/commands$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

// ── Scripted broker ─────────────────────────────────────────────────

/// One thing a scripted link does when polled.
#[derive(Debug, Clone)]
pub enum Step {
    Event(BrokerEvent),
    Fail(&'static str),
    /// Stay quiet for a while, then move on to the next step.
    Pause(Duration),
    /// Block forever, like an idle session.
    Hang,
}

pub fn connected() -> Step {
    Step::Event(BrokerEvent::Connected)
}

pub fn subscribed() -> Step {
    Step::Event(BrokerEvent::Subscribed)
}

pub fn message(device: &str, document: &Value) -> Step {
    Step::Event(BrokerEvent::Message {
        topic: format!("{TOPIC_PREFIX}/{device}"),
        payload: Bytes::from(document.to_string()),
    })
}

/// A message whose payload is sent as-is.
pub fn raw_message(device: &str, payload: &'static [u8]) -> Step {
    Step::Event(BrokerEvent::Message {
        topic: format!("{TOPIC_PREFIX}/{device}"),
        payload: Bytes::from_static(payload),
    })
}

/// Link lifecycle calls in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCall {
    Open,
    Disconnect,
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    opened: Mutex<Vec<Url>>,
    subscriptions: Mutex<Vec<Vec<String>>>,
    disconnects: AtomicUsize,
    calls: Mutex<Vec<LinkCall>>,
}

/// Hands out one script per `open`; an exhausted queue yields idle links.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        let connector = Self::default();
        *connector.shared.scripts.lock().unwrap() = scripts.into();
        connector
    }

    pub fn opened(&self) -> Vec<Url> {
        self.shared.opened.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.shared.subscriptions.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.shared.calls.lock().unwrap().clone()
    }
}

impl BrokerConnector for ScriptedConnector {
    type Link = ScriptedLink;

    fn open(&self, endpoint: &Url) -> Result<ScriptedLink, Error> {
        self.shared.opened.lock().unwrap().push(endpoint.clone());
        self.shared.calls.lock().unwrap().push(LinkCall::Open);
        let steps = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(ScriptedLink {
            steps: steps.into(),
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct ScriptedLink {
    steps: VecDeque<Step>,
    shared: Arc<Shared>,
}

impl BrokerLink for ScriptedLink {
    async fn poll(&mut self) -> Result<BrokerEvent, Error> {
        tokio::task::yield_now().await;
        loop {
            match self.steps.pop_front() {
                Some(Step::Pause(delay)) => tokio::time::sleep(delay).await,
                Some(Step::Event(event)) => return Ok(event),
                Some(Step::Fail(reason)) => return Err(Error::BrokerDropped(reason.into())),
                Some(Step::Hang) | None => std::future::pending().await,
            }
        }
    }

    async fn subscribe_all(&mut self, topics: &[String]) -> Result<(), Error> {
        self.shared.subscriptions.lock().unwrap().push(topics.to_vec());
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        self.shared.calls.lock().unwrap().push(LinkCall::Disconnect);
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

/// Wait until the mock server has seen a request whose path ends in `suffix`.
pub async fn wait_for_request(server: &MockServer, suffix: &str) {
    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path().ends_with(suffix)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(seen.is_ok(), "no request to {suffix}");
}

/// Requests the mock server has seen whose path ends in `suffix`.
pub async fn request_count(server: &MockServer, suffix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .count()
}

pub fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let hits = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&hits);
    (hits, move || {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}
