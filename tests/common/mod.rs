#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use bytes::Bytes;

use ara_fanout_service::config::{ListenConfig, RegistryBackend, Settings};
use ara_fanout_service::delivery::{DeliveryChannel, DeliveryOutcome};
use ara_fanout_service::extract::create_extractor;
use ara_fanout_service::notifier::DEFAULT_MAX_CONCURRENT_DELIVERIES;
use ara_fanout_service::registry::{ConnectionRegistry, MemoryConnectionRegistry};
use ara_fanout_service::server::{create_app, AppState, Services};

/// Delivery fake: answers from a script, delivered by default, and records
/// every payload it was asked to push.
#[derive(Default)]
pub struct ScriptedDelivery {
    outcomes: Mutex<HashMap<String, DeliveryOutcome>>,
    delivered: Mutex<Vec<(String, Bytes)>>,
}

impl ScriptedDelivery {
    pub fn script(&self, connection_id: &str, outcome: DeliveryOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(connection_id.to_string(), outcome);
    }

    /// Connection ids attempted, sorted
    pub fn attempts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedDelivery {
    async fn deliver(&self, connection_id: &str, payload: Bytes) -> DeliveryOutcome {
        self.delivered
            .lock()
            .unwrap()
            .push((connection_id.to_string(), payload));
        self.outcomes
            .lock()
            .unwrap()
            .get(connection_id)
            .cloned()
            .unwrap_or(DeliveryOutcome::Delivered)
    }
}

pub struct TestApp {
    pub registry: Arc<MemoryConnectionRegistry>,
    pub delivery: Arc<ScriptedDelivery>,
    pub state: AppState,
}

impl TestApp {
    /// Memory registry, scripted delivery, client id from `x-client-id`
    pub fn new() -> Self {
        Self::with_listen(ListenConfig::default())
    }

    pub fn with_listen(listen: ListenConfig) -> Self {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        let delivery = Arc::new(ScriptedDelivery::default());

        let mut settings = Settings::default();
        settings.registry.backend = RegistryBackend::Memory;
        settings.listen = listen;

        let extractor = create_extractor(&settings.listen, &settings.jwt).unwrap();
        let registry_handle: Arc<dyn ConnectionRegistry> = registry.clone();
        let services = Services::new(
            registry_handle,
            delivery.clone(),
            extractor,
            None,
            DEFAULT_MAX_CONCURRENT_DELIVERIES,
        );

        Self {
            registry,
            delivery,
            state: AppState::with_services(settings, services),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (u16, String) {
        use tower::ServiceExt;

        let response = create_app(self.state.clone()).oneshot(request).await.unwrap();
        read_body(response).await
    }
}

pub async fn read_body(response: Response<Body>) -> (u16, String) {
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn listen_request(connection_id: &str, client_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/connections/{}/listen", connection_id))
        .header("x-client-id", client_id)
        .body(Body::empty())
        .unwrap()
}

pub fn notify_request(client_id: &str, payload: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/clients/{}/notify", client_id))
        .body(Body::from(payload))
        .unwrap()
}
