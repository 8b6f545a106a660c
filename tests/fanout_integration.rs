//! Fan-out against a mocked gateway management API.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_test::assert_ok;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ara_fanout_service::delivery::{DeliveryChannel, DeliveryError, HttpDeliveryChannel};
use ara_fanout_service::lifecycle::{LifecycleManager, UnregisterReason};
use ara_fanout_service::notifier::FanoutNotifier;
use ara_fanout_service::registry::{ConnectionRegistry, MemoryConnectionRegistry};

struct Harness {
    gateway: MockServer,
    registry: Arc<dyn ConnectionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    notifier: FanoutNotifier,
}

async fn harness() -> Harness {
    let gateway = MockServer::start().await;
    let registry: Arc<dyn ConnectionRegistry> = Arc::new(MemoryConnectionRegistry::new());
    let delivery: Arc<dyn DeliveryChannel> = Arc::new(assert_ok!(HttpDeliveryChannel::new(
        &format!("{}/prod", gateway.uri()),
        Duration::from_secs(2),
    )));
    let lifecycle = Arc::new(LifecycleManager::new(registry.clone()));
    let notifier = FanoutNotifier::new(registry.clone(), delivery, lifecycle.clone());

    Harness {
        gateway,
        registry,
        lifecycle,
        notifier,
    }
}

async fn respond(gateway: &MockServer, connection_id: &str, status: u16, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/prod/@connections/{}", connection_id)))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected_calls)
        .mount(gateway)
        .await;
}

#[tokio::test]
async fn test_all_live_connections_receive_payload() {
    let h = harness().await;
    respond(&h.gateway, "c1", 200, 1).await;
    respond(&h.gateway, "c2", 200, 1).await;
    respond(&h.gateway, "c3", 200, 0).await;

    assert_ok!(h.lifecycle.register("c1", "user-42").await);
    assert_ok!(h.lifecycle.register("c2", "user-42").await);
    assert_ok!(h.lifecycle.register("c3", "user-7").await);

    let result = assert_ok!(h.notifier.notify("user-42", Bytes::from_static(b"ping")).await);

    assert_eq!((result.delivered, result.failed), (2, 0));
    let mut remaining = assert_ok!(h.registry.query_by_client("user-42").await);
    remaining.sort();
    assert_eq!(remaining, vec!["c1", "c2"]);
    h.gateway.verify().await;
}

#[tokio::test]
async fn test_gone_connection_is_pruned() {
    let h = harness().await;
    // c1 hears both notifications, the pruned c2 only the first
    respond(&h.gateway, "c1", 200, 2).await;
    respond(&h.gateway, "c2", 410, 1).await;

    assert_ok!(h.lifecycle.register("c1", "user-42").await);
    assert_ok!(h.lifecycle.register("c2", "user-42").await);

    let result = assert_ok!(h.notifier.notify("user-42", Bytes::from_static(b"ping")).await);

    assert_eq!((result.delivered, result.failed), (1, 0));
    assert_eq!((result.stale, result.pruned), (1, 1));
    assert_eq!(
        assert_ok!(h.registry.query_by_client("user-42").await),
        vec!["c1"]
    );

    // The next notification no longer targets the pruned connection
    let result = assert_ok!(h.notifier.notify("user-42", Bytes::from_static(b"ping")).await);
    assert_eq!((result.targeted, result.delivered), (1, 1));
    h.gateway.verify().await;
}

#[tokio::test]
async fn test_gateway_error_is_reported_and_connection_kept() {
    let h = harness().await;
    respond(&h.gateway, "c1", 500, 1).await;

    assert_ok!(h.lifecycle.register("c1", "user-42").await);

    let result = assert_ok!(h.notifier.notify("user-42", Bytes::from_static(b"ping")).await);

    assert_eq!((result.delivered, result.failed), (0, 1));
    assert_eq!(result.failures[0].connection_id, "c1");
    assert!(matches!(
        result.failures[0].error,
        DeliveryError::Status { status: 500, .. }
    ));
    assert_eq!(
        assert_ok!(h.registry.query_by_client("user-42").await),
        vec!["c1"]
    );
}

#[tokio::test]
async fn test_disconnected_connection_is_not_targeted() {
    let h = harness().await;
    respond(&h.gateway, "c1", 200, 0).await;

    assert_ok!(h.lifecycle.register("c1", "user-42").await);
    assert_ok!(h.lifecycle.unregister("c1", UnregisterReason::Disconnect).await);

    let result = assert_ok!(h.notifier.notify("user-42", Bytes::from_static(b"ping")).await);

    assert_eq!(result.targeted, 0);
    assert_eq!((result.delivered, result.failed), (0, 0));
    h.gateway.verify().await;
}
