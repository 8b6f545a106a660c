mod common;

use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

use ara_fanout_service::config::{ClientIdSource, ListenConfig, Settings};
use ara_fanout_service::delivery::{DeliveryError, DeliveryOutcome};
use ara_fanout_service::registry::ConnectionRegistry;
use ara_fanout_service::server::{create_app, AppState};

use common::{listen_request, notify_request, post, read_body, TestApp};

#[tokio::test]
async fn test_listen_registers_connection() {
    let app = TestApp::new();

    let (status, body) = app.send(listen_request("c1", "user-42")).await;

    assert_eq!(status, 200);
    assert_eq!(body, "c1 began listening for client user-42");
    assert_eq!(app.registry.query_by_client("user-42").await.unwrap(), vec!["c1"]);
}

#[tokio::test]
async fn test_listen_without_client_id_is_500() {
    let app = TestApp::new();

    let (status, body) = app.send(post("/connections/c1/listen")).await;

    assert_eq!(status, 500);
    let (prefix, json) = body.split_once(": ").unwrap();
    assert_eq!(prefix, "Failed while c1 tried to start listening");
    let json: serde_json::Value = serde_json::from_str(json).unwrap();
    assert_eq!(json["error"]["code"], "CLIENT_ID_ERROR");
    assert!(app.registry.is_empty());
}

#[tokio::test]
async fn test_listen_with_query_source() {
    let app = TestApp::with_listen(ListenConfig {
        client_id_source: ClientIdSource::Query,
        client_id_key: None,
    });

    let (status, body) = app
        .send(post("/connections/c1/listen?clientId=user-7"))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body, "c1 began listening for client user-7");
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let app = TestApp::new();
    app.send(listen_request("c1", "user-42")).await;

    let (status, body) = app.send(post("/connections/c1/disconnect")).await;
    assert_eq!((status, body.as_str()), (200, "Disconnected c1"));
    assert!(app.registry.is_empty());

    let delete = Request::builder()
        .method("DELETE")
        .uri("/connections/c1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(delete).await;
    assert_eq!((status, body.as_str()), (200, "Disconnected c1"));
}

#[tokio::test]
async fn test_notify_reports_counts() {
    let app = TestApp::new();
    app.send(listen_request("c1", "user-42")).await;
    app.send(listen_request("c2", "user-42")).await;
    app.delivery.script("c2", DeliveryOutcome::Stale);

    let (status, body) = app.send(notify_request("user-42", b"{\"job\":\"done\"}")).await;

    assert_eq!(status, 200);
    assert_eq!(
        body,
        "Notified for user-42: targeted=2 delivered=1 stale=1 pruned=1 failed=0"
    );
    assert_eq!(app.registry.query_by_client("user-42").await.unwrap(), vec!["c1"]);
    assert!(app
        .delivery
        .payloads()
        .iter()
        .all(|p| p.as_ref() == b"{\"job\":\"done\"}"));
}

#[tokio::test]
async fn test_notify_partial_failure_is_still_200() {
    let app = TestApp::new();
    app.send(listen_request("c1", "user-42")).await;
    app.delivery.script(
        "c1",
        DeliveryOutcome::Failed(DeliveryError::Status {
            status: 500,
            body: "internal".to_string(),
        }),
    );

    let (status, body) = app.send(notify_request("user-42", b"ping")).await;

    assert_eq!(status, 200);
    let (summary, failures) = body.split_once(" failures=").unwrap();
    assert!(summary.ends_with("failed=1"));
    let failures: serde_json::Value = serde_json::from_str(failures).unwrap();
    assert_eq!(failures[0]["connection_id"], "c1");
    assert_eq!(failures[0]["error"]["kind"], "status");
    assert_eq!(failures[0]["error"]["status"], 500);
    assert_eq!(app.registry.len(), 1);
}

#[tokio::test]
async fn test_notify_without_listeners() {
    let app = TestApp::new();

    let (status, body) = app.send(notify_request("nobody", b"ping")).await;

    assert_eq!(status, 200);
    assert_eq!(
        body,
        "Notified for nobody: targeted=0 delivered=0 stale=0 pruned=0 failed=0"
    );
    assert!(app.delivery.attempts().is_empty());
}

#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let app = TestApp::new();
    app.send(listen_request("c1", "user-42")).await;

    let payload = vec![b'x'; 128 * 1024 + 1];
    let request = Request::builder()
        .method("POST")
        .uri("/clients/user-42/notify")
        .body(Body::from(payload))
        .unwrap();
    let (status, _) = app.send(request).await;

    assert_eq!(status, 413);
    assert!(app.delivery.attempts().is_empty());
}

#[tokio::test]
async fn test_unconfigured_service_fails_every_event() {
    let state = AppState::new(Settings::default());
    let app = create_app(state);

    for (request, prefix) in [
        (listen_request("c1", "user-42"), "Failed while c1 tried to start listening"),
        (post("/connections/c1/disconnect"), "Failed to disconnect c1"),
        (notify_request("user-42", b"ping"), "Failed to notify for user-42"),
    ] {
        let (status, body) = read_body(app.clone().oneshot(request).await.unwrap()).await;

        assert_eq!(status, 500);
        assert!(body.starts_with(prefix), "unexpected body: {}", body);
        assert!(body.contains("REGISTRY__URL, REGISTRY__TABLE, DELIVERY__ENDPOINT must be set"));
    }
}

#[tokio::test]
async fn test_health_and_stats() {
    let app = TestApp::new();
    app.send(listen_request("c1", "user-42")).await;
    app.send(notify_request("user-42", b"ping")).await;

    let get = |uri: &str| {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, 200);
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["registry"]["backend"], "memory");

    let (status, body) = app.send(get("/stats")).await;
    assert_eq!(status, 200);
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["notifications"]["notifications"], 1);
    assert_eq!(stats["notifications"]["delivered"], 1);

    let (status, body) = app.send(get("/metrics")).await;
    assert_eq!(status, 200);
    assert!(body.contains("ara_fanout_notifications_total"));
}

#[tokio::test]
async fn test_unconfigured_health_is_unavailable() {
    let app = create_app(AppState::new(Settings::default()));
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = read_body(app.oneshot(request).await.unwrap()).await;

    assert_eq!(status, 503);
    assert!(body.contains("unconfigured"));
}
