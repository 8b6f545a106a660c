//! Gateway connection management API client
//!
//! Delivers a payload with `POST {endpoint}/@connections/{connection_id}`.
//! The gateway answers `410 Gone` for connections that no longer exist,
//! which is the only status mapped to [`DeliveryOutcome::Stale`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, StatusCode, Url};

use crate::config::ConfigurationError;
use crate::metrics::DeliveryMetrics;

use super::{DeliveryChannel, DeliveryError, DeliveryOutcome};

/// Gateway error bodies are kept in logs and results only up to this size
const MAX_ERROR_BODY_LEN: usize = 512;

pub struct HttpDeliveryChannel {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpDeliveryChannel {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ConfigurationError> {
        let endpoint = Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
            key: "DELIVERY__ENDPOINT",
            reason: e.to_string(),
        })?;

        if endpoint.cannot_be_a_base() || !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigurationError::Invalid {
                key: "DELIVERY__ENDPOINT",
                reason: format!("{} is not an http(s) base URL", endpoint),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                key: "DELIVERY__TIMEOUT_MS",
                reason: e.to_string(),
            })?;

        Ok(Self { client, endpoint })
    }

    fn connection_url(&self, connection_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        // Checked in new(): the endpoint can be a base
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("@connections").push(connection_id);
        }
        url
    }
}

#[async_trait]
impl DeliveryChannel for HttpDeliveryChannel {
    async fn deliver(&self, connection_id: &str, payload: Bytes) -> DeliveryOutcome {
        let started = Instant::now();

        let result = self
            .client
            .post(self.connection_url(connection_id))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await;

        let outcome = match result {
            Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered,
            Ok(response) if response.status() == StatusCode::GONE => DeliveryOutcome::Stale,
            Ok(response) => {
                let status = response.status().as_u16();
                let mut body = response.text().await.unwrap_or_default();
                if body.len() > MAX_ERROR_BODY_LEN {
                    let mut cut = MAX_ERROR_BODY_LEN;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                DeliveryOutcome::Failed(DeliveryError::Status { status, body })
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::Failed(DeliveryError::Timeout),
            Err(e) => DeliveryOutcome::Failed(DeliveryError::Transport {
                message: e.to_string(),
            }),
        };

        DeliveryMetrics::record_latency(started.elapsed().as_secs_f64());
        DeliveryMetrics::record_outcome(&outcome);

        if let DeliveryOutcome::Failed(ref e) = outcome {
            tracing::debug!(connection_id = %connection_id, error = %e, "Delivery failed");
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONNECTION_ID: &str = "L0SM9cOFvHcCIhw=";

    async fn channel_for(server: &MockServer, timeout: Duration) -> HttpDeliveryChannel {
        HttpDeliveryChannel::new(&format!("{}/prod", server.uri()), timeout).unwrap()
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        assert!(HttpDeliveryChannel::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpDeliveryChannel::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_connection_url_encodes_id() {
        let channel =
            HttpDeliveryChannel::new("https://gw.example.com/prod/", Duration::from_secs(1)).unwrap();

        assert_eq!(
            channel.connection_url("a/b").as_str(),
            "https://gw.example.com/prod/@connections/a%2Fb"
        );
        assert_eq!(
            channel.connection_url(CONNECTION_ID).as_str(),
            "https://gw.example.com/prod/@connections/L0SM9cOFvHcCIhw="
        );
    }

    #[tokio::test]
    async fn test_success_is_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/prod/@connections/{}", CONNECTION_ID)))
            .and(header("content-type", "application/octet-stream"))
            .and(body_bytes(b"ping".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = channel_for(&server, Duration::from_secs(2)).await;
        let outcome = channel
            .deliver(CONNECTION_ID, Bytes::from_static(b"ping"))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_gone_is_stale() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Duration::from_secs(2)).await;
        let outcome = channel.deliver("c1", Bytes::from_static(b"ping")).await;

        assert_eq!(outcome, DeliveryOutcome::Stale);
    }

    #[tokio::test]
    async fn test_not_found_is_not_stale() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such stage"))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Duration::from_secs(2)).await;
        let outcome = channel.deliver("c1", Bytes::from_static(b"ping")).await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Failed(DeliveryError::Status {
                status: 404,
                body: "no such stage".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Duration::from_secs(2)).await;
        match channel.deliver("c1", Bytes::from_static(b"ping")).await {
            DeliveryOutcome::Failed(DeliveryError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_ERROR_BODY_LEN);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Duration::from_millis(50)).await;
        let outcome = channel.deliver("c1", Bytes::from_static(b"ping")).await;

        assert_eq!(outcome, DeliveryOutcome::Failed(DeliveryError::Timeout));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_error() {
        // Nothing listens on the discard port
        let channel =
            HttpDeliveryChannel::new("http://127.0.0.1:9/prod", Duration::from_secs(2)).unwrap();
        let outcome = channel.deliver("c1", Bytes::from_static(b"ping")).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed(DeliveryError::Transport { .. })
        ));
    }
}
