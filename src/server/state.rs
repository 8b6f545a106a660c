use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ConfigurationError, Settings};
use crate::delivery::{DeliveryChannel, HttpDeliveryChannel};
use crate::error::AppError;
use crate::extract::{create_extractor, ClientIdExtractor};
use crate::lifecycle::LifecycleManager;
use crate::notifier::FanoutNotifier;
use crate::redis::{CircuitBreaker, RedisHealth, RedisPool};
use crate::registry::{create_registry, ConnectionRegistry};

/// Everything an event handler needs, built once from validated settings
pub struct Services {
    pub registry: Arc<dyn ConnectionRegistry>,
    pub lifecycle: Arc<LifecycleManager>,
    pub notifier: Arc<FanoutNotifier>,
    pub extractor: Box<dyn ClientIdExtractor>,
    pub redis: Option<Arc<RedisPool>>,
}

impl Services {
    /// Wire the services from configuration.
    ///
    /// Fails when a required setting is missing or malformed; nothing is
    /// defaulted.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigurationError> {
        let endpoints = settings.require_endpoints()?;
        let extractor = create_extractor(&settings.listen, &settings.jwt)?;

        let redis = match endpoints.registry_url.as_deref() {
            Some(url) => {
                let circuit_breaker = Arc::new(CircuitBreaker::with_config((&settings.registry).into()));
                let pool = RedisPool::new(url, circuit_breaker, Arc::new(RedisHealth::new()))
                    .map_err(|e| ConfigurationError::Invalid {
                        key: "REGISTRY__URL",
                        reason: e.to_string(),
                    })?;
                Some(Arc::new(pool))
            }
            None => None,
        };

        let registry = create_registry(&endpoints, redis.clone())?;
        let delivery: Arc<dyn DeliveryChannel> = Arc::new(HttpDeliveryChannel::new(
            &endpoints.delivery_endpoint,
            Duration::from_millis(settings.delivery.timeout_ms),
        )?);

        let mut services = Self::new(
            registry,
            delivery,
            extractor,
            endpoints.connection_ttl,
            settings.delivery.max_concurrent_deliveries,
        );
        services.redis = redis;

        tracing::info!(
            backend = ?endpoints.backend,
            table = %endpoints.registry_table,
            delivery_endpoint = %endpoints.delivery_endpoint,
            max_concurrent_deliveries = settings.delivery.max_concurrent_deliveries,
            "Services initialized"
        );

        Ok(services)
    }

    /// Wire the services around existing handles
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        delivery: Arc<dyn DeliveryChannel>,
        extractor: Box<dyn ClientIdExtractor>,
        connection_ttl: Option<chrono::Duration>,
        max_concurrent_deliveries: usize,
    ) -> Self {
        let lifecycle =
            Arc::new(LifecycleManager::new(registry.clone()).with_connection_ttl(connection_ttl));
        let notifier = Arc::new(
            FanoutNotifier::new(registry.clone(), delivery, lifecycle.clone())
                .with_max_concurrent(max_concurrent_deliveries),
        );

        Self {
            registry,
            lifecycle,
            notifier,
            extractor,
            redis: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    services: Result<Arc<Services>, ConfigurationError>,
    pub started_at: Instant,
}

impl AppState {
    /// Never fails: a configuration error is kept and reported by every
    /// event handler instead.
    pub fn new(settings: Settings) -> Self {
        let services = Services::from_settings(&settings).map(Arc::new);
        if let Err(ref e) = services {
            tracing::error!(error = %e, "Service is not configured; events will fail");
        }

        Self {
            settings: Arc::new(settings),
            services,
            started_at: Instant::now(),
        }
    }

    pub fn with_services(settings: Settings, services: Services) -> Self {
        Self {
            settings: Arc::new(settings),
            services: Ok(Arc::new(services)),
            started_at: Instant::now(),
        }
    }

    pub fn services(&self) -> Result<&Services, AppError> {
        match &self.services {
            Ok(services) => Ok(services.as_ref()),
            Err(e) => Err(AppError::Config(e.clone())),
        }
    }

    pub fn configuration_error(&self) -> Option<&ConfigurationError> {
        self.services.as_ref().err()
    }
}
