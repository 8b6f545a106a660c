use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Settings keys that must be present before any listen/notify work is done.
const REGISTRY_URL_KEY: &str = "REGISTRY__URL";
const REGISTRY_TABLE_KEY: &str = "REGISTRY__TABLE";
const DELIVERY_ENDPOINT_KEY: &str = "DELIVERY__ENDPOINT";
const CONNECTION_TTL_KEY: &str = "REGISTRY__CONNECTION_TTL_SECONDS";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which store backs the connection registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Redis,
    Memory,
}

impl RegistryBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryBackend::Redis => "redis",
            RegistryBackend::Memory => "memory",
        }
    }
}

impl Default for RegistryBackend {
    fn default() -> Self {
        Self::Redis
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    /// Registry location (Redis URL); required for the redis backend
    #[serde(default)]
    pub url: Option<String>,
    /// Table name, used as the key namespace for all records
    #[serde(default)]
    pub table: Option<String>,
    /// Records expire this many seconds after registration when set
    #[serde(default)]
    pub connection_ttl_seconds: Option<u64>,
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Base URL of the gateway connection management API
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-delivery request timeout in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on in-flight deliveries within one fan-out
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
    /// Largest notify payload accepted, in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

/// Where the client identifier of a listen request comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientIdSource {
    Header,
    Query,
    Subprotocol,
    Jwt,
}

impl Default for ClientIdSource {
    fn default() -> Self {
        Self::Header
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenConfig {
    #[serde(default)]
    pub client_id_source: ClientIdSource,
    /// Header or query parameter name; ignored by the subprotocol and jwt sources
    #[serde(default)]
    pub client_id_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// OpenTelemetry exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Emit one JSON object per line instead of the human readable format
    #[serde(default)]
    pub json: bool,
}

/// Required configuration is absent or unusable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{} must be set", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// External service locations, checked for presence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredEndpoints {
    pub backend: RegistryBackend,
    /// `None` only for the memory backend
    pub registry_url: Option<String>,
    pub registry_table: String,
    pub delivery_endpoint: String,
    /// Lifetime of registered connections, already range-checked
    pub connection_ttl: Option<chrono::Duration>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrent_deliveries() -> usize {
    100
}

fn default_max_payload_bytes() -> usize {
    128 * 1024 // gateway frame limit
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-fanout-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("registry.backend", "redis")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // REGISTRY__URL, REGISTRY__TABLE, DELIVERY__ENDPOINT, LISTEN__CLIENT_ID_SOURCE, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            // Names used by existing gateway deployments
            .set_override_option("registry.table", env::var("CONNECTION_TABLE_NAME").ok())?
            .set_override_option("delivery.endpoint", env::var("API_ENDPOINT").ok())?;

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Check that every external service location is configured.
    ///
    /// Reports all missing keys at once rather than the first one found.
    pub fn require_endpoints(&self) -> Result<RequiredEndpoints, ConfigurationError> {
        let mut missing = Vec::new();

        let registry_url = non_empty(&self.registry.url);
        if self.registry.backend == RegistryBackend::Redis && registry_url.is_none() {
            missing.push(REGISTRY_URL_KEY);
        }

        let registry_table = non_empty(&self.registry.table);
        if registry_table.is_none() {
            missing.push(REGISTRY_TABLE_KEY);
        }

        let delivery_endpoint = non_empty(&self.delivery.endpoint);
        if delivery_endpoint.is_none() {
            missing.push(DELIVERY_ENDPOINT_KEY);
        }

        if !missing.is_empty() {
            return Err(ConfigurationError::Missing(missing));
        }

        if self.delivery.max_concurrent_deliveries == 0 {
            return Err(ConfigurationError::Invalid {
                key: "DELIVERY__MAX_CONCURRENT_DELIVERIES",
                reason: "must be greater than zero".to_string(),
            });
        }

        let connection_ttl = self
            .registry
            .connection_ttl_seconds
            .map(connection_ttl)
            .transpose()?;

        Ok(RequiredEndpoints {
            backend: self.registry.backend,
            registry_url: match self.registry.backend {
                RegistryBackend::Redis => registry_url,
                RegistryBackend::Memory => None,
            },
            registry_table: registry_table.unwrap_or_default(),
            delivery_endpoint: delivery_endpoint.unwrap_or_default(),
            connection_ttl,
        })
    }
}

/// A TTL must be positive and keep `now + ttl` representable.
fn connection_ttl(secs: u64) -> Result<chrono::Duration, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::Invalid {
        key: CONNECTION_TTL_KEY,
        reason: reason.to_string(),
    };

    if secs == 0 {
        return Err(invalid("must be greater than zero"));
    }

    let ttl = i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| invalid("out of range"))?;

    chrono::Utc::now()
        .checked_add_signed(ttl)
        .map(|_| ttl)
        .ok_or_else(|| invalid("out of range"))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            url: None,
            table: None,
            connection_ttl_seconds: None,
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_delivery_timeout_ms(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            registry: RegistryConfig::default(),
            delivery: DeliveryConfig::default(),
            listen: ListenConfig::default(),
            jwt: JwtConfig::default(),
            otel: OtelConfig::default(),
            log: LogConfig::default(),
        }
    }
}
