mod settings;

pub use settings::{
    ClientIdSource, ConfigurationError, DeliveryConfig, JwtConfig, ListenConfig, LogConfig, OtelConfig,
    RegistryBackend, RegistryConfig, RequiredEndpoints, ServerConfig, Settings,
};
