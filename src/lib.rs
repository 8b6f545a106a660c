// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;

// Connection directory and fan-out
pub mod delivery;
pub mod extract;
pub mod lifecycle;
pub mod notifier;
pub mod registry;

// Application layer
pub mod api;
pub mod server;
