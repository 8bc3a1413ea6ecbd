//! FRKB gateway: the JSON/HTTP surface of the fingerprint-sync service.

pub mod api;
pub mod auth;
pub mod config;
pub mod wire;

pub use api::SyncApi;
pub use config::GatewayConfig;
