//! FRKB fingerprint-sync gateway server.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use frkb_gateway::{GatewayConfig, SyncApi};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_file(&PathBuf::from(path))?,
        None => GatewayConfig::default(),
    };
    if let Ok(addr) = std::env::var("FRKB_BIND_ADDR") {
        config.bind_addr = addr.parse()?;
    }

    tracing::info!("FRKB fingerprint-sync gateway starting...");

    let (engine, users) = frkb_engine::SyncEngine::with_memory_stores(config.engine.clone());

    // Development bootstrap: seed a user key so the API is usable out of the
    // box. Production directories are populated by the admin tooling.
    if let Ok(raw) = std::env::var("FRKB_DEV_USER_KEY") {
        let user = frkb_store::UserKey::parse(&raw)?;
        tracing::info!(user = %user, "registering development user key");
        users.register(frkb_store::UserRecord::active(user, frkb_store::now_secs()));
    }

    let api = SyncApi::new(Arc::new(engine), users, Arc::new(config));
    api.serve().await
}
