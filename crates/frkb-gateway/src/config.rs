use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use frkb_engine::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Accepted API keys. Empty means open admission (development only).
    pub api_keys: Vec<String>,
    /// Token gating the admin endpoints. None disables them entirely.
    pub admin_token: Option<String>,
    pub engine: SyncConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8710)),
            api_keys: Vec::new(),
            admin_token: None,
            engine: SyncConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: GatewayConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: GatewayConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
