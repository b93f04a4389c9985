use std::path::Path;
use std::sync::LazyLock;

use beam_transcode::PipelineConfig;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "BEAM_ENGINE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    port: u16,
    // base url of the beam service that stores packets
    store_url: String,
    pipeline: PipelineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            store_url: "http://localhost:8000".to_string(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        let config = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parse config {}: {}", path.display(), e))?;
        Ok(config)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn store_url(&self) -> &str {
        &self.store_url
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }
}

fn load_or_default() -> EngineConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if !Path::new(&path).exists() {
        log::info!("config {} not found, using defaults", path);
        return EngineConfig::default();
    }
    EngineConfig::load(&path).unwrap_or_else(|e| {
        log::warn!("{:#}, using defaults", e);
        EngineConfig::default()
    })
}

pub fn config() -> &'static EngineConfig {
    static CONFIG: LazyLock<EngineConfig> = LazyLock::new(load_or_default);
    &CONFIG
}
