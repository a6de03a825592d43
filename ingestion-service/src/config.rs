use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Run `01_meter_readings.sql` at startup.
    #[serde(default)]
    pub apply_schema: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub auth_bearer_token: Option<String>,
    pub max_body_bytes: usize,
    /// Saved readings echoed back in an upload summary.
    pub preview_limit: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            auth_bearer_token: None,
            max_body_bytes: 20 * 1024 * 1024,
            preview_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub max_insert_retries: u32,
    pub retry_backoff_ms: u64,
    pub pdftotext_program: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_insert_retries: 2,
            retry_backoff_ms: 200,
            pdftotext_program: "pdftotext".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_max_connections() -> u32 {
    5
}

fn config_path() -> String {
    std::env::var("INGESTION_CONFIG").unwrap_or_else(|_| "ingestion-config.toml".to_string())
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        Self::from_toml_str(&contents)
    }

    /// Like [`AppConfig::load`], but `Ok(None)` when the file does not exist.
    pub fn load_optional() -> anyhow::Result<Option<Self>> {
        let path = config_path();
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        Self::load().map(Some)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }
}
