use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::db::StoreConfig;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    bind_address: Option<String>,
    port: Option<u16>,
    database_url: Option<String>,
    sqlite_path: Option<String>,
    log_dir: Option<String>,
    max_upload_bytes: Option<usize>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_sqlite_path() -> String {
    "database.db".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(PartialServerConfig::default(), PartialServerConfig::default())
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) => Self::read_file(Path::new(path_str))?,
            None => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        Ok(Self::merge(env_config, file_config))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url.clone(),
            sqlite_path: self.sqlite_path.clone(),
        }
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    fn read_file(path: &Path) -> Result<PartialServerConfig, String> {
        if !path.exists() {
            return Ok(PartialServerConfig::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
    }

    fn merge(primary: PartialServerConfig, fallback: PartialServerConfig) -> Self {
        ServerConfig {
            bind_address: primary
                .bind_address
                .or(fallback.bind_address)
                .unwrap_or_else(default_bind_address),
            port: primary.port.or(fallback.port).unwrap_or_else(default_port),
            database_url: primary
                .database_url
                .or(fallback.database_url)
                .filter(|url| !url.trim().is_empty()),
            sqlite_path: primary
                .sqlite_path
                .or(fallback.sqlite_path)
                .unwrap_or_else(default_sqlite_path),
            log_dir: primary
                .log_dir
                .or(fallback.log_dir)
                .unwrap_or_else(default_log_dir),
            max_upload_bytes: primary
                .max_upload_bytes
                .or(fallback.max_upload_bytes)
                .unwrap_or_else(default_max_upload_bytes),
        }
    }
}
