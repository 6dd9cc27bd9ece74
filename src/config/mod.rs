//! Service configuration: TOML file with `DRIPLET_`-prefixed env overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Root configuration: global server settings plus one section per endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Server bind address (e.g. `0.0.0.0`).
    pub bind_address: String,
    pub port: u16,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 4719,
            log_level: "info".to_string(),
        }
    }
}

/// Per-endpoint secrets. Immutable for the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Verifies publisher HMAC signatures.
    pub api_secret: String,
    /// Verifies subscriber bearer tokens.
    pub jwt_secret: String,
}

impl Config {
    /// Load config from `path`, materializing a default file first if none
    /// exists. Environment overrides are applied after parsing.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let data = toml::to_string_pretty(&Self::bootstrap()).map_err(|e| {
                ConfigError::Serialize {
                    path: path.to_path_buf(),
                    source: e,
                }
            })?;
            std::fs::write(path, data).map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|e| ConfigError::Toml {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// The config written to disk when no file exists: one `default` endpoint
    /// with placeholder secrets.
    fn bootstrap() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            "default".to_string(),
            EndpointConfig {
                api_secret: "change-this-api-secret".to_string(),
                jwt_secret: "change-this-jwt-secret".to_string(),
            },
        );
        Self {
            global: GlobalConfig::default(),
            endpoints,
        }
    }

    /// Bind address as `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.global.bind_address, self.global.port)
    }

    pub fn endpoint_names(&self) -> Vec<&str> {
        self.endpoints.keys().map(String::as_str).collect()
    }

    /// Overrides use the prefix `DRIPLET_` with `.` mapped to `_`, e.g.
    /// `DRIPLET_GLOBAL_PORT` or `DRIPLET_ENDPOINTS_WEB_API_SECRET`.
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("DRIPLET_GLOBAL_BIND_ADDRESS") {
            self.global.bind_address = addr;
        }
        if let Ok(port) = std::env::var("DRIPLET_GLOBAL_PORT") {
            if let Ok(p) = port.parse() {
                self.global.port = p;
            }
        }
        if let Ok(level) = std::env::var("DRIPLET_GLOBAL_LOG_LEVEL") {
            self.global.log_level = level;
        }

        for (name, endpoint) in self.endpoints.iter_mut() {
            let key = name.to_uppercase().replace('-', "_");
            if let Ok(secret) = std::env::var(format!("DRIPLET_ENDPOINTS_{key}_API_SECRET")) {
                endpoint.api_secret = secret;
            }
            if let Ok(secret) = std::env::var(format!("DRIPLET_ENDPOINTS_{key}_JWT_SECRET")) {
                endpoint.jwt_secret = secret;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("error writing default config {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: toml::ser::Error,
    },
}
