//! Gateway configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then command-line flags.

use crate::error::{GatewayError, GatewayResult};
use model::GeminiConfig;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
/// Vite dev server of the study assistant frontend
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Browser origins allowed to call the API; `*` allows any origin
    pub cors_origins: Vec<String>,
    pub gemini: GeminiConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origins: vec![DEFAULT_CORS_ORIGIN.to_string()],
            gemini: GeminiConfig::default(),
        }
    }
}

/// Layout of the optional TOML config file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_origins: Option<Vec<String>>,
    pub gemini: GeminiFileConfig,
}

/// `[gemini]` table. The API key is deliberately not accepted here.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeminiFileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl FileConfig {
    pub fn parse(text: &str) -> GatewayResult<Self> {
        toml::from_str(text).map_err(|e| GatewayError::Config(format!("Invalid config file: {}", e)))
    }

    pub fn read(path: &Path) -> GatewayResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Cannot read config file '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
    }
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> GatewayResult<Self> {
        let file = file.map(FileConfig::read).transpose()?.unwrap_or_default();
        Self::from_layers(file, |name| std::env::var(name).ok(), overrides)
    }

    /// Combine all layers. `lookup` stands in for the environment.
    pub fn from_layers<F>(file: FileConfig, lookup: F, overrides: &Overrides) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = file.host {
            config.host = host;
        }
        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(origins) = file.cors_origins {
            config.cors_origins = origins;
        }
        if let Some(model) = file.gemini.model {
            config.gemini.default_model = model;
        }
        if let Some(base_url) = file.gemini.base_url {
            config.gemini.base_url = base_url;
        }
        if let Some(api_version) = file.gemini.api_version {
            config.gemini.api_version = api_version;
        }
        if let Some(secs) = file.gemini.timeout_secs {
            config.gemini.timeout = Duration::from_secs(secs);
        }

        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS").filter(|v| !v.trim().is_empty()) {
            config.cors_origins = parse_origins(&origins);
        }
        config.gemini = config
            .gemini
            .merge_lookup(&lookup)
            .map_err(GatewayError::Config)?;

        if let Some(host) = &overrides.host {
            config.host = host.clone();
        }
        if let Some(port) = overrides.port {
            config.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> GatewayResult<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| GatewayError::Config(format!("Invalid host address '{}'", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn validate(&self) -> GatewayResult<()> {
        self.bind_addr()?;

        for origin in &self.cors_origins {
            let valid = origin == "*"
                || ((origin.starts_with("http://") || origin.starts_with("https://"))
                    && !origin.ends_with('/'));
            if !valid {
                return Err(GatewayError::Config(format!(
                    "Invalid CORS origin '{}': expected scheme://host[:port] or *",
                    origin
                )));
            }
        }

        self.gemini.validate().map_err(GatewayError::Config)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
