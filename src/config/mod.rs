use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, UploaderError};

/// Remote API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Scheme, host and optional port of the service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path prefix every endpoint hangs off
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Static key sent with every request
    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// How the session is carried on subsequent requests
    #[serde(default)]
    pub auth_mode: AuthMode,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Child gallery that receives uploads aimed at a collection
    #[serde(default = "default_uploader_gallery")]
    pub uploader_gallery: String,

    /// Gallery probed for existing files when no gallery is known
    #[serde(default = "default_gallery")]
    pub default_gallery: String,
}

/// Session carrier negotiated at login
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `X-PS-Auth-Token` header
    #[default]
    Token,
    /// `Cookie` header built from the login response's `Set-Cookie`s
    Cookie,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Token => "token",
            AuthMode::Cookie => "cookie",
        }
    }
}

fn default_base_url() -> String {
    "https://www.photoshelter.com".to_string()
}

fn default_api_path() -> String {
    "/psapi/v2/".to_string()
}

fn default_api_key() -> String {
    "S67j0pDkpgk".to_string()
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    180
}

fn default_uploader_gallery() -> String {
    "Uploader".to_string()
}

fn default_gallery() -> String {
    "Default".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_path: default_api_path(),
            api_key: default_api_key(),
            auth_mode: AuthMode::default(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            uploader_gallery: default_uploader_gallery(),
            default_gallery: default_gallery(),
        }
    }
}

impl ApiConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ApiConfig = toml::from_str(content)
            .map_err(|e| UploaderError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Copy of this config pointing at another server.
    pub fn with_base_url(&self, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..self.clone()
        }
    }

    /// Full URL for an endpoint path relative to `api_path`.
    pub fn endpoint_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_path.trim_matches('/');
        format!("{}/{}/{}", base, prefix, path.trim_start_matches('/'))
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| UploaderError::Config(format!("Invalid base_url '{}': {}", self.base_url, e)))?;
        if self.api_key.trim().is_empty() {
            return Err(UploaderError::Config("api_key must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("collection-uploader").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("collection-uploader")
                .join("config.toml"),
        );
        paths.push(home_dir.join(".collection-uploader.toml"));
    }

    paths
}

/// Load configuration from the first default path that exists.
pub fn load() -> Result<ApiConfig> {
    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return load_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    Ok(ApiConfig::default())
}

/// Load configuration from a specific path
pub fn load_from_path(path: &Path) -> Result<ApiConfig> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| UploaderError::Config(format!("Failed to read config: {}", e)))?;

    ApiConfig::from_toml_str(&content)
}
