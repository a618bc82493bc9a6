//! Server settings, loaded once from `settings/settings.toml` and treated
//! as read-only for the life of the process.

use crate::error::{HikupError, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 6998;

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_http_address() -> String {
    "0.0.0.0:6997".to_string()
}

fn default_http_protocol() -> String {
    "http".to_string()
}

fn default_sync_period() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(rename = "wantHttpServer", default)]
    pub want_http_server: bool,
    /// Public hostname advertised in HTTP links handed to uploaders.
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(rename = "httpAddress", default = "default_http_address")]
    pub http_address: String,
    #[serde(rename = "httpProtocol", default = "default_http_protocol")]
    pub http_protocol: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            want_http_server: false,
            hostname: None,
            http_address: default_http_address(),
            http_protocol: default_http_protocol(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    #[serde(rename = "periodSecs", default = "default_sync_period")]
    pub period_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            period_secs: default_sync_period(),
        }
    }
}

/// One peer this node pushes to and reconciles with.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncTarget {
    pub name: String,
    pub address: String,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(rename = "syncTarget", default)]
    pub sync_targets: Vec<SyncTarget>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HikupError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| HikupError::Config(format!("bad settings {}: {e}", path.display())))
    }

    /// Public URL for a stored name, when an HTTP server is advertised.
    pub fn public_link(&self, name: &str) -> Option<String> {
        if !self.server.want_http_server {
            return None;
        }
        let host = self.server.hostname.as_deref().unwrap_or(&self.server.http_address);
        Some(format!("{}://{}/{}", self.server.http_protocol, host, name))
    }
}
