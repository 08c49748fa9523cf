use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Immutable background image; its size fixes the canvas size
    #[envconfig(from = "BASE_IMAGE", default = "canvas.png")]
    pub base_image: PathBuf,

    /// Primary snapshot written on every flush
    #[envconfig(from = "SNAPSHOT_PATH", default = "main.png")]
    pub snapshot_path: PathBuf,

    /// Artifact written by the backup command
    #[envconfig(from = "BACKUP_PATH", default = "backup.png")]
    pub backup_path: PathBuf,

    /// Seconds between snapshot flushes
    #[envconfig(from = "UPDATE_INTERVAL", default = "60")]
    pub update_interval_secs: u64,

    /// Pixel writes per second per client, also the bucket capacity
    #[envconfig(from = "RATE_LIMIT", default = "180")]
    pub rate_limit: u32,

    /// Seconds between idle rate limiter bucket purges
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    /// Key clients by X-Forwarded-For / X-Real-IP instead of the peer address
    #[envconfig(from = "TRUST_PROXY_HEADERS", default = "false")]
    pub trust_proxy_headers: bool,

    /// Seed the canvas from the last snapshot on startup
    #[envconfig(from = "RESTORE_SNAPSHOT", default = "true")]
    pub restore_snapshot: bool,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            base_image: PathBuf::from("canvas.png"),
            snapshot_path: PathBuf::from("main.png"),
            backup_path: PathBuf::from("backup.png"),
            update_interval_secs: 60,
            rate_limit: 180,
            cleanup_interval_secs: 300,
            trust_proxy_headers: false,
            restore_snapshot: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Overlay values from a settings file onto this configuration.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if let Some(secs) = settings.update {
            self.update_interval_secs = secs;
        }
        if let Some(port) = settings.port {
            self.bind_addr.set_port(port);
        }
        if let Some(addr) = settings.addr {
            self.bind_addr.set_ip(addr);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.update_interval_secs == 0 {
            return Err("Update interval must be greater than 0".to_string());
        }
        if self.rate_limit == 0 {
            return Err("Rate limit must be greater than 0".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("Cleanup interval must be greater than 0".to_string());
        }
        if self.snapshot_path == self.backup_path {
            return Err("Snapshot and backup paths must differ".to_string());
        }
        Ok(())
    }
}

/// JSON settings file, e.g. `settings.json`:
///
/// ```json
/// { "update_duration_seconds": 30, "port": 8080, "address": "127.0.0.1" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[serde(rename = "update_duration_seconds", default)]
    #[validate(range(min = 1))]
    pub update: Option<u64>,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub port: Option<u16>,

    #[serde(rename = "address", default)]
    pub addr: Option<IpAddr>,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("parse settings {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("invalid settings {}", path.display()))?;
        Ok(settings)
    }
}
