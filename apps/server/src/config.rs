//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `SOUNDTOUCH_PORT`
    pub bind_port: u16,

    /// Device addresses to use instead of discovery.
    /// Override: `SOUNDTOUCH_DEVICE_IP` (comma-separated)
    pub device_ips: Vec<String>,

    /// Directory of static UI files.
    /// Override: `SOUNDTOUCH_WEB_ROOT`
    pub web_root: Option<PathBuf>,

    /// Enable SSDP multicast discovery.
    /// Override: `SOUNDTOUCH_DISCOVERY_MULTICAST`
    pub discovery_multicast: bool,

    /// Enable the subnet scan fallback.
    /// Override: `SOUNDTOUCH_DISCOVERY_SCAN`
    pub discovery_scan: bool,

    /// CIDR range to scan instead of the local /24s.
    /// Override: `SOUNDTOUCH_SCAN_SUBNET`
    pub scan_subnet: Option<String>,

    /// SSDP listen window (milliseconds).
    pub multicast_timeout_ms: u64,

    /// Overall subnet scan deadline (milliseconds).
    pub scan_timeout_ms: u64,

    /// Hosts probed at once during a scan.
    pub scan_concurrency: usize,

    /// Timeout for forwarded device requests (milliseconds).
    pub forward_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = soundtouch_core::Config::default();
        Self {
            bind_port: core.bind_port,
            device_ips: Vec::new(),
            web_root: None,
            discovery_multicast: core.multicast_enabled,
            discovery_scan: core.scan_enabled,
            scan_subnet: None,
            multicast_timeout_ms: core.multicast_timeout_ms,
            scan_timeout_ms: core.scan_timeout_ms,
            scan_concurrency: core.scan_concurrency,
            forward_timeout_ms: core.forward_timeout_ms,
        }
    }
}

/// Splits a comma-separated address list, dropping blanks.
pub fn split_addresses(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SOUNDTOUCH_DISCOVERY_MULTICAST") {
            if let Some(enabled) = parse_flag(&val) {
                self.discovery_multicast = enabled;
            }
        }

        if let Ok(val) = std::env::var("SOUNDTOUCH_DISCOVERY_SCAN") {
            if let Some(enabled) = parse_flag(&val) {
                self.discovery_scan = enabled;
            }
        }

        if let Ok(val) = std::env::var("SOUNDTOUCH_SCAN_SUBNET") {
            if !val.trim().is_empty() {
                self.scan_subnet = Some(val.trim().to_string());
            }
        }

        // Note: SOUNDTOUCH_PORT, SOUNDTOUCH_DEVICE_IP and SOUNDTOUCH_WEB_ROOT are
        // handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to soundtouch-core's Config type.
    pub fn to_core_config(&self) -> soundtouch_core::Config {
        soundtouch_core::Config {
            bind_port: self.bind_port,
            web_root: self.web_root.clone(),
            device_addresses: self.device_ips.clone(),
            multicast_enabled: self.discovery_multicast,
            multicast_timeout_ms: self.multicast_timeout_ms,
            scan_enabled: self.discovery_scan,
            scan_subnet: self.scan_subnet.clone(),
            scan_timeout_ms: self.scan_timeout_ms,
            scan_concurrency: self.scan_concurrency,
            forward_timeout_ms: self.forward_timeout_ms,
            ..Default::default()
        }
    }
}
