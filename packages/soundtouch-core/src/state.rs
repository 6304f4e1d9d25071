//! Core configuration.
//!
//! [`Config`] carries every discovery, forwarding and serving knob. The
//! server binary fills it from YAML, environment and CLI; everything has a
//! default that works on a typical home network.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::DEVICE_API_PORT;
use crate::soundtouch::discovery::Ipv4Subnet;
use crate::utils::parse_device_ip;

/// Configuration for the SoundTouch proxy.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Port the HTTP server binds on.
    pub bind_port: u16,

    /// Directory of static UI files served for unmatched GET requests.
    pub web_root: Option<PathBuf>,

    // Devices
    /// Explicit device addresses; when set, discovery never runs.
    pub device_addresses: Vec<String>,

    /// Native API port on the devices.
    pub device_port: u16,

    // Multicast discovery
    /// Enable SSDP multicast discovery.
    pub multicast_enabled: bool,

    /// How long to listen for SSDP responses (milliseconds).
    pub multicast_timeout_ms: u64,

    /// Number of M-SEARCH packets to send per interface.
    pub ssdp_send_count: u64,

    /// Delay between M-SEARCH retries (milliseconds).
    pub ssdp_retry_delay_ms: u64,

    /// MX value advertised in the M-SEARCH.
    pub ssdp_mx: u64,

    // Subnet scan
    /// Enable the subnet scan fallback.
    pub scan_enabled: bool,

    /// Maximum hosts probed at once.
    pub scan_concurrency: usize,

    /// Per-host probe timeout (milliseconds).
    pub scan_host_timeout_ms: u64,

    /// Overall scan deadline (milliseconds).
    pub scan_timeout_ms: u64,

    /// CIDR range to scan instead of the local /24s, e.g. `192.168.1.0/24`.
    pub scan_subnet: Option<String>,

    // Device calls
    /// Timeout for forwarded device requests (milliseconds).
    pub forward_timeout_ms: u64,

    /// Timeout for `/info` identification requests (milliseconds).
    pub info_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 8000,
            web_root: None,
            device_addresses: Vec::new(),
            device_port: DEVICE_API_PORT,
            multicast_enabled: true,
            multicast_timeout_ms: 3000,
            ssdp_send_count: 2,
            ssdp_retry_delay_ms: 500,
            ssdp_mx: 2,
            scan_enabled: true,
            scan_concurrency: 50,
            scan_host_timeout_ms: 1000,
            scan_timeout_ms: 30_000,
            scan_subnet: None,
            forward_timeout_ms: 10_000,
            info_timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        for address in &self.device_addresses {
            parse_device_ip(address).map_err(|e| format!("device address {}: {}", address, e))?;
        }
        if self.device_port == 0 {
            return Err("device_port must be >= 1".to_string());
        }
        if self.scan_concurrency == 0 {
            return Err("scan_concurrency must be >= 1".to_string());
        }
        if self.ssdp_send_count == 0 {
            return Err("ssdp_send_count must be >= 1".to_string());
        }
        if self.forward_timeout_ms == 0 || self.info_timeout_ms == 0 {
            return Err("request timeouts must be > 0".to_string());
        }
        if let Some(subnet) = &self.scan_subnet {
            subnet.parse::<Ipv4Subnet>().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Configured device addresses, trimmed and deduplicated in order.
    pub fn configured_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::new();
        for address in &self.device_addresses {
            let address = address.trim();
            if !address.is_empty() && !addresses.iter().any(|a| a == address) {
                addresses.push(address.to_string());
            }
        }
        addresses
    }

    /// Parsed scan range, if one is configured and valid.
    pub fn scan_range(&self) -> Option<Ipv4Subnet> {
        self.scan_subnet.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn multicast_timeout(&self) -> Duration {
        Duration::from_millis(self.multicast_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn scan_host_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_host_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }
}
