//! Shared types for SoundTouch device discovery.
//!
//! This module contains types used by every discovery strategy (configured
//! addresses, SSDP multicast, subnet scan) and the snapshot the resolver
//! publishes after each cycle.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::protocol_constants::DEVICE_API_PORT;
use crate::utils::now_millis;

/// Which strategy produced a discovery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// Addresses supplied by the operator (CLI argument, environment, config file).
    Configured,
    /// SSDP M-SEARCH to 239.255.255.250:1900.
    Multicast,
    /// Brute-force probe of `/info` on every candidate host.
    Scan,
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configured => write!(f, "configured"),
            Self::Multicast => write!(f, "SSDP multicast"),
            Self::Scan => write!(f, "subnet scan"),
        }
    }
}

/// Errors that can occur during discovery.
///
/// Probes never surface these to callers; they are logged and the probe
/// reports an empty result instead. Single-address probing does return them.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind UDP socket for discovery.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// Configured scan range could not be parsed or is too large.
    #[error("invalid scan subnet: {0}")]
    InvalidSubnet(String),

    /// IP address is unreachable or not responding on the native API port.
    #[error("IP unreachable: {0}")]
    IpUnreachable(String),

    /// IP responds but is not a SoundTouch device.
    #[error("not a SoundTouch device: {0}")]
    NotSoundTouchDevice(String),
}

/// Network location of a device's native control API.
///
/// Endpoints are immutable snapshots; a new discovery cycle builds new ones.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEndpoint {
    /// IPv4 address (or host name) of the device.
    pub address: String,
    /// Native API port, 8090 on every SoundTouch model.
    pub port: u16,
    /// Stable device ID from `/info`, absent until first successful contact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Friendly name shown in the UI.
    pub display_name: String,
}

impl DeviceEndpoint {
    /// Creates an endpoint with no identity yet, on the standard native port.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_port(address, DEVICE_API_PORT)
    }

    /// Creates an endpoint with no identity yet, on an explicit port.
    #[must_use]
    pub fn with_port(address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        Self {
            display_name: fallback_display_name(&address),
            address,
            port,
            identifier: None,
        }
    }

    /// Returns a copy carrying the identity reported by the device.
    #[must_use]
    pub fn identified(mut self, identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        let name = display_name.into();
        if !name.trim().is_empty() {
            self.display_name = name;
        }
        self
    }

    /// Base URL of the native API, e.g. `http://192.168.1.100:8090`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Full URL for a native API path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }

    /// Whether two endpoints address the same device (address and port).
    #[must_use]
    pub fn same_device(&self, other: &DeviceEndpoint) -> bool {
        self.address == other.address && self.port == other.port
    }
}

/// Name used for devices that never told us theirs.
#[must_use]
pub fn fallback_display_name(address: &str) -> String {
    format!("SoundTouch ({})", address)
}

/// The endpoint set produced by one discovery cycle.
///
/// Built once, never mutated; the registry swaps whole results.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    /// Live endpoints, without duplicate identifiers.
    pub endpoints: Vec<DeviceEndpoint>,
    /// Strategy that produced the endpoints.
    pub source: DiscoverySource,
    /// Unix timestamp (milliseconds) of the cycle.
    pub timestamp: u64,
}

impl DiscoveryResult {
    /// Builds a result, dropping later duplicates.
    ///
    /// Endpoints are keyed by identifier; endpoints without one are keyed by
    /// address.
    #[must_use]
    pub fn new(source: DiscoverySource, endpoints: Vec<DeviceEndpoint>) -> Self {
        let mut seen = HashSet::new();
        let endpoints = endpoints
            .into_iter()
            .filter(|e| {
                let key = match &e.identifier {
                    Some(id) => format!("id:{}", id),
                    None => format!("addr:{}:{}", e.address, e.port),
                };
                seen.insert(key)
            })
            .collect();

        Self {
            endpoints,
            source,
            timestamp: now_millis(),
        }
    }

    /// Returns true when the cycle found nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Looks up an endpoint by address.
    #[must_use]
    pub fn find(&self, address: &str) -> Option<&DeviceEndpoint> {
        self.endpoints.iter().find(|e| e.address == address)
    }
}

/// Virtual interface prefixes to filter out during discovery.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}
