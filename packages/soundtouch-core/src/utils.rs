//! General utilities shared across the application.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Device IP Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Why an address cannot belong to a SoundTouch device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpValidationError {
    Ipv6,
    Unspecified,
    Loopback,
    Broadcast,
    Multicast,
}

impl IpValidationError {
    /// Human-readable reason, used in API error messages.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ipv6 => "IPv6 addresses are not supported",
            Self::Unspecified => "Unspecified address (0.0.0.0) is not a device",
            Self::Loopback => "Loopback addresses are not allowed",
            Self::Broadcast => "Broadcast address is not a device",
            Self::Multicast => "Multicast addresses are not allowed",
        }
    }
}

/// Checks that `ip` could be a device on the LAN.
///
/// Devices only speak IPv4; the canonical IPv4 address is returned.
pub fn validate_device_ip(ip: &IpAddr) -> Result<Ipv4Addr, IpValidationError> {
    let IpAddr::V4(v4) = ip else {
        return Err(IpValidationError::Ipv6);
    };
    if v4.is_unspecified() {
        return Err(IpValidationError::Unspecified);
    }
    if v4.is_loopback() {
        return Err(IpValidationError::Loopback);
    }
    if v4.is_broadcast() {
        return Err(IpValidationError::Broadcast);
    }
    if v4.is_multicast() {
        return Err(IpValidationError::Multicast);
    }
    Ok(*v4)
}

/// Parses and validates a textual device address.
pub fn parse_device_ip(ip: &str) -> Result<Ipv4Addr, String> {
    let parsed: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| format!("Invalid IP address format: {}", ip))?;
    validate_device_ip(&parsed).map_err(|e| e.message().to_string())
}
