//! SSDP-based SoundTouch device discovery.
//!
//! Sends an M-SEARCH for `MediaRenderer:1` to 239.255.255.250:1900 from every
//! usable interface and listens for unicast replies until the probe budget
//! expires. Replies arriving after the window are never read.
//!
//! The same socket is used for send AND receive since devices reply unicast
//! back to the sending socket/port.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use local_ip_address::list_afinet_netifas;
use reqwest::Client;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use super::info::probe_device_by_ip;
use super::types::{is_virtual_interface, DeviceEndpoint, DiscoveryError, DiscoverySource};
use super::DiscoveryProbe;
use crate::protocol_constants::{SSDP_MULTICAST_ADDR, SSDP_MULTICAST_TTL, SSDP_SEARCH_TARGET};

// ─────────────────────────────────────────────────────────────────────────────
// ASCII Case-Insensitive Helpers
// ─────────────────────────────────────────────────────────────────────────────
//
// HTTP headers are ASCII, so byte-level comparison is safe and avoids
// allocating lowercase copies of every reply.

/// Checks if `haystack` contains `needle` (ASCII case-insensitive, no allocation).
#[inline]
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    find_ignore_ascii_case(haystack, needle).is_some()
}

/// Checks if `s` starts with `prefix` (ASCII case-insensitive, no allocation).
#[inline]
fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Finds the byte index of `needle` in `haystack` (ASCII case-insensitive).
#[inline]
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

// ─────────────────────────────────────────────────────────────────────────────

/// Build the M-SEARCH message.
fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        SSDP_MULTICAST_ADDR, mx, SSDP_SEARCH_TARGET
    )
}

/// Network interface information for discovery.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "en0", "eth0").
    pub name: String,
    /// IPv4 address bound to this interface.
    pub ip: Ipv4Addr,
}

/// Gets all usable network interfaces for discovery.
///
/// Filters out virtual/container interfaces and loopback.
pub fn get_interfaces() -> Vec<InterfaceInfo> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                log::debug!("[SSDP] Skipping virtual interface: {}", name);
                return None;
            }
            match addr {
                IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_link_local() => {
                    Some(InterfaceInfo { name, ip })
                }
                _ => None,
            }
        })
        .collect()
}

/// Creates a UDP socket bound to a specific interface.
///
/// - SO_REUSEADDR for rapid restarts
/// - SO_REUSEPORT on Unix
/// - Multicast TTL of 4 per UPnP 1.0
fn create_socket(iface_ip: Ipv4Addr) -> Result<UdpSocket, DiscoveryError> {
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEPORT on {}: {}", iface_ip, e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(SSDP_MULTICAST_TTL) {
        log::warn!("[SSDP] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;

    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// A reply that looks like it came from a SoundTouch speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpHit {
    /// Source address of the reply.
    pub address: String,
    /// UUID portion of the USN header, if present.
    pub uuid: Option<String>,
    /// LOCATION header, if present.
    pub location: Option<String>,
}

/// Parses an SSDP reply.
///
/// Returns `None` unless the reply mentions Bose or SoundTouch somewhere
/// (SERVER header, LOCATION path, or USN).
fn parse_ssdp_response(response: &str, src_ip: &str) -> Option<SsdpHit> {
    if !response.starts_with("HTTP/") && !starts_with_ignore_ascii_case(response, "NOTIFY") {
        return None;
    }

    if !contains_ignore_ascii_case(response, "bose")
        && !contains_ignore_ascii_case(response, "soundtouch")
    {
        return None;
    }

    // Split on the first colon only; the LOCATION value is a URL.
    let location = response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, "location:"))
        .and_then(|l| l.find(':').map(|idx| l[idx + 1..].trim().to_string()))
        .filter(|l| !l.is_empty());

    let uuid = response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, "usn:"))
        .and_then(|l| find_ignore_ascii_case(l, "uuid:").map(|idx| &l[idx + 5..]))
        .and_then(|s| s.split("::").next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Some(SsdpHit {
        address: src_ip.to_string(),
        uuid,
        location,
    })
}

/// Configuration for SSDP discovery.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH packets to send per interface.
    pub send_count: u64,
    /// Delay between M-SEARCH retries.
    pub retry_delay: Duration,
    /// MX value (max response delay in seconds).
    pub mx_value: u64,
    /// Maximum concurrent `/info` fetches while enriching replies.
    pub max_concurrent_fetches: usize,
    /// Timeout of each `/info` fetch.
    pub info_timeout: Duration,
    /// Native API port of discovered devices.
    pub device_port: u16,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 2,
            retry_delay: Duration::from_millis(500),
            mx_value: 2,
            max_concurrent_fetches: 8,
            info_timeout: Duration::from_secs(2),
            device_port: crate::protocol_constants::DEVICE_API_PORT,
        }
    }
}

/// Listens for SSDP replies for exactly `window`.
///
/// Returns one hit per responding address, sorted by address.
pub async fn discover_multicast(
    config: &SsdpConfig,
    window: Duration,
) -> Result<Vec<SsdpHit>, DiscoveryError> {
    let interfaces = get_interfaces();

    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    let msg = build_msearch_message(config.mx_value);

    let mut sockets: Vec<(InterfaceInfo, Arc<UdpSocket>)> = Vec::new();
    for iface in &interfaces {
        match create_socket(iface.ip) {
            Ok(socket) => sockets.push((iface.clone(), Arc::new(socket))),
            Err(e) => {
                log::warn!(
                    "[SSDP] Failed to create socket for {} ({}): {}",
                    iface.name,
                    iface.ip,
                    e
                );
            }
        }
    }

    if sockets.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    log::debug!(
        "[SSDP] Searching on {} interface(s) for {}ms",
        sockets.len(),
        window.as_millis()
    );

    let deadline = Instant::now() + window;
    let discovered: Arc<Mutex<Vec<SsdpHit>>> = Arc::new(Mutex::new(Vec::new()));

    let send_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface = iface.clone();
            let msg = msg.as_bytes().to_vec();
            let send_count = config.send_count;
            let retry_delay = config.retry_delay;

            async move {
                for i in 0..send_count {
                    if i > 0 {
                        if Instant::now() + retry_delay >= deadline {
                            break;
                        }
                        tokio::time::sleep(retry_delay).await;
                    }
                    if let Err(e) = socket.send_to(&msg, SSDP_MULTICAST_ADDR).await {
                        log::warn!(
                            "[SSDP] Failed to send M-SEARCH on {} (attempt {}): {}",
                            iface.name,
                            i + 1,
                            e
                        );
                    } else {
                        log::trace!("[SSDP] Sent M-SEARCH from {}", iface.ip);
                    }
                }
            }
        })
        .collect();

    let recv_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface_name = iface.name.clone();
            let discovered = Arc::clone(&discovered);

            async move {
                let mut buf = [0u8; 2048];

                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match timeout(remaining, socket.recv_from(&mut buf)).await {
                        Ok(Ok((amt, src))) => {
                            let response = String::from_utf8_lossy(&buf[..amt]);
                            match parse_ssdp_response(&response, &src.ip().to_string()) {
                                Some(hit) => {
                                    log::debug!(
                                        "[SSDP] Reply from {} (uuid={:?}) via {}",
                                        hit.address,
                                        hit.uuid,
                                        iface_name
                                    );
                                    discovered.lock().await.push(hit);
                                }
                                None => {
                                    log::trace!("[SSDP] Ignoring non-SoundTouch reply from {}", src);
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            log::warn!("[SSDP] Socket recv error on {}: {}", iface_name, e);
                        }
                        Err(_) => break,
                    }
                }
            }
        })
        .collect();

    tokio::join!(
        futures::future::join_all(send_futures),
        futures::future::join_all(recv_futures)
    );

    let mut discovered = std::mem::take(&mut *discovered.lock().await);

    let mut seen = HashSet::new();
    discovered.retain(|hit| seen.insert(hit.address.clone()));
    discovered.sort_by(|a, b| a.address.cmp(&b.address));

    log::debug!(
        "[SSDP] Search complete: {} responding device(s)",
        discovered.len()
    );

    Ok(discovered)
}

/// Multicast discovery probe.
///
/// Each reply is enriched with `/info` so the endpoint carries the device's
/// real ID and name; when that fails the USN UUID stands in.
pub struct SsdpProbe {
    client: Client,
    config: SsdpConfig,
}

impl SsdpProbe {
    /// Creates a multicast probe.
    pub fn new(client: Client, config: SsdpConfig) -> Self {
        Self { client, config }
    }

    async fn enrich(&self, hits: Vec<SsdpHit>) -> Vec<DeviceEndpoint> {
        let client = &self.client;
        let port = self.config.device_port;
        let info_timeout = self.config.info_timeout;

        stream::iter(hits)
            .map(|hit| async move {
                match probe_device_by_ip(client, &hit.address, port, info_timeout).await {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        log::debug!("[SSDP] Could not enrich {}: {}", hit.address, e);
                        let endpoint = DeviceEndpoint::with_port(hit.address, port);
                        match hit.uuid {
                            Some(uuid) => {
                                let name = endpoint.display_name.clone();
                                endpoint.identified(uuid, name)
                            }
                            None => endpoint,
                        }
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await
    }
}

#[async_trait]
impl DiscoveryProbe for SsdpProbe {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Multicast
    }

    async fn probe(&self, budget: Duration) -> Vec<DeviceEndpoint> {
        let hits = match discover_multicast(&self.config, budget).await {
            Ok(hits) => hits,
            Err(e) => {
                log::warn!("[SSDP] Multicast discovery unavailable: {}", e);
                return Vec::new();
            }
        };

        if hits.is_empty() {
            return Vec::new();
        }

        let mut endpoints = self.enrich(hits).await;
        endpoints.sort_by(|a, b| a.address.cmp(&b.address));
        endpoints
    }
}
