//! Subnet scan fallback.
//!
//! When multicast finds nothing (client isolation, IGMP snooping, VLANs),
//! every candidate host is probed directly: a TCP connect to the native API
//! port followed by `GET /info`. Probes run in a bounded pool; each host has
//! its own timeout and the whole scan has an overall deadline after which
//! outstanding probes are dropped.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

use super::info::probe_device_by_ip;
use super::ssdp::get_interfaces;
use super::types::{DeviceEndpoint, DiscoveryError, DiscoverySource};
use super::DiscoveryProbe;

/// Smallest prefix accepted for a configured scan range (4094 hosts).
const MIN_SCAN_PREFIX: u8 = 20;

/// Largest prefix accepted for a configured scan range (2 hosts).
const MAX_SCAN_PREFIX: u8 = 30;

/// An IPv4 network in CIDR notation, e.g. `192.168.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Subnet {
    /// Creates a subnet, masking host bits off `addr`.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, DiscoveryError> {
        if !(MIN_SCAN_PREFIX..=MAX_SCAN_PREFIX).contains(&prefix) {
            return Err(DiscoveryError::InvalidSubnet(format!(
                "prefix /{} outside /{}../{}",
                prefix, MIN_SCAN_PREFIX, MAX_SCAN_PREFIX
            )));
        }
        let mask = u32::MAX << (32 - prefix);
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }

    /// The /24 containing `addr`.
    #[must_use]
    pub fn class_c(addr: Ipv4Addr) -> Self {
        let [a, b, c, _] = addr.octets();
        Self {
            network: Ipv4Addr::new(a, b, c, 0),
            prefix: 24,
        }
    }

    /// Usable host addresses (network and broadcast addresses excluded).
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let base = u32::from(self.network);
        let size = 1u32 << (32 - self.prefix);
        (1..size - 1).map(move |offset| Ipv4Addr::from(base + offset))
    }
}

impl FromStr for Ipv4Subnet {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| DiscoveryError::InvalidSubnet(format!("missing prefix in {:?}", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| DiscoveryError::InvalidSubnet(format!("bad address in {:?}", s)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| DiscoveryError::InvalidSubnet(format!("bad prefix in {:?}", s)))?;
        Self::new(addr, prefix)
    }
}

impl std::fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Checks a single host for a SoundTouch device.
#[async_trait]
pub trait HostProber: Send + Sync {
    /// Returns the device endpoint if `host` runs the native API.
    ///
    /// Any failure means "not a device"; callers apply their own timeout.
    async fn probe_host(&self, host: Ipv4Addr) -> Option<DeviceEndpoint>;
}

/// Probes hosts over the network: TCP connect, then `/info`.
pub struct HttpHostProber {
    client: Client,
    port: u16,
    info_timeout: Duration,
}

impl HttpHostProber {
    /// Creates a prober for the given native API port.
    pub fn new(client: Client, port: u16, info_timeout: Duration) -> Self {
        Self {
            client,
            port,
            info_timeout,
        }
    }
}

#[async_trait]
impl HostProber for HttpHostProber {
    async fn probe_host(&self, host: Ipv4Addr) -> Option<DeviceEndpoint> {
        // A bare connect rejects closed ports without paying for an HTTP round trip.
        let addr = SocketAddr::new(IpAddr::V4(host), self.port);
        drop(TcpStream::connect(addr).await.ok()?);

        match probe_device_by_ip(&self.client, &host.to_string(), self.port, self.info_timeout)
            .await
        {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                log::trace!("[Scan] {} has port {} open but {}", host, self.port, e);
                None
            }
        }
    }
}

/// Configuration for the subnet scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum probes in flight.
    pub max_concurrent: usize,
    /// Timeout of each host probe.
    pub host_timeout: Duration,
    /// Explicit range; defaults to the /24 of each local interface.
    pub subnet: Option<Ipv4Subnet>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 50,
            host_timeout: Duration::from_secs(1),
            subnet: None,
        }
    }
}

/// Lists the hosts a scan should probe.
///
/// Local interface addresses are never probed.
pub fn candidate_hosts(config: &ScanConfig) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
    let local: Vec<Ipv4Addr> = get_interfaces().into_iter().map(|i| i.ip).collect();

    let subnets = match config.subnet {
        Some(subnet) => vec![subnet],
        None => {
            if local.is_empty() {
                return Err(DiscoveryError::NoInterfaces);
            }
            local.iter().map(|ip| Ipv4Subnet::class_c(*ip)).collect()
        }
    };

    let mut seen: HashSet<Ipv4Addr> = local.iter().copied().collect();
    Ok(subnets
        .iter()
        .flat_map(Ipv4Subnet::hosts)
        .filter(|host| seen.insert(*host))
        .collect())
}

/// Probes `hosts` with at most `max_concurrent` in flight.
///
/// Each probe is cut off after `host_timeout`. When `budget` runs out the
/// remaining probes are dropped and whatever was found so far is returned.
pub async fn scan_hosts(
    prober: &dyn HostProber,
    hosts: Vec<Ipv4Addr>,
    max_concurrent: usize,
    host_timeout: Duration,
    budget: Duration,
) -> Vec<DeviceEndpoint> {
    let deadline = Instant::now() + budget;
    let total = hosts.len();

    let results = stream::iter(hosts)
        .map(|host| async move { timeout(host_timeout, prober.probe_host(host)).await.ok().flatten() })
        .buffer_unordered(max_concurrent.max(1));
    let mut results = std::pin::pin!(results);

    let mut found = Vec::new();
    let mut completed = 0usize;
    loop {
        match timeout_at(deadline, results.next()).await {
            Ok(Some(Some(endpoint))) => {
                completed += 1;
                log::debug!("[Scan] Found {} at {}", endpoint.display_name, endpoint.address);
                found.push(endpoint);
            }
            Ok(Some(None)) => completed += 1,
            Ok(None) => break,
            Err(_) => {
                log::warn!(
                    "[Scan] Deadline reached after {}/{} hosts, abandoning the rest",
                    completed,
                    total
                );
                break;
            }
        }
    }

    found.sort_by(|a, b| a.address.cmp(&b.address));
    found
}

/// Subnet scan probe.
pub struct SubnetScanProbe {
    prober: Arc<dyn HostProber>,
    config: ScanConfig,
}

impl SubnetScanProbe {
    /// Creates a scan probe.
    pub fn new(prober: Arc<dyn HostProber>, config: ScanConfig) -> Self {
        Self { prober, config }
    }
}

#[async_trait]
impl DiscoveryProbe for SubnetScanProbe {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Scan
    }

    async fn probe(&self, budget: Duration) -> Vec<DeviceEndpoint> {
        let hosts = match candidate_hosts(&self.config) {
            Ok(hosts) => hosts,
            Err(e) => {
                log::warn!("[Scan] Cannot determine scan range: {}", e);
                return Vec::new();
            }
        };

        log::info!(
            "[Scan] Probing {} host(s), {} at a time",
            hosts.len(),
            self.config.max_concurrent
        );

        scan_hosts(
            self.prober.as_ref(),
            hosts,
            self.config.max_concurrent,
            self.config.host_timeout,
            budget,
        )
        .await
    }
}
