//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the one place where the discovery
//! probes, resolver, forwarder and zone coordinator are built from a
//! [`Config`] and wired together.

use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;

use crate::services::{AddressResolver, ResolverConfig, ZoneCoordinator};
use crate::soundtouch::discovery::{
    DeviceEndpoint, DiscoveryProbe, HostProber, HttpHostProber, ScanConfig, SsdpConfig, SsdpProbe,
    SubnetScanProbe,
};
use crate::soundtouch::forwarder::{CommandForwarder, HttpForwarder};
use crate::state::Config;

/// Errors raised while wiring services.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The shared HTTP client could not be built.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Resolves which devices exist.
    pub resolver: Arc<AddressResolver>,
    /// Sends native requests to devices.
    pub forwarder: Arc<dyn CommandForwarder>,
    /// Owns zone state.
    pub zones: Arc<ZoneCoordinator>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }
}

/// Creates the shared HTTP client for all device communication.
///
/// Per-request timeouts are applied by each caller.
fn create_http_client() -> Result<Client, BootstrapError> {
    Ok(Client::builder().build()?)
}

/// Bootstraps all services with their dependencies.
///
/// Wiring order:
///
/// 1. Shared HTTP client
/// 2. Discovery probes (skipped when disabled or when addresses are configured)
/// 3. Address resolver
/// 4. Forwarder and zone coordinator
pub fn bootstrap_services(config: &Config) -> Result<BootstrappedServices, BootstrapError> {
    config.validate().map_err(BootstrapError::InvalidConfig)?;

    let http_client = create_http_client()?;

    let configured: Vec<DeviceEndpoint> = config
        .configured_addresses()
        .into_iter()
        .map(|address| DeviceEndpoint::with_port(address, config.device_port))
        .collect();

    let discover = configured.is_empty();

    let multicast: Option<Arc<dyn DiscoveryProbe>> = (discover && config.multicast_enabled)
        .then(|| {
            let ssdp = SsdpConfig {
                send_count: config.ssdp_send_count,
                retry_delay: std::time::Duration::from_millis(config.ssdp_retry_delay_ms),
                mx_value: config.ssdp_mx,
                info_timeout: config.info_timeout(),
                device_port: config.device_port,
                ..SsdpConfig::default()
            };
            Arc::new(SsdpProbe::new(http_client.clone(), ssdp)) as Arc<dyn DiscoveryProbe>
        });

    let scan: Option<Arc<dyn DiscoveryProbe>> = (discover && config.scan_enabled).then(|| {
        let prober = Arc::new(HttpHostProber::new(
            http_client.clone(),
            config.device_port,
            config.info_timeout(),
        )) as Arc<dyn HostProber>;
        let scan = ScanConfig {
            max_concurrent: config.scan_concurrency,
            host_timeout: config.scan_host_timeout(),
            subnet: config.scan_range(),
        };
        Arc::new(SubnetScanProbe::new(prober, scan)) as Arc<dyn DiscoveryProbe>
    });

    if discover {
        log::info!(
            "[Bootstrap] No device configured; multicast {}, subnet scan {}",
            if multicast.is_some() { "on" } else { "off" },
            if scan.is_some() { "on" } else { "off" },
        );
    } else {
        log::info!(
            "[Bootstrap] Using configured device(s): {}",
            configured
                .iter()
                .map(|e| e.address.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let resolver = Arc::new(AddressResolver::new(
        configured,
        multicast,
        scan,
        ResolverConfig {
            multicast_budget: config.multicast_timeout(),
            scan_budget: config.scan_timeout(),
            device_port: config.device_port,
        },
    ));

    let forwarder: Arc<dyn CommandForwarder> = Arc::new(HttpForwarder::new(
        http_client.clone(),
        config.forward_timeout(),
    ));

    let zones = Arc::new(ZoneCoordinator::new(Arc::clone(&forwarder)));

    Ok(BootstrappedServices {
        resolver,
        forwarder,
        zones,
        http_client,
    })
}
