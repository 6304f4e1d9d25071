//! Address resolution: which devices are we talking to?
//!
//! Strategies run in priority order and the first non-empty one wins:
//!
//! 1. Configured addresses, used as-is with no network probes
//! 2. SSDP multicast discovery
//! 3. Subnet scan
//!
//! The winning [`DiscoveryResult`] is published to the [`DeviceRegistry`]
//! and reused until the next explicit refresh.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::soundtouch::discovery::{
    DeviceEndpoint, DiscoveryProbe, DiscoveryResult, DiscoverySource,
};

/// Errors from address resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every strategy came back empty.
    #[error("no SoundTouch device found (tried: {tried})")]
    NoDeviceFound { tried: String },
}

/// Holds the result of the latest discovery cycle.
///
/// Results are swapped whole under a single write; readers clone the `Arc`
/// and never observe a half-built set.
#[derive(Default)]
pub struct DeviceRegistry {
    current: RwLock<Option<Arc<DiscoveryResult>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The published result, if any.
    pub fn current(&self) -> Option<Arc<DiscoveryResult>> {
        self.current.read().clone()
    }

    /// Replaces the published result.
    pub fn publish(&self, result: DiscoveryResult) -> Arc<DiscoveryResult> {
        let result = Arc::new(result);
        *self.current.write() = Some(Arc::clone(&result));
        result
    }

    /// Drops the published result.
    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

/// Time budgets for the discovery strategies.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Listen window of a multicast round.
    pub multicast_budget: Duration,
    /// Overall deadline of a subnet scan.
    pub scan_budget: Duration,
    /// Native API port for ad-hoc endpoints.
    pub device_port: u16,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            multicast_budget: Duration::from_secs(3),
            scan_budget: Duration::from_secs(30),
            device_port: crate::protocol_constants::DEVICE_API_PORT,
        }
    }
}

/// Resolves the set of live device endpoints.
pub struct AddressResolver {
    configured: Vec<DeviceEndpoint>,
    multicast: Option<Arc<dyn DiscoveryProbe>>,
    scan: Option<Arc<dyn DiscoveryProbe>>,
    config: ResolverConfig,
    registry: DeviceRegistry,
    /// One discovery cycle at a time.
    cycle_lock: Mutex<()>,
}

impl AddressResolver {
    /// Creates a resolver.
    ///
    /// With a non-empty `configured` list the probes are never run.
    pub fn new(
        configured: Vec<DeviceEndpoint>,
        multicast: Option<Arc<dyn DiscoveryProbe>>,
        scan: Option<Arc<dyn DiscoveryProbe>>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            configured,
            multicast,
            scan,
            config,
            registry: DeviceRegistry::new(),
            cycle_lock: Mutex::new(()),
        }
    }

    /// Whether addresses were supplied by configuration.
    pub fn is_configured(&self) -> bool {
        !self.configured.is_empty()
    }

    /// The published result without triggering discovery.
    pub fn current(&self) -> Option<Arc<DiscoveryResult>> {
        self.registry.current()
    }

    /// Returns the published result, discovering first if there is none.
    ///
    /// Concurrent callers share one discovery cycle.
    pub async fn resolve(&self) -> Result<Arc<DiscoveryResult>, ResolveError> {
        if let Some(current) = self.registry.current() {
            return Ok(current);
        }

        let _cycle = self.cycle_lock.lock().await;
        // A cycle may have completed while we waited for the lock.
        if let Some(current) = self.registry.current() {
            return Ok(current);
        }
        self.run_cycle().await
    }

    /// Runs a fresh discovery cycle and publishes its result.
    pub async fn refresh(&self) -> Result<Arc<DiscoveryResult>, ResolveError> {
        let _cycle = self.cycle_lock.lock().await;
        self.run_cycle().await
    }

    /// Finds the endpoint for an address.
    ///
    /// Addresses the UI supplies directly may not be in the published result;
    /// they get an unidentified endpoint on the native port.
    pub fn endpoint_for(&self, address: &str) -> DeviceEndpoint {
        self.registry
            .current()
            .and_then(|result| result.find(address).cloned())
            .unwrap_or_else(|| DeviceEndpoint::with_port(address, self.config.device_port))
    }

    async fn run_cycle(&self) -> Result<Arc<DiscoveryResult>, ResolveError> {
        if self.is_configured() {
            log::info!(
                "[Discovery] Using {} configured device(s), skipping discovery",
                self.configured.len()
            );
            return Ok(self.registry.publish(DiscoveryResult::new(
                DiscoverySource::Configured,
                self.configured.clone(),
            )));
        }

        let strategies = [
            (&self.multicast, self.config.multicast_budget),
            (&self.scan, self.config.scan_budget),
        ];

        let mut tried = Vec::new();
        for (probe, budget) in strategies {
            let Some(probe) = probe else { continue };
            let source = probe.source();
            tried.push(source.to_string());

            log::info!("[Discovery] Trying {} ({}ms budget)", source, budget.as_millis());
            let endpoints = probe.probe(budget).await;
            if endpoints.is_empty() {
                log::info!("[Discovery] {} found nothing", source);
                continue;
            }

            let result = DiscoveryResult::new(source, endpoints);
            log::info!(
                "[Discovery] {} found {} device(s): {:?}",
                source,
                result.endpoints.len(),
                result
                    .endpoints
                    .iter()
                    .map(|e| e.address.as_str())
                    .collect::<Vec<_>>()
            );
            return Ok(self.registry.publish(result));
        }

        self.registry.clear();
        log::warn!("[Discovery] No SoundTouch devices found");
        Err(ResolveError::NoDeviceFound {
            tried: if tried.is_empty() {
                "nothing enabled".to_string()
            } else {
                tried.join(", ")
            },
        })
    }
}
