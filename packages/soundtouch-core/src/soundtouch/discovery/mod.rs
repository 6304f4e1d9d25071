//! SoundTouch device discovery.
//!
//! Two probes are available, both time-bounded and both reporting "nothing
//! found" as an empty list rather than an error:
//!
//! - [`SsdpProbe`]: SSDP M-SEARCH on every usable interface
//! - [`SubnetScanProbe`]: direct `/info` probe of every candidate host
//!
//! The [`AddressResolver`](crate::services::AddressResolver) decides which to
//! run and in what order.

use std::time::Duration;

use async_trait::async_trait;

pub mod info;
pub mod scan;
pub mod ssdp;
pub mod types;

pub use info::{fetch_device_info, parse_device_info, probe_device_by_ip, DeviceInfo};
pub use scan::{HostProber, HttpHostProber, Ipv4Subnet, ScanConfig, SubnetScanProbe};
pub use ssdp::{SsdpConfig, SsdpProbe};
pub use types::{
    fallback_display_name, DeviceEndpoint, DiscoveryError, DiscoveryResult, DiscoverySource,
};

/// One discovery strategy.
#[async_trait]
pub trait DiscoveryProbe: Send + Sync {
    /// Which source results of this probe are attributed to.
    fn source(&self) -> DiscoverySource;

    /// Runs one discovery round, returning within roughly `budget`.
    ///
    /// Socket or interface problems are logged and yield an empty list.
    async fn probe(&self, budget: Duration) -> Vec<DeviceEndpoint>;
}
