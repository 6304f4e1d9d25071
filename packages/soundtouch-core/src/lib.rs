//! SoundTouch Core - library behind the SoundTouch proxy.
//!
//! The proxy finds Bose SoundTouch devices on the LAN, relays a web UI's
//! requests to their native HTTP API (port 8090), and coordinates
//! multi-device zones.
//!
//! # Architecture
//!
//! - [`soundtouch`]: device-facing code (discovery probes, native API
//!   encoding, the command forwarder)
//! - [`services`]: address resolution and zone coordination
//! - [`api`]: axum router and handlers
//! - [`bootstrap`]: composition root wiring everything from a [`Config`]
//! - [`error`]: error codes and HTTP mapping
//!
//! # Abstraction Traits
//!
//! - [`DiscoveryProbe`](soundtouch::discovery::DiscoveryProbe): one discovery strategy
//! - [`HostProber`](soundtouch::discovery::HostProber): single-host check used by the subnet scan
//! - [`CommandForwarder`](soundtouch::forwarder::CommandForwarder): native request transport

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod protocol_constants;
pub mod services;
pub mod soundtouch;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, ProxyError, ProxyResult};
pub use state::Config;
pub use utils::{now_millis, parse_device_ip, validate_device_ip, IpValidationError};

// Re-export SoundTouch types
pub use soundtouch::actions::{ControlAction, Key};
pub use soundtouch::discovery::{
    DeviceEndpoint, DiscoveryError, DiscoveryProbe, DiscoveryResult, DiscoverySource,
};
pub use soundtouch::forwarder::{
    CommandForwarder, DeviceResponse, ForwardError, HttpForwarder, NativeRequest,
};

// Re-export service types
pub use services::{AddressResolver, Zone, ZoneCoordinator, ZoneError, ZoneVolumeReport};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrapError, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
