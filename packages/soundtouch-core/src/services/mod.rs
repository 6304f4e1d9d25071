//! Application services layer.
//!
//! Business logic that sits between the API layer and the device-facing
//! code in `soundtouch/`.

pub mod address_resolver;
pub mod zone_coordinator;

pub use address_resolver::{AddressResolver, DeviceRegistry, ResolveError, ResolverConfig};
pub use zone_coordinator::{
    DeviceFailure, Zone, ZoneCoordinator, ZoneError, ZoneResult, ZoneVolumeReport,
};
