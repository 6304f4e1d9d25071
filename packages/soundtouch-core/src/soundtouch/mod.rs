//! SoundTouch device control and discovery.
//!
//! Everything here talks to devices over their native HTTP API on port 8090
//! (XML in, XML out) or over SSDP.
//!
//! # Module Structure
//!
//! - `discovery` - SSDP multicast and subnet scan probes, `/info` parsing
//! - `forwarder` - relays native requests and surfaces device failures
//! - `actions` - structured control actions and their native encoding
//! - `zone_api` - `/setZone`, `/getZone` and `/removeZoneSlave` encoding

pub mod actions;
pub mod discovery;
pub mod forwarder;
pub mod zone_api;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use forwarder::{CommandForwarder, HttpForwarder};
