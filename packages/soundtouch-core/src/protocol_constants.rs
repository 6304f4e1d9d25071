//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by SSDP/UPnP and the SoundTouch native API.
//! Tunable timeouts and limits live in [`Config`](crate::state::Config).

// ─────────────────────────────────────────────────────────────────────────────
// SoundTouch native API
// ─────────────────────────────────────────────────────────────────────────────

/// Port of the SoundTouch native HTTP API on every model.
pub const DEVICE_API_PORT: u16 = 8090;

/// Device description path, returns `<info deviceID="...">`.
pub const INFO_PATH: &str = "/info";

/// Sender name the native API expects in `<key>` payloads.
pub const KEY_SENDER: &str = "Gabbo";

/// Highest volume level accepted by `/volume`.
pub const MAX_VOLUME: u8 = 100;

/// Number of preset slots on a SoundTouch device.
pub const PRESET_COUNT: u8 = 6;

/// Native paths polled continuously by the UI; logged at trace level.
pub const POLLING_PATHS: &[&str] = &["now_playing", "volume"];

// ─────────────────────────────────────────────────────────────────────────────
// SSDP
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// SSDP search target answered by SoundTouch speakers.
pub const SSDP_SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// Multicast TTL recommended by UPnP 1.0 for SSDP.
pub const SSDP_MULTICAST_TTL: u32 = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Service identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by `/health`.
pub const SERVICE_ID: &str = "soundtouch-proxy";
