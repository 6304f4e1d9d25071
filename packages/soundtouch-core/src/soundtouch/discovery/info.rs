//! Device description probing via the native `/info` endpoint.
//!
//! Every SoundTouch speaker answers `GET http://<ip>:8090/info` with a small
//! XML document carrying its stable device ID and friendly name:
//!
//! ```xml
//! <info deviceID="689E19B8BB8A">
//!   <name>Living Room</name>
//!   <type>SoundTouch 20</type>
//! </info>
//! ```

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;

use super::types::{DeviceEndpoint, DiscoveryError};
use crate::protocol_constants::INFO_PATH;

/// Identity fields parsed from `/info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable device ID (`deviceID` attribute).
    pub device_id: String,
    /// Friendly name.
    pub name: String,
    /// Model name (e.g. "SoundTouch 20").
    pub device_type: Option<String>,
}

/// Parses the `/info` XML document.
///
/// Returns `None` when the document is not a SoundTouch description
/// (no `<info>` root with a `deviceID`).
pub fn parse_device_info(xml: &str) -> Option<DeviceInfo> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut device_id = None;
    let mut name = None;
    let mut device_type = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"info" if depth == 1 => {
                        device_id = e
                            .try_get_attribute("deviceID")
                            .ok()
                            .flatten()
                            .map(|a| String::from_utf8_lossy(&a.value).trim().to_string());
                    }
                    // Only the top-level children; <components> repeats <type>.
                    b"name" if depth == 2 => {
                        name = reader.read_text(e.name()).ok().map(|t| decode(&t));
                        depth -= 1;
                    }
                    b"type" if depth == 2 => {
                        device_type = reader.read_text(e.name()).ok().map(|t| decode(&t));
                        depth -= 1;
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::trace!("[Discovery] Error parsing /info response: {:?}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    let device_id = device_id.filter(|id| !id.is_empty())?;
    Some(DeviceInfo {
        device_id,
        name: name.unwrap_or_default(),
        device_type: device_type.filter(|t| !t.is_empty()),
    })
}

fn decode(raw: &str) -> String {
    html_escape::decode_html_entities(raw.trim()).into_owned()
}

/// Fetches and parses `/info` from an endpoint.
///
/// # Errors
/// * `IpUnreachable` - connection failed or timed out
/// * `NotSoundTouchDevice` - the host answered but not with a device description
pub async fn fetch_device_info(
    client: &Client,
    endpoint: &DeviceEndpoint,
    timeout: Duration,
) -> Result<DeviceInfo, DiscoveryError> {
    let url = endpoint.url(INFO_PATH);

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|_| DiscoveryError::IpUnreachable(endpoint.address.clone()))?;

    if !response.status().is_success() {
        return Err(DiscoveryError::NotSoundTouchDevice(endpoint.address.clone()));
    }

    let body = response
        .text()
        .await
        .map_err(|_| DiscoveryError::NotSoundTouchDevice(endpoint.address.clone()))?;

    parse_device_info(&body)
        .ok_or_else(|| DiscoveryError::NotSoundTouchDevice(endpoint.address.clone()))
}

/// Probes a single address and returns an identified endpoint.
///
/// Used by the scan, by SSDP enrichment, and by the zone coordinator to fill
/// in identifiers for UI-supplied addresses.
pub async fn probe_device_by_ip(
    client: &Client,
    address: &str,
    port: u16,
    timeout: Duration,
) -> Result<DeviceEndpoint, DiscoveryError> {
    let endpoint = DeviceEndpoint::with_port(address, port);
    let info = fetch_device_info(client, &endpoint, timeout).await?;
    log::debug!(
        "[Discovery] Probed {}: id={}, name={:?}",
        address,
        info.device_id,
        info.name
    );
    Ok(endpoint.identified(info.device_id, info.name))
}
