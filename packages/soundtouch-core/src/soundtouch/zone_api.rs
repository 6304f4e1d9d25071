//! Native zone API encoding.
//!
//! Zones are declarative: `/setZone` and `/removeZoneSlave` are posted to the
//! master with the full member list, and `/getZone` returns the membership the
//! master currently believes in.
//!
//! ```xml
//! <zone master="689E19B8BB8A" senderIPAddress="192.168.1.10">
//!   <member ipaddress="192.168.1.11">689E19653E96</member>
//! </zone>
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::discovery::DeviceEndpoint;
use super::forwarder::NativeRequest;

/// Native path that declares a zone's full membership.
pub const SET_ZONE_PATH: &str = "/setZone";

/// Native path that removes members (all of them dissolves the zone).
pub const REMOVE_ZONE_SLAVE_PATH: &str = "/removeZoneSlave";

/// Native path returning the master's view of the zone.
pub const GET_ZONE_PATH: &str = "/getZone";

/// One member as reported by `/getZone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneMemberInfo {
    pub address: String,
    pub device_id: String,
}

/// The master's view of its zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneMembership {
    /// Master device ID, empty when the device is not in a zone.
    pub master_id: String,
    pub members: Vec<ZoneMemberInfo>,
}

impl ZoneMembership {
    /// Whether the zone lists a member at `address`.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.members.iter().any(|m| m.address == address)
    }
}

/// Reads an attribute value from an XML element, entity-decoded.
fn get_xml_attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| {
            let raw = String::from_utf8_lossy(&a.value);
            html_escape::decode_html_entities(&raw).into_owned()
        })
}

fn zone_body(master: &DeviceEndpoint, members: &[DeviceEndpoint]) -> String {
    let master_id = master.identifier.as_deref().unwrap_or_default();
    let mut body = format!(
        r#"<zone master="{}" senderIPAddress="{}">"#,
        html_escape::encode_double_quoted_attribute(master_id),
        html_escape::encode_double_quoted_attribute(&master.address),
    );
    for member in members {
        body.push_str(&format!(
            r#"<member ipaddress="{}">{}</member>"#,
            html_escape::encode_double_quoted_attribute(&member.address),
            html_escape::encode_text(member.identifier.as_deref().unwrap_or_default()),
        ));
    }
    body.push_str("</zone>");
    body
}

/// `/setZone` declaring `members` as the master's full member list.
#[must_use]
pub fn set_zone_request(master: &DeviceEndpoint, members: &[DeviceEndpoint]) -> NativeRequest {
    NativeRequest::post(SET_ZONE_PATH, zone_body(master, members))
}

/// `/removeZoneSlave` removing `members` from the master's zone.
#[must_use]
pub fn remove_zone_slave_request(
    master: &DeviceEndpoint,
    members: &[DeviceEndpoint],
) -> NativeRequest {
    NativeRequest::post(REMOVE_ZONE_SLAVE_PATH, zone_body(master, members))
}

/// `/getZone` query.
#[must_use]
pub fn get_zone_request() -> NativeRequest {
    NativeRequest::get(GET_ZONE_PATH)
}

/// Parses a `/getZone` response.
///
/// A device outside any zone answers `<zone />`, which parses to an empty
/// membership.
pub fn parse_zone(xml: &str) -> ZoneMembership {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut zone = ZoneMembership::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"zone" => {
                    zone.master_id = get_xml_attr(e, b"master").unwrap_or_default();
                }
                b"member" => {
                    let address = get_xml_attr(e, b"ipaddress");
                    let device_id = reader
                        .read_text(e.name())
                        .map(|t| t.trim().to_string())
                        .unwrap_or_default();
                    if let Some(address) = address {
                        zone.members.push(ZoneMemberInfo { address, device_id });
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"zone" => {
                    zone.master_id = get_xml_attr(e, b"master").unwrap_or_default();
                }
                b"member" => {
                    if let Some(address) = get_xml_attr(e, b"ipaddress") {
                        zone.members.push(ZoneMemberInfo {
                            address,
                            device_id: String::new(),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                log::trace!("[Zone] Error parsing getZone response: {:?}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    zone
}
