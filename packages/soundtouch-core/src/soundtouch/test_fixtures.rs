//! Shared test fixtures: native API payloads, a scriptable forwarder, and
//! in-process device servers.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;

use super::discovery::DeviceEndpoint;
use super::forwarder::{CommandForwarder, DeviceResponse, ForwardError, ForwardResult, NativeRequest};

/// `/info` body for a device.
pub fn info_xml(device_id: &str, name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" ?><info deviceID="{}"><name>{}</name><type>SoundTouch 10</type></info>"#,
        device_id, name
    )
}

/// `/getZone` body listing `(ip, device_id)` members.
pub fn zone_xml(master_id: &str, members: &[(&str, &str)]) -> String {
    let mut xml = format!(r#"<?xml version="1.0" encoding="UTF-8" ?><zone master="{}">"#, master_id);
    for (ip, id) in members {
        xml.push_str(&format!(r#"<member ipaddress="{}">{}</member>"#, ip, id));
    }
    xml.push_str("</zone>");
    xml
}

/// Serves `router` on an ephemeral localhost port and returns the port.
pub async fn spawn_device(router: Router) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    port
}

/// A localhost port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// Forwarder that records every call and answers from a script.
///
/// Unscripted calls succeed with `<status>/path</status>`.
#[derive(Default)]
pub struct MockForwarder {
    calls: Mutex<Vec<(String, NativeRequest)>>,
    unreachable: Mutex<HashSet<String>>,
    failing: Mutex<HashMap<(String, String), u16>>,
    stalled: Mutex<HashSet<(String, String)>>,
    responses: Mutex<HashMap<(String, String), String>>,
}

impl MockForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `address` fails as unreachable.
    pub fn set_unreachable(&self, address: &str) {
        self.unreachable.lock().insert(address.to_string());
    }

    /// Calls to `address` + `path` fail with `status`.
    pub fn fail(&self, address: &str, path: &str, status: u16) {
        self.failing
            .lock()
            .insert((address.to_string(), path.to_string()), status);
    }

    /// Calls to `address` + `path` never complete.
    pub fn stall(&self, address: &str, path: &str) {
        self.stalled
            .lock()
            .insert((address.to_string(), path.to_string()));
    }

    /// Undoes [`MockForwarder::stall`].
    pub fn resume(&self, address: &str, path: &str) {
        self.stalled
            .lock()
            .remove(&(address.to_string(), path.to_string()));
    }

    /// Calls to `address` + `path` succeed with `body`.
    pub fn respond(&self, address: &str, path: &str, body: impl Into<String>) {
        self.responses
            .lock()
            .insert((address.to_string(), path.to_string()), body.into());
    }

    /// All calls in order, as `(address, request)`.
    pub fn calls(&self) -> Vec<(String, NativeRequest)> {
        self.calls.lock().clone()
    }

    /// Requests sent to `address` for `path`.
    pub fn calls_to(&self, address: &str, path: &str) -> Vec<NativeRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|(a, r)| a == address && r.path == path)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl CommandForwarder for MockForwarder {
    async fn forward(
        &self,
        endpoint: &DeviceEndpoint,
        request: &NativeRequest,
    ) -> ForwardResult<DeviceResponse> {
        self.calls
            .lock()
            .push((endpoint.address.clone(), request.clone()));

        if self.unreachable.lock().contains(&endpoint.address) {
            return Err(ForwardError::Unreachable {
                address: endpoint.address.clone(),
                reason: "connection failed".into(),
            });
        }

        let key = (endpoint.address.clone(), request.path.clone());
        let stalled = self.stalled.lock().contains(&key);
        if stalled {
            std::future::pending::<()>().await;
        }

        if let Some(status) = self.failing.lock().get(&key) {
            return Err(ForwardError::DeviceError {
                status: *status,
                content_type: Some("text/xml".into()),
                body: Bytes::from_static(b"<errors><error value=\"401\"/></errors>"),
            });
        }

        let body = self
            .responses
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| format!("<status>{}</status>", request.path));

        Ok(DeviceResponse {
            status: 200,
            content_type: Some("text/xml".into()),
            body: Bytes::from(body),
        })
    }
}
