//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::bootstrap::BootstrappedServices;
use crate::services::{AddressResolver, ZoneCoordinator};
use crate::soundtouch::forwarder::CommandForwarder;
use crate::state::Config;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Resolves which devices exist.
    pub resolver: Arc<AddressResolver>,
    /// Sends native requests to devices.
    pub forwarder: Arc<dyn CommandForwarder>,
    /// Owns zone state.
    pub zones: Arc<ZoneCoordinator>,
    /// Device the pass-through targets when no `?device=` is given.
    selected_device: Arc<RwLock<Option<String>>>,
    /// Static UI files served for unmatched GET requests.
    pub web_root: Option<PathBuf>,
    /// Port the server binds on.
    pub bind_port: u16,
}

impl AppState {
    /// Creates state with no device selected, no web root and the default port.
    pub fn new(
        resolver: Arc<AddressResolver>,
        forwarder: Arc<dyn CommandForwarder>,
        zones: Arc<ZoneCoordinator>,
    ) -> Self {
        Self {
            resolver,
            forwarder,
            zones,
            selected_device: Arc::new(RwLock::new(None)),
            web_root: None,
            bind_port: Config::default().bind_port,
        }
    }

    /// Builds state from bootstrapped services.
    ///
    /// The first configured address, if any, starts out selected.
    pub fn from_services(services: &BootstrappedServices, config: &Config) -> Self {
        let state = Self::new(
            Arc::clone(&services.resolver),
            Arc::clone(&services.forwarder),
            Arc::clone(&services.zones),
        );
        if let Some(first) = config.configured_addresses().into_iter().next() {
            state.select_device(first);
        }
        Self {
            web_root: config.web_root.clone(),
            bind_port: config.bind_port,
            ..state
        }
    }

    /// Currently selected device address.
    pub fn selected_device(&self) -> Option<String> {
        self.selected_device.read().clone()
    }

    /// Selects the device the pass-through targets.
    pub fn select_device(&self, address: String) {
        log::info!("[Server] Device set to {}", address);
        *self.selected_device.write() = Some(address);
    }
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.bind_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("[Server] Listening on http://0.0.0.0:{}", state.bind_port);
    if let Some(root) = &state.web_root {
        log::info!("[Server] Serving static files from {}", root.display());
    }

    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
