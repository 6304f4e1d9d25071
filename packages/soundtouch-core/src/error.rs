//! Centralized error types for the SoundTouch proxy.
//!
//! Each subsystem owns a `thiserror` enum; [`ProxyError`] aggregates them for
//! the HTTP layer and maps each to a status code and a JSON body. Device
//! errors are the exception: the device's own status and payload are relayed
//! unchanged.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::services::address_resolver::ResolveError;
use crate::services::zone_coordinator::ZoneError;
use crate::soundtouch::actions::ActionError;
use crate::soundtouch::discovery::DiscoveryError;
use crate::soundtouch::forwarder::ForwardError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::InvalidSubnet(_) => "invalid_subnet",
            Self::IpUnreachable(_) => "ip_unreachable",
            Self::NotSoundTouchDevice(_) => "not_soundtouch_device",
        }
    }
}

impl ErrorCode for ForwardError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "device_unreachable",
            Self::DeviceError { .. } => "device_error",
        }
    }
}

impl ErrorCode for ResolveError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoDeviceFound { .. } => "no_device_found",
        }
    }
}

impl ErrorCode for ActionError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidPreset(_) | Self::EmptySource => "invalid_request",
            Self::Forward(e) => e.code(),
        }
    }
}

impl ErrorCode for ZoneError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "zone_not_found",
            Self::MemberNotFound { .. } => "member_not_found",
            Self::AlreadyExists(_) | Self::NotActive(_) | Self::DeviceInOtherZone { .. } => {
                "zone_conflict"
            }
            Self::InvalidMembers(_) => "invalid_request",
            Self::CreationFailed { .. } => "zone_creation_failed",
            Self::Forward(e) => e.code(),
        }
    }
}

/// Application-wide error type for the proxy's HTTP surface.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No device configured or discovered.
    #[error("No device found: {0}")]
    NoDeviceFound(String),

    /// Connection to the device failed or timed out.
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// The device answered with a non-success status.
    #[error("Device returned HTTP {status}")]
    DeviceError {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },

    /// Zone creation failed; rollback outcome included.
    #[error("Zone creation failed: {cause}")]
    ZoneCreationFailed {
        partial_members: Vec<String>,
        cause: String,
        rollback_error: Option<String>,
    },

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// Zone name or device already in use, or zone still forming.
    #[error("Zone conflict: {0}")]
    ZoneConflict(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Address is not a usable device IP.
    #[error("Invalid IP: {0}")]
    InvalidIp(String),
}

impl ProxyError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoDeviceFound(_) => "no_device_found",
            Self::DeviceUnreachable(_) => "device_unreachable",
            Self::DeviceError { .. } => "device_error",
            Self::ZoneCreationFailed { .. } => "zone_creation_failed",
            Self::ZoneNotFound(_) => "zone_not_found",
            Self::MemberNotFound(_) => "member_not_found",
            Self::ZoneConflict(_) => "zone_conflict",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidIp(_) => "invalid_ip",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoDeviceFound(_) | Self::ZoneNotFound(_) | Self::MemberNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::DeviceUnreachable(_) | Self::ZoneCreationFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::DeviceError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::ZoneConflict(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) | Self::InvalidIp(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Convenient Result alias for HTTP handlers.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

/// JSON body for a failed zone creation.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ZoneCreationFailedResponse<'a> {
    error: &'static str,
    message: String,
    status: u16,
    partial_members: &'a [String],
    rollback_error: Option<&'a str>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::DeviceError {
                content_type, body, ..
            } => {
                let content_type = content_type
                    .clone()
                    .unwrap_or_else(|| "application/xml".to_string());
                (status, [(header::CONTENT_TYPE, content_type)], body.clone()).into_response()
            }
            Self::ZoneCreationFailed {
                partial_members,
                rollback_error,
                ..
            } => {
                let body = ZoneCreationFailedResponse {
                    error: self.code(),
                    message: self.to_string(),
                    status: status.as_u16(),
                    partial_members,
                    rollback_error: rollback_error.as_deref(),
                };
                (status, Json(body)).into_response()
            }
            _ => {
                let body = ErrorResponse {
                    error: self.code(),
                    message: self.to_string(),
                    status: status.as_u16(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

impl From<ForwardError> for ProxyError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::Unreachable { .. } => Self::DeviceUnreachable(err.to_string()),
            ForwardError::DeviceError {
                status,
                content_type,
                body,
            } => Self::DeviceError {
                status,
                content_type,
                body,
            },
        }
    }
}

impl From<ResolveError> for ProxyError {
    fn from(err: ResolveError) -> Self {
        Self::NoDeviceFound(err.to_string())
    }
}

impl From<ActionError> for ProxyError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Forward(e) => e.into(),
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

impl From<DiscoveryError> for ProxyError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::IpUnreachable(_) => Self::DeviceUnreachable(err.to_string()),
            DiscoveryError::NotSoundTouchDevice(_) => Self::InvalidRequest(err.to_string()),
            other => Self::NoDeviceFound(other.to_string()),
        }
    }
}

impl From<ZoneError> for ProxyError {
    fn from(err: ZoneError) -> Self {
        match err {
            ZoneError::NotFound(_) => Self::ZoneNotFound(err.to_string()),
            ZoneError::MemberNotFound { .. } => Self::MemberNotFound(err.to_string()),
            ZoneError::AlreadyExists(_)
            | ZoneError::NotActive(_)
            | ZoneError::DeviceInOtherZone { .. } => Self::ZoneConflict(err.to_string()),
            ZoneError::InvalidMembers(_) => Self::InvalidRequest(err.to_string()),
            ZoneError::CreationFailed {
                partial_members,
                cause,
                rollback_error,
            } => Self::ZoneCreationFailed {
                partial_members,
                cause,
                rollback_error,
            },
            ZoneError::Forward(e) => e.into(),
        }
    }
}
