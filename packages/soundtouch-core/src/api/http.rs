//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::api::response::{api_ok, api_success};
use crate::api::AppState;
use crate::error::{ProxyError, ProxyResult};
use crate::protocol_constants::{POLLING_PATHS, SERVICE_ID};
use crate::soundtouch::actions::{perform, ControlAction};
use crate::soundtouch::discovery::{DeviceEndpoint, DiscoveryResult};
use crate::soundtouch::forwarder::{DeviceResponse, NativeRequest};
use crate::utils::parse_device_ip;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DeviceRequest {
    ip: String,
}

#[derive(Deserialize)]
struct CreateZoneRequest {
    name: String,
    master: String,
    members: Vec<String>,
}

#[derive(Deserialize)]
struct VolumeRequest {
    volume: u8,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
///
/// Unmatched requests fall through to the static web root when one is set.
pub fn create_router(state: AppState) -> Router {
    let web_root = state.web_root.clone();

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/discover", get(discover))
        .route("/current-device", get(current_device))
        .route("/set-device", post(set_device))
        .route("/api/{*path}", get(proxy_native).post(proxy_native))
        .route("/devices/{ip}/actions", post(device_action))
        .route("/zones", get(list_zones).post(create_zone))
        .route("/zones/{name}", get(get_zone).delete(remove_zone))
        .route("/zones/{name}/members", post(add_zone_member))
        .route(
            "/zones/{name}/members/{ip}",
            axum::routing::delete(remove_zone_member),
        )
        .route("/zones/{name}/volume", post(set_zone_volume))
        .with_state(state);

    let router = match web_root {
        Some(root) => router.fallback_service(ServeDir::new(root)),
        None => router,
    };

    router
        .layer(middleware::from_fn(log_requests))
        .layer(cors_layer())
}

/// Permissive CORS so a UI served from anywhere can drive the proxy.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Whether a request path is one the UI polls continuously.
fn is_polling_path(path: &str) -> bool {
    path.strip_prefix("/api/")
        .is_some_and(|native| POLLING_PATHS.contains(&native))
}

/// Logs each request; polling traffic only at trace level.
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if is_polling_path(&path) {
        log::trace!("[Server] {} {} -> {}", method, path, response.status());
    } else {
        log::info!("[Server] {} {} -> {}", method, path, response.status());
    }
    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a device address from the client and finds its endpoint.
fn device_endpoint(state: &AppState, ip: &str) -> ProxyResult<DeviceEndpoint> {
    let ip = parse_device_ip(ip).map_err(ProxyError::InvalidIp)?;
    Ok(state.resolver.endpoint_for(&ip.to_string()))
}

/// Devices keyed by address, as the UI expects them.
fn devices_by_ip(result: &DiscoveryResult) -> serde_json::Map<String, serde_json::Value> {
    result
        .endpoints
        .iter()
        .map(|e| (e.address.clone(), json!(e)))
        .collect()
}

/// Relays a device response verbatim.
fn relay(response: DeviceResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let content_type = response
        .content_type
        .unwrap_or_else(|| "application/xml".to_string());
    (status, [(header::CONTENT_TYPE, content_type)], response.body).into_response()
}

/// Splits the `device` override out of a raw query string.
///
/// Returns the override and the remaining query, if any.
fn split_device_param(query: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(query) = query else {
        return (None, None);
    };

    let mut device = None;
    let mut rest = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some(("device", value)) if device.is_none() => device = Some(value.to_string()),
            _ => rest.push(pair),
        }
    }

    let rest = (!rest.is_empty()).then(|| rest.join("&"));
    (device, rest)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check() -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
    }))
}

/// Runs a fresh discovery cycle.
async fn discover(State(state): State<AppState>) -> ProxyResult<impl IntoResponse> {
    let result = state.resolver.refresh().await?;
    Ok(api_success(json!({
        "devices": devices_by_ip(&result),
        "source": result.source,
        "timestamp": result.timestamp,
    })))
}

/// Selected device and the published devices.
///
/// Configured devices are published on first use; otherwise this never
/// discovers.
async fn current_device(State(state): State<AppState>) -> impl IntoResponse {
    let published = if state.resolver.is_configured() {
        state.resolver.resolve().await.ok()
    } else {
        state.resolver.current()
    };
    let devices = published
        .map(|result| devices_by_ip(&result))
        .unwrap_or_default();

    api_success(json!({
        "ip": state.selected_device(),
        "devices": devices,
    }))
}

async fn set_device(
    State(state): State<AppState>,
    Json(payload): Json<DeviceRequest>,
) -> ProxyResult<impl IntoResponse> {
    let ip = parse_device_ip(&payload.ip).map_err(ProxyError::InvalidIp)?;
    state.select_device(ip.to_string());
    Ok(api_success(json!({ "success": true, "ip": ip.to_string() })))
}

/// Target for a pass-through with no device selected.
///
/// Resolves devices, discovering if nothing is published yet, and selects
/// the first one so later requests stay on it.
async fn resolve_default_device(state: &AppState) -> ProxyResult<DeviceEndpoint> {
    let result = state.resolver.resolve().await?;
    let endpoint = result
        .endpoints
        .first()
        .cloned()
        .ok_or_else(|| ProxyError::NoDeviceFound("no SoundTouch devices found".into()))?;
    state.select_device(endpoint.address.clone());
    Ok(endpoint)
}

/// Raw pass-through to the selected device, or to `?device=<ip>`.
///
/// With neither, the first resolved device is used.
async fn proxy_native(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> ProxyResult<Response> {
    let (device, query) = split_device_param(query.as_deref());

    let endpoint = match device.or_else(|| state.selected_device()) {
        Some(ip) => device_endpoint(&state, &ip)?,
        None => resolve_default_device(&state).await?,
    };

    let request = if method == Method::POST {
        NativeRequest::post(path, body)
    } else {
        NativeRequest::get(path)
    }
    .with_query(query);

    let response = state.forwarder.forward(&endpoint, &request).await?;
    Ok(relay(response))
}

/// Performs a structured control action on one device.
async fn device_action(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Json(action): Json<ControlAction>,
) -> ProxyResult<Response> {
    let endpoint = device_endpoint(&state, &ip)?;
    let response = perform(state.forwarder.as_ref(), &endpoint, &action).await?;
    Ok(relay(response))
}

// ─────────────────────────────────────────────────────────────────────────────
// Zone Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_zones(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "zones": state.zones.list() }))
}

async fn create_zone(
    State(state): State<AppState>,
    Json(payload): Json<CreateZoneRequest>,
) -> ProxyResult<impl IntoResponse> {
    let master = device_endpoint(&state, &payload.master)?;
    let members = payload
        .members
        .iter()
        .map(|ip| device_endpoint(&state, ip))
        .collect::<ProxyResult<Vec<_>>>()?;

    let zone = state.zones.create(&payload.name, master, members).await?;
    Ok(api_success(zone))
}

async fn get_zone(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ProxyResult<impl IntoResponse> {
    Ok(api_success(state.zones.get(&name)?))
}

async fn remove_zone(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ProxyResult<impl IntoResponse> {
    state.zones.remove(&name).await?;
    Ok(api_ok())
}

async fn add_zone_member(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<DeviceRequest>,
) -> ProxyResult<impl IntoResponse> {
    let member = device_endpoint(&state, &payload.ip)?;
    let zone = state.zones.add_member(&name, member).await?;
    Ok(api_success(zone))
}

async fn remove_zone_member(
    State(state): State<AppState>,
    Path((name, ip)): Path<(String, String)>,
) -> ProxyResult<impl IntoResponse> {
    let zone = state.zones.remove_member(&name, &ip).await?;
    Ok(api_success(json!({
        "dissolved": zone.is_none(),
        "zone": zone,
    })))
}

/// Sets the volume on every device of a zone; 207 on partial failure.
async fn set_zone_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<VolumeRequest>,
) -> ProxyResult<Response> {
    let report = state.zones.volume(&name, payload.volume).await?;
    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(report)).into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::services::{AddressResolver, ResolverConfig, ZoneCoordinator};
    use crate::soundtouch::forwarder::CommandForwarder;
    use crate::soundtouch::test_fixtures::{zone_xml, MockForwarder};

    const DEVICE: &str = "192.168.1.100";
    const OTHER: &str = "192.168.1.101";

    fn state_with(configured: &[&str]) -> (Arc<MockForwarder>, AppState) {
        let forwarder = Arc::new(MockForwarder::new());
        let resolver = Arc::new(AddressResolver::new(
            configured.iter().map(|ip| DeviceEndpoint::new(*ip)).collect(),
            None,
            None,
            ResolverConfig::default(),
        ));
        let dyn_forwarder = Arc::clone(&forwarder) as Arc<dyn CommandForwarder>;
        let zones = Arc::new(ZoneCoordinator::new(Arc::clone(&dyn_forwarder)));
        (forwarder, AppState::new(resolver, dyn_forwarder, zones))
    }

    fn selected() -> (Arc<MockForwarder>, AppState) {
        let (forwarder, state) = state_with(&[DEVICE]);
        state.select_device(DEVICE.to_string());
        (forwarder, state)
    }

    async fn send(state: &AppState, request: Request<Body>) -> Response {
        create_router(state.clone()).oneshot(request).await.unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[test]
    fn device_param_is_split_from_query() {
        assert_eq!(split_device_param(None), (None, None));
        assert_eq!(
            split_device_param(Some("device=10.0.0.2")),
            (Some("10.0.0.2".into()), None)
        );
        assert_eq!(
            split_device_param(Some("sort=asc&device=10.0.0.2&page=2")),
            (Some("10.0.0.2".into()), Some("sort=asc&page=2".into()))
        );
        assert_eq!(
            split_device_param(Some("sort=asc")),
            (None, Some("sort=asc".into()))
        );
    }

    #[test]
    fn polling_paths_are_recognized() {
        assert!(is_polling_path("/api/now_playing"));
        assert!(is_polling_path("/api/volume"));
        assert!(!is_polling_path("/api/key"));
        assert!(!is_polling_path("/volume"));
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (_, state) = state_with(&[]);
        let response = send(&state, get_req("/health")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "soundtouch-proxy");
    }

    #[tokio::test]
    async fn passthrough_without_devices_is_not_found() {
        let (forwarder, state) = state_with(&[]);
        let response = send(&state, get_req("/api/now_playing")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "no_device_found");
        assert!(forwarder.calls().is_empty());
        assert_eq!(state.selected_device(), None);
    }

    #[tokio::test]
    async fn passthrough_resolves_device_when_none_selected() {
        let (forwarder, state) = state_with(&[DEVICE, OTHER]);
        assert_eq!(state.selected_device(), None);

        let response = send(&state, get_req("/api/now_playing")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(forwarder.calls_to(DEVICE, "/now_playing").len(), 1);
        assert_eq!(state.selected_device(), Some(DEVICE.to_string()));
        assert!(state.resolver.current().is_some());
    }

    #[tokio::test]
    async fn current_device_lists_configured_devices() {
        let (forwarder, state) = state_with(&[DEVICE, OTHER]);

        let current = body_json(send(&state, get_req("/current-device")).await).await;

        assert!(current["ip"].is_null());
        let devices = current["devices"].as_object().unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.contains_key(DEVICE));
        assert!(devices.contains_key(OTHER));
        assert!(forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn current_device_never_discovers() {
        let (_, state) = state_with(&[]);

        let response = send(&state, get_req("/current-device")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let current = body_json(response).await;
        assert!(current["ip"].is_null());
        assert!(current["devices"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn passthrough_relays_device_response() {
        let (forwarder, state) = selected();
        forwarder.respond(DEVICE, "/now_playing", "<nowPlaying source=\"AUX\"/>");

        let response = send(&state, get_req("/api/now_playing")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
        assert_eq!(
            &body_bytes(response).await[..],
            b"<nowPlaying source=\"AUX\"/>"
        );
        let calls = forwarder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, DEVICE);
        assert_eq!(calls[0].1, NativeRequest::get("/now_playing"));
    }

    #[tokio::test]
    async fn passthrough_posts_body_verbatim() {
        let (forwarder, state) = selected();
        let xml = r#"<key state="press" sender="Gabbo">PLAY</key>"#;

        let request = Request::post("/api/key").body(Body::from(xml)).unwrap();
        let response = send(&state, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        let sent = forwarder.calls_to(DEVICE, "/key");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body_text(), xml);
    }

    #[tokio::test]
    async fn device_query_overrides_selection() {
        let (forwarder, state) = selected();

        let uri = format!("/api/sources?device={}&refresh=1", OTHER);
        let response = send(&state, get_req(&uri)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let calls = forwarder.calls_to(OTHER, "/sources");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query.as_deref(), Some("refresh=1"));
        assert!(forwarder.calls_to(DEVICE, "/sources").is_empty());
    }

    #[tokio::test]
    async fn device_errors_pass_through() {
        let (forwarder, state) = selected();
        forwarder.fail(DEVICE, "/select", 500);

        let request = Request::post("/api/select").body(Body::from("<x/>")).unwrap();
        let response = send(&state, request).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_bytes(response).await;
        assert!(String::from_utf8_lossy(&body).contains("<errors>"));
    }

    #[tokio::test]
    async fn unreachable_device_is_bad_gateway() {
        let (forwarder, state) = selected();
        forwarder.set_unreachable(DEVICE);

        let response = send(&state, get_req("/api/info")).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "device_unreachable");
    }

    #[tokio::test]
    async fn set_device_validates_and_selects() {
        let (_, state) = state_with(&[]);

        let bad = send(&state, json_req("POST", "/set-device", json!({ "ip": "localhost" }))).await;
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(bad).await["error"], "invalid_ip");

        let ok = send(&state, json_req("POST", "/set-device", json!({ "ip": OTHER }))).await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(state.selected_device().as_deref(), Some(OTHER));

        let current = body_json(send(&state, get_req("/current-device")).await).await;
        assert_eq!(current["ip"], OTHER);
    }

    #[tokio::test]
    async fn discover_returns_devices_by_ip() {
        let (forwarder, state) = state_with(&[DEVICE]);

        let response = send(&state, get_req("/discover")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["source"], "configured");
        assert_eq!(body["devices"][DEVICE]["address"], DEVICE);
        assert_eq!(body["devices"][DEVICE]["port"], 8090);
        assert!(forwarder.calls().is_empty());

        let current = body_json(send(&state, get_req("/current-device")).await).await;
        assert_eq!(current["devices"][DEVICE]["address"], DEVICE);
    }

    #[tokio::test]
    async fn discover_without_devices_is_not_found() {
        let (_, state) = state_with(&[]);

        let response = send(&state, get_req("/discover")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "no_device_found");
    }

    #[tokio::test]
    async fn actions_are_forwarded() {
        let (forwarder, state) = state_with(&[]);

        let uri = format!("/devices/{}/actions", DEVICE);
        let response = send(
            &state,
            json_req("POST", &uri, json!({ "action": "volume", "level": 30 })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let sent = forwarder.calls_to(DEVICE, "/volume");
        assert_eq!(sent[0].body_text(), "<volume>30</volume>");
    }

    #[tokio::test]
    async fn invalid_action_is_bad_request() {
        let (forwarder, state) = state_with(&[]);

        let uri = format!("/devices/{}/actions", DEVICE);
        let response = send(
            &state,
            json_req("POST", &uri, json!({ "action": "preset", "number": 9 })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn zone_lifecycle_over_http() {
        let (forwarder, state) = state_with(&[]);
        // Members are unidentified, so they are looked up via /info first.
        forwarder.respond(
            DEVICE,
            "/info",
            crate::soundtouch::test_fixtures::info_xml("MASTER", "Living Room"),
        );
        forwarder.respond(
            OTHER,
            "/info",
            crate::soundtouch::test_fixtures::info_xml("MEMBER", "Kitchen"),
        );
        forwarder.respond(DEVICE, "/getZone", zone_xml("MASTER", &[(OTHER, "MEMBER")]));

        let created = send(
            &state,
            json_req(
                "POST",
                "/zones",
                json!({ "name": "downstairs", "master": DEVICE, "members": [OTHER] }),
            ),
        )
        .await;
        assert_eq!(created.status(), StatusCode::OK);
        assert_eq!(body_json(created).await["members"][0]["identifier"], "MEMBER");

        let listed = body_json(send(&state, get_req("/zones")).await).await;
        assert_eq!(listed["zones"][0]["name"], "downstairs");

        forwarder.set_unreachable(OTHER);
        let volume = send(
            &state,
            json_req("POST", "/zones/downstairs/volume", json!({ "volume": 25 })),
        )
        .await;
        assert_eq!(volume.status(), StatusCode::MULTI_STATUS);
        let report = body_json(volume).await;
        assert_eq!(report["succeeded"][0], DEVICE);
        assert_eq!(report["failed"][0]["address"], OTHER);

        let removed = send(
            &state,
            Request::delete(format!("/zones/downstairs/members/{}", OTHER))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(removed.status(), StatusCode::OK);
        assert_eq!(body_json(removed).await["dissolved"], true);

        let gone = send(&state, get_req("/zones/downstairs")).await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(gone).await["error"], "zone_not_found");
    }

    #[tokio::test]
    async fn cors_preflight_is_answered() {
        let (_, state) = state_with(&[]);
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/key")
            .header(header::ORIGIN, "http://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = send(&state, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }
}
