//! Multi-device zone orchestration.
//!
//! A zone is one master and one or more members. Membership is declarative:
//! every mutation re-sends the master the full member list. Each zone moves
//! through `forming -> active` and is gone once dissolved; operations on one
//! zone are serialized while different zones proceed independently.
//!
//! A device belongs to at most one zone, as master or member.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::protocol_constants::{INFO_PATH, MAX_VOLUME};
use crate::soundtouch::actions::volume_request;
use crate::soundtouch::discovery::{parse_device_info, DeviceEndpoint};
use crate::soundtouch::forwarder::{CommandForwarder, ForwardError, NativeRequest};
use crate::soundtouch::zone_api::{
    get_zone_request, parse_zone, remove_zone_slave_request, set_zone_request,
};

/// Errors from zone operations.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// No zone with this name.
    #[error("zone not found: {0}")]
    NotFound(String),

    /// A zone with this name already exists.
    #[error("zone already exists: {0}")]
    AlreadyExists(String),

    /// The zone is still being formed.
    #[error("zone {0} is not active")]
    NotActive(String),

    /// The device is master or member of another zone.
    #[error("device {address} already belongs to zone {zone}")]
    DeviceInOtherZone { address: String, zone: String },

    /// The requested membership is malformed.
    #[error("invalid zone members: {0}")]
    InvalidMembers(String),

    /// The address is not a member of the zone.
    #[error("{address} is not a member of zone {zone}")]
    MemberNotFound { zone: String, address: String },

    /// Creation failed after commands were sent; rollback was attempted.
    #[error("zone creation failed: {cause}")]
    CreationFailed {
        /// Members the master reported as joined before rollback.
        partial_members: Vec<String>,
        /// Why creation failed.
        cause: String,
        /// Set when the rollback itself failed.
        rollback_error: Option<String>,
    },

    /// A device call failed.
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

/// Convenient Result alias for zone operations.
pub type ZoneResult<T> = Result<T, ZoneError>;

/// Snapshot of an active zone.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub name: String,
    pub master: DeviceEndpoint,
    pub members: Vec<DeviceEndpoint>,
}

impl Zone {
    /// Master followed by members.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceEndpoint> {
        std::iter::once(&self.master).chain(self.members.iter())
    }
}

/// A device that failed during a fan-out.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceFailure {
    pub address: String,
    pub error: String,
}

/// Outcome of a zone-wide volume change.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneVolumeReport {
    pub zone: String,
    pub level: u8,
    pub succeeded: Vec<String>,
    pub failed: Vec<DeviceFailure>,
}

impl ZoneVolumeReport {
    /// Whether every device accepted the change.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZonePhase {
    Forming,
    Active,
    /// Removed from the map; waiters holding the entry must treat it as absent.
    Dissolved,
}

struct ZoneState {
    phase: ZonePhase,
    zone: Zone,
}

struct ZoneEntry {
    /// Serializes mutations of this zone.
    op_lock: tokio::sync::Mutex<()>,
    state: parking_lot::RwLock<ZoneState>,
}

/// Local state a cancelled change must give back.
enum PendingKind {
    /// A zone being created; its entry and claims are dropped.
    Forming,
    /// A member being added; only its claim is released.
    Joining(DeviceEndpoint),
}

/// Cleans up a create or add whose future is dropped before it finishes.
///
/// Once a command may have reached the master, `undo` holds the request that
/// reverts it. `drop` cannot await, so that request is sent from a detached task.
struct PendingChange<'a> {
    coordinator: &'a ZoneCoordinator,
    name: String,
    entry: Arc<ZoneEntry>,
    kind: PendingKind,
    undo: Option<(DeviceEndpoint, NativeRequest)>,
    armed: bool,
}

impl<'a> PendingChange<'a> {
    fn new(
        coordinator: &'a ZoneCoordinator,
        name: &str,
        entry: Arc<ZoneEntry>,
        kind: PendingKind,
    ) -> Self {
        Self {
            coordinator,
            name: name.to_string(),
            entry,
            kind,
            undo: None,
            armed: true,
        }
    }

    /// Records how to revert a command about to be sent to `master`.
    fn undo_with(&mut self, master: &DeviceEndpoint, request: NativeRequest) {
        self.undo = Some((master.clone(), request));
    }

    /// The change ran to completion; the caller handles the outcome.
    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingChange<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        log::warn!("[Zone] Change to {} was cancelled, cleaning up", self.name);
        match &self.kind {
            PendingKind::Forming => self.coordinator.discard(&self.name, &self.entry),
            PendingKind::Joining(member) => self.coordinator.release(member),
        }

        let Some((master, request)) = self.undo.take() else {
            return;
        };
        let forwarder = Arc::clone(&self.coordinator.forwarder);
        let name = self.name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = forwarder.forward(&master, &request).await {
                        log::error!("[Zone] Undoing cancelled change to {} failed: {}", name, e);
                    }
                });
            }
            Err(_) => log::error!(
                "[Zone] No runtime to undo cancelled change to {} on {}",
                name,
                master.address
            ),
        }
    }
}

fn claim_key(endpoint: &DeviceEndpoint) -> String {
    format!("{}:{}", endpoint.address, endpoint.port)
}

/// Builds and tears down zones by issuing native commands to their devices.
pub struct ZoneCoordinator {
    forwarder: Arc<dyn CommandForwarder>,
    zones: DashMap<String, Arc<ZoneEntry>>,
    /// Device (address:port) to owning zone name.
    claims: parking_lot::Mutex<HashMap<String, String>>,
}

impl ZoneCoordinator {
    /// Creates a coordinator with no zones.
    pub fn new(forwarder: Arc<dyn CommandForwarder>) -> Self {
        Self {
            forwarder,
            zones: DashMap::new(),
            claims: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Active zones, sorted by name.
    pub fn list(&self) -> Vec<Zone> {
        let mut zones: Vec<Zone> = self
            .zones
            .iter()
            .filter_map(|entry| {
                let state = entry.value().state.read();
                (state.phase == ZonePhase::Active).then(|| state.zone.clone())
            })
            .collect();
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        zones
    }

    /// Snapshot of one active zone.
    pub fn get(&self, name: &str) -> ZoneResult<Zone> {
        let entry = self.entry(name)?;
        self.active_zone(name, &entry)
    }

    /// Creates a zone and verifies every member joined.
    ///
    /// If any member is missing afterwards the zone is rolled back and
    /// `CreationFailed` reports which members had joined.
    pub async fn create(
        &self,
        name: &str,
        master: DeviceEndpoint,
        members: Vec<DeviceEndpoint>,
    ) -> ZoneResult<Zone> {
        validate_members(name, &master, &members)?;

        let entry = self.reserve(name, &master, &members)?;
        let mut pending = PendingChange::new(self, name, Arc::clone(&entry), PendingKind::Forming);
        let _op = entry.op_lock.lock().await;

        let result = self.form(name, master, members, &mut pending).await;
        pending.settle();
        match result {
            Ok(zone) => {
                let mut state = entry.state.write();
                state.zone = zone.clone();
                state.phase = ZonePhase::Active;
                log::info!(
                    "[Zone] {} active: master {} with {} member(s)",
                    name,
                    zone.master.address,
                    zone.members.len()
                );
                Ok(zone)
            }
            Err(e) => {
                self.discard(name, &entry);
                Err(e)
            }
        }
    }

    /// Adds a member to an active zone.
    pub async fn add_member(&self, name: &str, member: DeviceEndpoint) -> ZoneResult<Zone> {
        let entry = self.entry(name)?;
        let _op = entry.op_lock.lock().await;
        let zone = self.active_zone(name, &entry)?;

        if zone.devices().any(|d| d.same_device(&member)) {
            return Err(ZoneError::InvalidMembers(format!(
                "{} is already part of zone {}",
                member.address, name
            )));
        }

        self.claim(name, &member)?;
        let mut pending = PendingChange::new(
            self,
            name,
            Arc::clone(&entry),
            PendingKind::Joining(member.clone()),
        );

        let member = match self.identify(member.clone()).await {
            Ok(member) => member,
            Err(e) => {
                pending.settle();
                self.release(&member);
                return Err(e);
            }
        };

        let mut members = zone.members.clone();
        members.push(member.clone());

        pending.undo_with(
            &zone.master,
            remove_zone_slave_request(&zone.master, std::slice::from_ref(&member)),
        );
        let sent = self
            .send_to_master(name, &entry, &zone, set_zone_request(&zone.master, &members))
            .await;
        pending.settle();
        if let Err(e) = sent {
            self.release(&member);
            return Err(e);
        }

        log::info!("[Zone] {} gained member {}", name, member.address);
        Ok(self.update_members(&entry, members))
    }

    /// Removes a member; removing the last one dissolves the zone.
    ///
    /// Returns the updated zone, or `None` when the zone was dissolved.
    pub async fn remove_member(&self, name: &str, address: &str) -> ZoneResult<Option<Zone>> {
        let entry = self.entry(name)?;
        let _op = entry.op_lock.lock().await;
        let zone = self.active_zone(name, &entry)?;

        let Some(removed) = zone.members.iter().find(|m| m.address == address).cloned() else {
            return Err(ZoneError::MemberNotFound {
                zone: name.to_string(),
                address: address.to_string(),
            });
        };

        let remaining: Vec<DeviceEndpoint> = zone
            .members
            .iter()
            .filter(|m| !m.same_device(&removed))
            .cloned()
            .collect();

        if remaining.is_empty() {
            self.send_to_master(
                name,
                &entry,
                &zone,
                remove_zone_slave_request(&zone.master, &zone.members),
            )
            .await?;
            self.discard(name, &entry);
            log::info!("[Zone] {} dissolved, last member {} removed", name, address);
            return Ok(None);
        }

        self.send_to_master(name, &entry, &zone, set_zone_request(&zone.master, &remaining))
            .await?;
        self.release(&removed);

        log::info!("[Zone] {} lost member {}", name, address);
        Ok(Some(self.update_members(&entry, remaining)))
    }

    /// Dissolves a zone.
    pub async fn remove(&self, name: &str) -> ZoneResult<()> {
        let entry = self.entry(name)?;
        let _op = entry.op_lock.lock().await;
        let zone = self.active_zone(name, &entry)?;

        self.send_to_master(
            name,
            &entry,
            &zone,
            remove_zone_slave_request(&zone.master, &zone.members),
        )
        .await?;
        self.discard(name, &entry);

        log::info!("[Zone] {} removed", name);
        Ok(())
    }

    /// Sets the volume on every device of a zone independently.
    ///
    /// Partial failure is reported, never raised. An unreachable master
    /// destroys the zone once the fan-out completes.
    pub async fn volume(&self, name: &str, level: u8) -> ZoneResult<ZoneVolumeReport> {
        let entry = self.entry(name)?;
        let _op = entry.op_lock.lock().await;
        let zone = self.active_zone(name, &entry)?;

        let request = volume_request(level);
        let futures: Vec<_> = zone
            .devices()
            .map(|device| {
                let forwarder = &self.forwarder;
                let request = &request;
                async move {
                    let result = forwarder.forward(device, request).await;
                    (device.address.clone(), result)
                }
            })
            .collect();

        let mut report = ZoneVolumeReport {
            zone: name.to_string(),
            level: level.min(MAX_VOLUME),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        let mut master_lost = false;

        for (address, result) in join_all(futures).await {
            match result {
                Ok(_) => report.succeeded.push(address),
                Err(e) => {
                    if address == zone.master.address && e.is_unreachable() {
                        master_lost = true;
                    }
                    log::warn!("[Zone] {} volume on {} failed: {}", name, address, e);
                    report.failed.push(DeviceFailure {
                        address,
                        error: e.to_string(),
                    });
                }
            }
        }

        if master_lost {
            log::warn!(
                "[Zone] {} master {} unreachable, dropping zone",
                name,
                zone.master.address
            );
            self.discard(name, &entry);
        }

        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn entry(&self, name: &str) -> ZoneResult<Arc<ZoneEntry>> {
        self.zones
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ZoneError::NotFound(name.to_string()))
    }

    fn active_zone(&self, name: &str, entry: &ZoneEntry) -> ZoneResult<Zone> {
        let state = entry.state.read();
        match state.phase {
            ZonePhase::Active => Ok(state.zone.clone()),
            ZonePhase::Forming => Err(ZoneError::NotActive(name.to_string())),
            ZonePhase::Dissolved => Err(ZoneError::NotFound(name.to_string())),
        }
    }

    /// Claims the name and every device, and inserts a forming entry.
    fn reserve(
        &self,
        name: &str,
        master: &DeviceEndpoint,
        members: &[DeviceEndpoint],
    ) -> ZoneResult<Arc<ZoneEntry>> {
        let mut claims = self.claims.lock();

        if self.zones.contains_key(name) {
            return Err(ZoneError::AlreadyExists(name.to_string()));
        }

        for device in std::iter::once(master).chain(members.iter()) {
            if let Some(owner) = claims.get(&claim_key(device)) {
                return Err(ZoneError::DeviceInOtherZone {
                    address: device.address.clone(),
                    zone: owner.clone(),
                });
            }
        }

        for device in std::iter::once(master).chain(members.iter()) {
            claims.insert(claim_key(device), name.to_string());
        }

        let entry = Arc::new(ZoneEntry {
            op_lock: tokio::sync::Mutex::new(()),
            state: parking_lot::RwLock::new(ZoneState {
                phase: ZonePhase::Forming,
                zone: Zone {
                    name: name.to_string(),
                    master: master.clone(),
                    members: members.to_vec(),
                },
            }),
        });
        self.zones.insert(name.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    fn claim(&self, name: &str, device: &DeviceEndpoint) -> ZoneResult<()> {
        let mut claims = self.claims.lock();
        let key = claim_key(device);
        if let Some(owner) = claims.get(&key) {
            return Err(ZoneError::DeviceInOtherZone {
                address: device.address.clone(),
                zone: owner.clone(),
            });
        }
        claims.insert(key, name.to_string());
        Ok(())
    }

    fn release(&self, device: &DeviceEndpoint) {
        self.claims.lock().remove(&claim_key(device));
    }

    /// Marks the entry dissolved, removes it, and frees its devices.
    ///
    /// Claims are locked before the map, the same order `reserve` uses, so a
    /// zone re-created under this name cannot lose its claims here.
    fn discard(&self, name: &str, entry: &Arc<ZoneEntry>) {
        entry.state.write().phase = ZonePhase::Dissolved;
        let mut claims = self.claims.lock();
        let removed = self
            .zones
            .remove_if(name, |_, current| Arc::ptr_eq(current, entry));
        if removed.is_some() {
            claims.retain(|_, owner| owner != name);
        }
    }

    fn update_members(&self, entry: &ZoneEntry, members: Vec<DeviceEndpoint>) -> Zone {
        let mut state = entry.state.write();
        state.zone.members = members;
        state.zone.clone()
    }

    /// Sends a request to the master; an unreachable master drops the zone.
    async fn send_to_master(
        &self,
        name: &str,
        entry: &Arc<ZoneEntry>,
        zone: &Zone,
        request: NativeRequest,
    ) -> ZoneResult<()> {
        match self.forwarder.forward(&zone.master, &request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_unreachable() {
                    log::warn!(
                        "[Zone] {} master {} unreachable, dropping zone",
                        name,
                        zone.master.address
                    );
                    self.discard(name, entry);
                }
                Err(e.into())
            }
        }
    }

    /// Fills in a missing identifier from `/info`.
    async fn identify(&self, endpoint: DeviceEndpoint) -> ZoneResult<DeviceEndpoint> {
        if endpoint.identifier.is_some() {
            return Ok(endpoint);
        }

        let response = self
            .forwarder
            .forward(&endpoint, &NativeRequest::get(INFO_PATH))
            .await?;
        let info = parse_device_info(&response.text()).ok_or_else(|| {
            ZoneError::InvalidMembers(format!("{} is not a SoundTouch device", endpoint.address))
        })?;

        Ok(endpoint.identified(info.device_id, info.name))
    }

    /// Identifies devices, declares the zone, then verifies membership.
    async fn form(
        &self,
        name: &str,
        master: DeviceEndpoint,
        members: Vec<DeviceEndpoint>,
        pending: &mut PendingChange<'_>,
    ) -> ZoneResult<Zone> {
        // Nothing has been sent to the master yet, so no rollback is needed here.
        let master = self.identify(master).await?;
        let mut identified = Vec::with_capacity(members.len());
        for member in members {
            identified.push(self.identify(member).await?);
        }
        let members = identified;

        log::info!(
            "[Zone] Forming {}: master {} with {:?}",
            name,
            master.address,
            members.iter().map(|m| m.address.as_str()).collect::<Vec<_>>()
        );

        pending.undo_with(&master, remove_zone_slave_request(&master, &members));
        if let Err(e) = self
            .forwarder
            .forward(&master, &set_zone_request(&master, &members))
            .await
        {
            return Err(self.roll_back(name, &master, &members, Vec::new(), e.to_string()).await);
        }

        let membership = match self.forwarder.forward(&master, &get_zone_request()).await {
            Ok(response) => parse_zone(&response.text()),
            Err(e) => {
                let cause = format!("could not verify membership: {}", e);
                return Err(self.roll_back(name, &master, &members, Vec::new(), cause).await);
            }
        };

        let (joined, missing): (Vec<&DeviceEndpoint>, Vec<&DeviceEndpoint>) = members
            .iter()
            .partition(|m| membership.contains(&m.address));

        if !missing.is_empty() {
            let joined: Vec<String> = joined.iter().map(|m| m.address.clone()).collect();
            let cause = format!(
                "member(s) did not join: {}",
                missing
                    .iter()
                    .map(|m| m.address.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            return Err(self.roll_back(name, &master, &members, joined, cause).await);
        }

        Ok(Zone {
            name: name.to_string(),
            master,
            members,
        })
    }

    /// Undoes a partially formed zone on the master.
    async fn roll_back(
        &self,
        name: &str,
        master: &DeviceEndpoint,
        members: &[DeviceEndpoint],
        partial_members: Vec<String>,
        cause: String,
    ) -> ZoneError {
        log::warn!("[Zone] Creating {} failed ({}), rolling back", name, cause);

        let rollback_error = match self
            .forwarder
            .forward(master, &remove_zone_slave_request(master, members))
            .await
        {
            Ok(_) => None,
            Err(e) => {
                log::error!("[Zone] Rollback of {} failed: {}", name, e);
                Some(e.to_string())
            }
        };

        ZoneError::CreationFailed {
            partial_members,
            cause,
            rollback_error,
        }
    }
}

fn validate_members(
    name: &str,
    master: &DeviceEndpoint,
    members: &[DeviceEndpoint],
) -> ZoneResult<()> {
    if name.trim().is_empty() {
        return Err(ZoneError::InvalidMembers("zone name must not be empty".into()));
    }
    if members.is_empty() {
        return Err(ZoneError::InvalidMembers(
            "a zone needs at least one member".into(),
        ));
    }
    if members.iter().any(|m| m.same_device(master)) {
        return Err(ZoneError::InvalidMembers(format!(
            "master {} cannot also be a member",
            master.address
        )));
    }
    for (i, member) in members.iter().enumerate() {
        if members[..i].iter().any(|m| m.same_device(member)) {
            return Err(ZoneError::InvalidMembers(format!(
                "{} listed more than once",
                member.address
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::soundtouch::test_fixtures::{info_xml, zone_xml, MockForwarder};

    const A: &str = "192.168.1.10";
    const B: &str = "192.168.1.11";
    const C: &str = "192.168.1.12";
    const D: &str = "192.168.1.13";

    fn device(ip: &str) -> DeviceEndpoint {
        let id = format!("ID-{}", ip.rsplit('.').next().unwrap_or_default());
        DeviceEndpoint::new(ip).identified(id.clone(), id)
    }

    fn id(ip: &str) -> String {
        device(ip).identifier.unwrap()
    }

    fn setup() -> (Arc<MockForwarder>, ZoneCoordinator) {
        let forwarder = Arc::new(MockForwarder::new());
        let coordinator = ZoneCoordinator::new(Arc::clone(&forwarder) as Arc<dyn CommandForwarder>);
        (forwarder, coordinator)
    }

    /// Scripts the master's getZone answer to list `members`.
    fn joined(forwarder: &MockForwarder, master: &str, members: &[&str]) {
        let ids: Vec<String> = members.iter().map(|ip| id(ip)).collect();
        let pairs: Vec<(&str, &str)> = members
            .iter()
            .zip(ids.iter())
            .map(|(ip, id)| (*ip, id.as_str()))
            .collect();
        forwarder.respond(master, "/getZone", zone_xml(&id(master), &pairs));
    }

    async fn active_zone(forwarder: &MockForwarder, coordinator: &ZoneCoordinator, members: &[&str]) {
        joined(forwarder, A, members);
        coordinator
            .create("living", device(A), members.iter().map(|ip| device(ip)).collect())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_declares_members_and_verifies() {
        let (forwarder, coordinator) = setup();
        joined(&forwarder, A, &[B, C]);

        let zone = coordinator
            .create("living", device(A), vec![device(B), device(C)])
            .await
            .unwrap();

        assert_eq!(zone.members.len(), 2);
        let set_zone = forwarder.calls_to(A, "/setZone");
        assert_eq!(set_zone.len(), 1);
        let body = set_zone[0].body_text();
        assert!(body.contains(r#"<zone master="ID-10" senderIPAddress="192.168.1.10">"#));
        assert!(body.contains(r#"<member ipaddress="192.168.1.11">ID-11</member>"#));
        assert!(body.contains(r#"<member ipaddress="192.168.1.12">ID-12</member>"#));
        assert_eq!(forwarder.calls_to(A, "/getZone").len(), 1);
        assert_eq!(coordinator.list(), vec![zone]);
    }

    #[tokio::test]
    async fn create_rolls_back_when_member_missing() {
        let (forwarder, coordinator) = setup();
        joined(&forwarder, A, &[B]);

        let err = coordinator
            .create("living", device(A), vec![device(B), device(C)])
            .await
            .unwrap_err();

        match err {
            ZoneError::CreationFailed {
                partial_members,
                cause,
                rollback_error,
            } => {
                assert_eq!(partial_members, vec![B.to_string()]);
                assert!(cause.contains(C));
                assert!(rollback_error.is_none());
            }
            other => panic!("expected CreationFailed, got {:?}", other),
        }

        let rollback = forwarder.calls_to(A, "/removeZoneSlave");
        assert_eq!(rollback.len(), 1);
        assert!(rollback[0].body_text().contains(B));
        assert!(rollback[0].body_text().contains(C));
        assert!(matches!(coordinator.get("living"), Err(ZoneError::NotFound(_))));
        assert!(coordinator.list().is_empty());
    }

    #[tokio::test]
    async fn rollback_failure_is_reported_with_cause() {
        let (forwarder, coordinator) = setup();
        forwarder.fail(A, "/setZone", 500);
        forwarder.fail(A, "/removeZoneSlave", 500);

        let err = coordinator
            .create("living", device(A), vec![device(B)])
            .await
            .unwrap_err();

        match err {
            ZoneError::CreationFailed {
                partial_members,
                cause,
                rollback_error,
            } => {
                assert!(partial_members.is_empty());
                assert!(cause.contains("500"));
                assert!(rollback_error.unwrap().contains("500"));
            }
            other => panic!("expected CreationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_creation_releases_devices() {
        let (forwarder, coordinator) = setup();
        joined(&forwarder, A, &[]);

        assert!(coordinator
            .create("living", device(A), vec![device(B)])
            .await
            .is_err());

        joined(&forwarder, A, &[B]);
        coordinator
            .create("living", device(A), vec![device(B)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_identifies_unknown_devices() {
        let (forwarder, coordinator) = setup();
        forwarder.respond(B, "/info", info_xml("BEEF0001", "Kitchen"));
        forwarder.respond(A, "/getZone", zone_xml("ID-10", &[(B, "BEEF0001")]));

        let zone = coordinator
            .create("living", device(A), vec![DeviceEndpoint::new(B)])
            .await
            .unwrap();

        assert_eq!(zone.members[0].identifier.as_deref(), Some("BEEF0001"));
        assert_eq!(zone.members[0].display_name, "Kitchen");
        assert!(forwarder.calls_to(A, "/setZone")[0]
            .body_text()
            .contains(">BEEF0001</member>"));
    }

    #[tokio::test]
    async fn unreachable_member_fails_before_any_zone_command() {
        let (forwarder, coordinator) = setup();
        forwarder.set_unreachable(B);

        let err = coordinator
            .create("living", device(A), vec![DeviceEndpoint::new(B)])
            .await
            .unwrap_err();

        assert!(matches!(err, ZoneError::Forward(ref e) if e.is_unreachable()));
        assert!(forwarder.calls_to(A, "/setZone").is_empty());
        assert!(coordinator.list().is_empty());
    }

    #[tokio::test]
    async fn create_validates_membership() {
        let (_, coordinator) = setup();

        let empty = coordinator.create("z", device(A), vec![]).await;
        assert!(matches!(empty, Err(ZoneError::InvalidMembers(_))));

        let self_member = coordinator.create("z", device(A), vec![device(A)]).await;
        assert!(matches!(self_member, Err(ZoneError::InvalidMembers(_))));

        let duplicate = coordinator
            .create("z", device(A), vec![device(B), device(B)])
            .await;
        assert!(matches!(duplicate, Err(ZoneError::InvalidMembers(_))));
    }

    #[tokio::test]
    async fn device_belongs_to_one_zone() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;
        joined(&forwarder, C, &[B]);

        let err = coordinator
            .create("kitchen", device(C), vec![device(B)])
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::DeviceInOtherZone { ref zone, .. } if zone == "living"));

        let err = coordinator
            .create("kitchen", device(A), vec![device(C)])
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::DeviceInOtherZone { ref address, .. } if address == A));

        let err = coordinator
            .create("living", device(C), vec![device(D)])
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn add_member_resends_full_list() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;

        let zone = coordinator.add_member("living", device(C)).await.unwrap();

        assert_eq!(zone.members.len(), 2);
        let set_zone = forwarder.calls_to(A, "/setZone");
        assert_eq!(set_zone.len(), 2);
        let body = set_zone[1].body_text();
        assert!(body.contains(B));
        assert!(body.contains(C));

        let again = coordinator.add_member("living", device(C)).await;
        assert!(matches!(again, Err(ZoneError::InvalidMembers(_))));
    }

    #[tokio::test]
    async fn remove_member_resends_reduced_list() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B, C]).await;

        let zone = coordinator.remove_member("living", B).await.unwrap().unwrap();

        assert_eq!(zone.members, vec![device(C)]);
        let body = forwarder.calls_to(A, "/setZone")[1].body_text().into_owned();
        assert!(!body.contains(B));
        assert!(body.contains(C));

        // B is free to join another zone now.
        joined(&forwarder, D, &[B]);
        coordinator.create("den", device(D), vec![device(B)]).await.unwrap();
    }

    #[tokio::test]
    async fn removing_last_member_dissolves_zone() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;

        let result = coordinator.remove_member("living", B).await.unwrap();

        assert!(result.is_none());
        assert_eq!(forwarder.calls_to(A, "/removeZoneSlave").len(), 1);
        assert!(matches!(
            coordinator.volume("living", 20).await,
            Err(ZoneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_unknown_member() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;

        let err = coordinator.remove_member("living", D).await.unwrap_err();
        assert!(matches!(err, ZoneError::MemberNotFound { .. }));
    }

    #[tokio::test]
    async fn remove_zone() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B, C]).await;

        coordinator.remove("living").await.unwrap();

        assert!(coordinator.list().is_empty());
        assert!(matches!(coordinator.remove("living").await, Err(ZoneError::NotFound(_))));
    }

    #[tokio::test]
    async fn volume_fans_out_and_reports_partial_failure() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;
        forwarder.set_unreachable(B);

        let report = coordinator.volume("living", 30).await.unwrap();

        assert_eq!(report.succeeded, vec![A.to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].address, B);
        assert!(!report.is_complete());
        assert_eq!(forwarder.calls_to(A, "/volume")[0].body_text(), "<volume>30</volume>");
        assert!(coordinator.get("living").is_ok());
    }

    #[tokio::test]
    async fn unreachable_master_destroys_zone() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;
        forwarder.set_unreachable(A);

        let report = coordinator.volume("living", 30).await.unwrap();

        assert_eq!(report.succeeded, vec![B.to_string()]);
        assert!(matches!(coordinator.get("living"), Err(ZoneError::NotFound(_))));
    }

    #[tokio::test]
    async fn operations_on_missing_zone() {
        let (_, coordinator) = setup();
        assert!(matches!(coordinator.get("nope"), Err(ZoneError::NotFound(_))));
        assert!(matches!(
            coordinator.add_member("nope", device(B)).await,
            Err(ZoneError::NotFound(_))
        ));
        assert!(matches!(
            coordinator.volume("nope", 10).await,
            Err(ZoneError::NotFound(_))
        ));
    }

    /// Gives detached cleanup tasks a chance to run.
    async fn settle_tasks() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn cancelled_create_frees_name_and_rolls_back() {
        let (forwarder, coordinator) = setup();
        forwarder.stall(A, "/getZone");

        let cancelled = timeout(
            Duration::from_millis(50),
            coordinator.create("living", device(A), vec![device(B)]),
        )
        .await;
        assert!(cancelled.is_err());
        settle_tasks().await;

        let rollback = forwarder.calls_to(A, "/removeZoneSlave");
        assert_eq!(rollback.len(), 1);
        assert!(rollback[0].body_text().contains(B));
        assert!(matches!(coordinator.get("living"), Err(ZoneError::NotFound(_))));

        forwarder.resume(A, "/getZone");
        joined(&forwarder, A, &[B]);
        let zone = coordinator
            .create("living", device(A), vec![device(B)])
            .await
            .unwrap();
        assert_eq!(coordinator.list(), vec![zone]);
    }

    #[tokio::test]
    async fn cancelled_create_before_declaring_sends_nothing() {
        let (forwarder, coordinator) = setup();
        forwarder.stall(B, "/info");

        let cancelled = timeout(
            Duration::from_millis(50),
            coordinator.create("living", device(A), vec![DeviceEndpoint::new(B)]),
        )
        .await;
        assert!(cancelled.is_err());
        settle_tasks().await;

        assert!(forwarder.calls_to(A, "/setZone").is_empty());
        assert!(forwarder.calls_to(A, "/removeZoneSlave").is_empty());

        joined(&forwarder, C, &[B]);
        coordinator
            .create("kitchen", device(C), vec![device(B)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_add_releases_member() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;
        forwarder.stall(A, "/setZone");

        let cancelled = timeout(
            Duration::from_millis(50),
            coordinator.add_member("living", device(C)),
        )
        .await;
        assert!(cancelled.is_err());
        settle_tasks().await;

        let undo = forwarder.calls_to(A, "/removeZoneSlave");
        assert_eq!(undo.len(), 1);
        assert!(undo[0].body_text().contains(C));
        assert!(!undo[0].body_text().contains(B));
        assert_eq!(coordinator.get("living").unwrap().members, vec![device(B)]);

        joined(&forwarder, D, &[C]);
        coordinator
            .create("kitchen", device(D), vec![device(C)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_discard_keeps_claims_of_recreated_zone() {
        let (forwarder, coordinator) = setup();
        active_zone(&forwarder, &coordinator, &[B]).await;
        let stale = coordinator.entry("living").unwrap();
        coordinator.remove("living").await.unwrap();

        joined(&forwarder, A, &[C]);
        coordinator
            .create("living", device(A), vec![device(C)])
            .await
            .unwrap();

        coordinator.discard("living", &stale);

        assert!(coordinator.get("living").is_ok());
        assert!(matches!(
            coordinator.create("kitchen", device(D), vec![device(C)]).await,
            Err(ZoneError::DeviceInOtherZone { .. })
        ));
    }
}
