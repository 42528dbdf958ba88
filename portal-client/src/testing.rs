//! In-process doubles for the daemon and the OS adapters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use shared::types::{InviteToken, NewPortal, PortalId, PortalListing, PortalRecord, VersionedPortal};
use crate::adapters::{Clipboard, UrlOpener};
use crate::control::ControlChannel;
use crate::error::{AdapterError, ControlError};

pub fn record(
    id: &str,
    name: &str,
    address: &str,
    port: u16,
    scheme: Option<&str>,
) -> PortalRecord {
    PortalRecord {
        id: PortalId::from(id),
        name: name.to_string(),
        address: address.to_string(),
        port,
        scheme: scheme.map(str::to_string),
    }
}

#[derive(Default)]
struct FakeState {
    version: u64,
    portals: Vec<VersionedPortal>,
}

/// Daemon double. Mutations bump a global stamp the way portald does.
#[derive(Default)]
pub struct FakeControl {
    state: Mutex<FakeState>,
    /// When set, delete_portal waits for a permit before doing anything
    delete_gate: Option<Arc<Semaphore>>,
    pub unreachable: AtomicBool,
    pub list_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub invite_calls: AtomicUsize,
}

impl FakeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delete_gate(gate: Arc<Semaphore>) -> Self {
        Self { delete_gate: Some(gate), ..Self::default() }
    }

    /// Daemon-side provisioning; returns the stamp
    pub fn insert(&self, record: PortalRecord) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version;
        state.portals.push(VersionedPortal { record, version, created_at: Utc::now() });
        version
    }

    /// Daemon-side teardown; returns the stamp
    pub fn teardown(&self, id: &PortalId) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        state.portals.retain(|p| &p.record.id != id);
        state.version
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), ControlError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(ControlError::Unreachable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ControlChannel for FakeControl {
    async fn list_portals(&self) -> Result<PortalListing, ControlError> {
        self.check_reachable()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(PortalListing { version: state.version, portals: state.portals.clone() })
    }

    async fn listing_hash(&self) -> Result<String, ControlError> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(format!("v{}", state.version))
    }

    async fn delete_portal(&self, id: &PortalId) -> Result<(), ControlError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.delete_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.check_reachable()?;

        let mut state = self.state.lock().unwrap();
        let before = state.portals.len();
        state.portals.retain(|p| &p.record.id != id);
        if state.portals.len() == before {
            return Err(ControlError::NotFound);
        }
        state.version += 1;
        Ok(())
    }

    async fn create_invite(&self, id: &PortalId) -> Result<InviteToken, ControlError> {
        self.check_reachable()?;
        self.invite_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if !state.portals.iter().any(|p| &p.record.id == id) {
            return Err(ControlError::NotFound);
        }
        Ok(InviteToken {
            token: format!("invite-{}", id),
            portal_id: id.clone(),
            created_at: Utc::now(),
        })
    }

    async fn create_portal(&self, new: &NewPortal) -> Result<VersionedPortal, ControlError> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if state
            .portals
            .iter()
            .any(|p| p.record.address == new.address && p.record.port == new.port)
        {
            let reason = format!("{}:{} is already bound", new.address, new.port);
            return Err(ControlError::Conflict(reason));
        }
        state.version += 1;
        let portal = VersionedPortal {
            record: PortalRecord {
                id: PortalId(format!("p{}", state.version)),
                name: new.name.clone(),
                address: new.address.clone(),
                port: new.port,
                scheme: new.scheme.clone(),
            },
            version: state.version,
            created_at: Utc::now(),
        };
        state.portals.push(portal.clone());
        Ok(portal)
    }
}

#[derive(Default)]
pub struct RecordingOpener {
    pub opened: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl UrlOpener for RecordingOpener {
    fn open(&self, url: &str) -> Result<(), AdapterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError("no handler for url".to_string()));
        }
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingClipboard {
    pub copied: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl Clipboard for RecordingClipboard {
    fn copy(&self, text: &str) -> Result<(), AdapterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError("no display".to_string()));
        }
        self.copied.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
