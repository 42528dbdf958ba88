//! Client-side view of the daemon's portals.
//!
//! [`Directory`] is a cheap, cloneable read handle. Every read clones an
//! `Arc` out of a watch channel, so readers never wait on daemon I/O.
//! [`DirectoryWriter`] is the single writer; whoever owns it (normally the
//! sync task) is the only code that can change what readers see.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use shared::types::{PortalEvent, PortalId, PortalListing, PortalRecord};

/// Immutable view of the directory at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    /// Bumped by one for every published change
    pub generation: u64,
    /// Insertion order
    pub records: Vec<PortalRecord>,
    /// Whether the last sync attempt reached the daemon
    pub daemon_reachable: bool,
    /// When the last full listing was fetched. Polls that find the
    /// listing hash unchanged leave it as is.
    pub synced_at: Option<DateTime<Utc>>,
}

impl DirectorySnapshot {
    pub fn get(&self, id: &PortalId) -> Option<&PortalRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn contains(&self, id: &PortalId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read handle. Clone freely.
#[derive(Clone)]
pub struct Directory {
    rx: watch::Receiver<Arc<DirectorySnapshot>>,
}

impl Directory {
    /// Create an empty directory and its only writer
    pub fn new() -> (Directory, DirectoryWriter) {
        let (tx, rx) = watch::channel(Arc::new(DirectorySnapshot::default()));
        let writer = DirectoryWriter {
            tx,
            records: Vec::new(),
            stamps: HashMap::new(),
            generation: 0,
            daemon_reachable: false,
            synced_at: None,
        };
        (Directory { rx }, writer)
    }

    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.rx.borrow().clone()
    }

    pub fn get(&self, id: &PortalId) -> Option<PortalRecord> {
        self.rx.borrow().get(id).cloned()
    }

    pub fn contains(&self, id: &PortalId) -> bool {
        self.rx.borrow().contains(id)
    }

    /// Register an observer. The first call to [`Subscription::next`]
    /// waits for the first change after subscribing.
    pub fn subscribe(&self) -> Subscription {
        let mut rx = self.rx.clone();
        rx.mark_unchanged();
        Subscription { rx }
    }
}

/// Stream of snapshots with strictly increasing generations.
/// Snapshots published in quick succession may be coalesced.
pub struct Subscription {
    rx: watch::Receiver<Arc<DirectorySnapshot>>,
}

impl Subscription {
    /// Next snapshot, or None once the writer is gone
    pub async fn next(&mut self) -> Option<Arc<DirectorySnapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// The single writer. Not Clone.
pub struct DirectoryWriter {
    tx: watch::Sender<Arc<DirectorySnapshot>>,
    records: Vec<PortalRecord>,
    /// Stamp of the last accepted event per id, including removed ids.
    /// Ids are never reused, so tombstones never go stale.
    stamps: HashMap<PortalId, u64>,
    generation: u64,
    daemon_reachable: bool,
    synced_at: Option<DateTime<Utc>>,
}

impl DirectoryWriter {
    /// Merge one daemon event. Returns false if the event was not newer
    /// than what is stored for its id and was ignored.
    pub fn apply(&mut self, event: PortalEvent) -> bool {
        let accepted = self.merge(event);
        if accepted {
            self.publish();
        }
        accepted
    }

    /// Reconcile against a full listing: listed portals are merged at their
    /// own stamps, known portals missing from the listing are removed at the
    /// listing's stamp. Publishes once. Returns how many changes were accepted.
    pub fn apply_listing(&mut self, listing: PortalListing) -> usize {
        let listed: HashSet<PortalId> = listing
            .portals
            .iter()
            .map(|p| p.record.id.clone())
            .collect();

        let mut accepted = 0;
        for portal in listing.portals {
            let event = if self.position(&portal.record.id).is_some() {
                PortalEvent::Modified { record: portal.record, version: portal.version }
            } else {
                PortalEvent::Added { record: portal.record, version: portal.version }
            };
            if self.merge(event) {
                accepted += 1;
            }
        }

        let missing: Vec<PortalId> = self
            .records
            .iter()
            .filter(|r| !listed.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();
        for id in missing {
            if self.merge(PortalEvent::Removed { id, version: listing.version }) {
                accepted += 1;
            }
        }

        self.daemon_reachable = true;
        self.synced_at = Some(Utc::now());
        self.publish();

        tracing::debug!(accepted, version = listing.version, "Applied daemon listing");
        accepted
    }

    /// Record whether the daemon answered. Records are left untouched.
    pub fn mark_reachable(&mut self, reachable: bool) {
        if self.daemon_reachable != reachable {
            self.daemon_reachable = reachable;
            self.publish();
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.daemon_reachable
    }

    fn position(&self, id: &PortalId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    fn merge(&mut self, event: PortalEvent) -> bool {
        let version = event.version();
        if let Some(&stored) = self.stamps.get(event.id()) {
            if version <= stored {
                tracing::debug!(id = %event.id(), version, stored, "Discarding stale portal event");
                return false;
            }
        }

        match event {
            PortalEvent::Added { record, version } | PortalEvent::Modified { record, version } => {
                self.stamps.insert(record.id.clone(), version);
                match self.position(&record.id) {
                    Some(i) => self.records[i] = record,
                    None => self.records.push(record),
                }
            }
            PortalEvent::Removed { id, version } => {
                self.records.retain(|r| r.id != id);
                self.stamps.insert(id, version);
            }
        }
        true
    }

    fn publish(&mut self) {
        self.generation += 1;
        self.tx.send_replace(Arc::new(DirectorySnapshot {
            generation: self.generation,
            records: self.records.clone(),
            daemon_reachable: self.daemon_reachable,
            synced_at: self.synced_at,
        }));
    }
}
