use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use shared::types::{InviteToken, NewPortal, PortalId, PortalListing, VersionedPortal};
use crate::store::db::{PortalDb, WriteOutcome};
use crate::store::hash;

/// Commands sent to the store thread
pub enum StoreCommand {
    Create(NewPortal, oneshot::Sender<Result<WriteOutcome>>),
    Update(PortalId, NewPortal, oneshot::Sender<Result<WriteOutcome>>),
    Delete(PortalId, oneshot::Sender<Result<Option<u64>>>),
    List(oneshot::Sender<Result<PortalListing>>),
    Get(PortalId, oneshot::Sender<Result<Option<VersionedPortal>>>),
    Invite(PortalId, oneshot::Sender<Result<Option<InviteToken>>>),
    Shutdown,
}

/// Handle to the thread that owns the portal database
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn the store thread. The listing hash is republished on
    /// `hash_tx` after every mutation.
    pub fn spawn(db: PortalDb, hash_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        let recompute_hash = |db: &PortalDb, hash_tx: &watch::Sender<String>| {
            if let Ok(listing) = db.list_portals() {
                let new_hash = hash::compute_hash(&listing.portals);
                hash_tx.send_if_modified(|current| {
                    if *current == new_hash {
                        false
                    } else {
                        *current = new_hash;
                        true
                    }
                });
            }
        };

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Create(new, reply) => {
                        let result = db.create_portal(&new);
                        if let Ok(WriteOutcome::Written(vp)) = &result {
                            tracing::info!(
                                id = %vp.record.id,
                                name = %vp.record.name,
                                version = vp.version,
                                "Portal created"
                            );
                            recompute_hash(&db, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::Update(id, new, reply) => {
                        let result = db.update_portal(&id, &new);
                        if let Ok(WriteOutcome::Written(vp)) = &result {
                            tracing::debug!(
                                id = %vp.record.id,
                                version = vp.version,
                                "Portal updated"
                            );
                            recompute_hash(&db, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::Delete(id, reply) => {
                        let result = db.delete_portal(&id);
                        if let Ok(Some(version)) = &result {
                            tracing::info!(%id, version, "Portal deleted");
                            recompute_hash(&db, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::List(reply) => {
                        let _ = reply.send(db.list_portals());
                    }
                    StoreCommand::Get(id, reply) => {
                        let _ = reply.send(db.get_portal(&id));
                    }
                    StoreCommand::Invite(id, reply) => {
                        let result = db.create_invite(&id);
                        if let Ok(Some(_)) = &result {
                            tracing::info!(%id, "Invite created");
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    pub async fn create(&self, new: NewPortal) -> Result<WriteOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Create(new, reply)).await?;
        rx.await?
    }

    pub async fn update(&self, id: PortalId, new: NewPortal) -> Result<WriteOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Update(id, new, reply)).await?;
        rx.await?
    }

    /// Returns the removal stamp, or None if no portal had that id
    pub async fn delete(&self, id: PortalId) -> Result<Option<u64>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Delete(id, reply)).await?;
        rx.await?
    }

    pub async fn list(&self) -> Result<PortalListing> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::List(reply)).await?;
        rx.await?
    }

    pub async fn get(&self, id: PortalId) -> Result<Option<VersionedPortal>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Get(id, reply)).await?;
        rx.await?
    }

    pub async fn invite(&self, id: PortalId) -> Result<Option<InviteToken>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Invite(id, reply)).await?;
        rx.await?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await?;
        Ok(())
    }
}
