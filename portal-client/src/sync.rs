use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use shared::types::PortalEvent;
use crate::control::ControlChannel;
use crate::directory::DirectoryWriter;
use crate::error::ControlError;

/// Owns the directory writer and keeps it in step with the daemon.
pub struct Synchronizer<C: ControlChannel + ?Sized> {
    writer: DirectoryWriter,
    channel: Arc<C>,
    /// Listing hash at the last successful listing; cleared on failure so
    /// the first poll after a reconnect always refetches
    last_hash: Option<String>,
}

impl<C: ControlChannel + ?Sized> Synchronizer<C> {
    pub fn new(writer: DirectoryWriter, channel: Arc<C>) -> Self {
        Self {
            writer,
            channel,
            last_hash: None,
        }
    }

    /// One poll round. Fetches the full listing only when the daemon's hash
    /// moved. Returns the number of accepted changes.
    pub async fn poll(&mut self) -> Result<usize, ControlError> {
        match self.poll_inner().await {
            Ok(applied) => Ok(applied),
            Err(e) => {
                self.last_hash = None;
                self.writer.mark_reachable(false);
                Err(e)
            }
        }
    }

    async fn poll_inner(&mut self) -> Result<usize, ControlError> {
        let hash = self.channel.listing_hash().await?;
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            self.writer.mark_reachable(true);
            return Ok(0);
        }

        let listing = self.channel.list_portals().await?;
        let applied = self.writer.apply_listing(listing);
        self.last_hash = Some(hash);
        Ok(applied)
    }

    /// Apply a pushed event
    pub fn push(&mut self, event: PortalEvent) -> bool {
        self.writer.apply(event)
    }

    /// Sync loop: applies pushed events as they arrive and polls on an
    /// interval until cancelled. Transport errors only mark the directory
    /// unreachable; the loop keeps going.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<PortalEvent>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    tracing::debug!(
                        id = %event.id(),
                        version = event.version(),
                        "Pushed portal event"
                    );
                    self.push(event);
                }
                _ = interval.tick() => {
                    let was_reachable = self.writer.is_reachable();
                    match self.poll().await {
                        Ok(0) => {}
                        Ok(applied) => tracing::debug!(applied, "Directory updated from daemon"),
                        Err(e) if was_reachable => {
                            tracing::warn!("Lost daemon, serving last snapshot: {}", e)
                        }
                        Err(e) => tracing::debug!("Daemon still unreachable: {}", e),
                    }
                    if !was_reachable && self.writer.is_reachable() {
                        tracing::info!("Daemon reachable");
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Directory sync shutting down");
                    break;
                }
            }
        }
    }
}
