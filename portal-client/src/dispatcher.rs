//! Turns user intents on a portal into adapter calls and daemon requests.
//!
//! Each portal id has its own small state machine:
//! `Idle -> InFlight -> Succeeded | Failed`. While an action is in flight
//! any further action on the same id fails with [`ActionError::Busy`];
//! other ids are unaffected. Nothing is retried here.
//!
//! Actions run on their own task. A caller that stops waiting does not
//! free the slot: the record stays in flight until the action ends.
//! Terminal states of ids the Directory no longer lists are forgotten.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use url::Url;
use shared::types::{InviteToken, PortalId, PortalRecord};
use crate::adapters::{Clipboard, UrlOpener};
use crate::control::ControlChannel;
use crate::directory::{Directory, DirectorySnapshot};
use crate::error::{ActionError, ControlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Open,
    CopyAddress,
    Invite,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Open => "open",
            Action::CopyAddress => "copy-address",
            Action::Invite => "invite",
            Action::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    InFlight(Action),
    Succeeded(Action),
    Failed(Action, ActionError),
}

impl ActionState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ActionState::InFlight(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSuccess {
    Opened { url: String },
    Copied { text: String },
    Invited(InviteToken),
    /// `already_absent` is set when the daemon no longer had the portal
    Deleted { already_absent: bool },
}

impl ActionSuccess {
    /// Whether the caller should close whatever transient UI launched the
    /// action. The dispatcher never does this itself.
    pub fn dismiss(&self) -> bool {
        matches!(self, ActionSuccess::Opened { .. } | ActionSuccess::Copied { .. })
    }
}

/// Terminal result of one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub id: PortalId,
    pub action: Action,
    pub result: Result<ActionSuccess, ActionError>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn dismiss(&self) -> bool {
        self.result.as_ref().map(ActionSuccess::dismiss).unwrap_or(false)
    }
}

/// Receiver for a submitted action. Dropping it is fine; the result is
/// then discarded when it arrives.
pub struct ActionTicket {
    rx: oneshot::Receiver<ActionOutcome>,
}

impl ActionTicket {
    /// Wait for the terminal outcome. None only if the runtime shut down
    /// before the action finished.
    pub async fn wait(self) -> Option<ActionOutcome> {
        self.rx.await.ok()
    }
}

struct Inner {
    directory: Directory,
    control: Arc<dyn ControlChannel>,
    opener: Arc<dyn UrlOpener>,
    clipboard: Arc<dyn Clipboard>,
    states: Mutex<HashMap<PortalId, ActionState>>,
}

impl Inner {
    fn states(&self) -> MutexGuard<'_, HashMap<PortalId, ActionState>> {
        // Entries are plain values; a panic elsewhere cannot leave one half-written
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forget terminal states of removed ids. `current` is kept so its latest
/// state stays visible.
fn prune(
    states: &mut HashMap<PortalId, ActionState>,
    snapshot: &DirectorySnapshot,
    current: &PortalId,
) {
    states.retain(|id, state| state.is_in_flight() || id == current || snapshot.contains(id));
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        directory: Directory,
        control: Arc<dyn ControlChannel>,
        opener: Arc<dyn UrlOpener>,
        clipboard: Arc<dyn Clipboard>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory,
                control,
                opener,
                clipboard,
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self, id: &PortalId) -> ActionState {
        self.inner
            .states()
            .get(id)
            .cloned()
            .unwrap_or(ActionState::Idle)
    }

    /// Run an action to completion. Dropping this future does not cancel
    /// the action; the record stays in flight until it ends.
    pub async fn dispatch(&self, record: &PortalRecord, action: Action) -> ActionOutcome {
        self.submit(record.clone(), action)
            .wait()
            .await
            .unwrap_or_else(|| {
                rejected(record, action, ActionError::Interrupted(record.id.clone()))
            })
    }

    /// Start an action on the runtime and return immediately. The busy
    /// check happens before this returns.
    pub fn submit(&self, record: PortalRecord, action: Action) -> ActionTicket {
        let (tx, rx) = oneshot::channel();

        match self.begin(&record.id, action) {
            Ok(slot) => {
                let this = self.clone();
                tokio::spawn(async move {
                    let outcome = this.run(slot, &record, action).await;
                    if tx.send(outcome).is_err() {
                        tracing::debug!(
                            id = %record.id,
                            %action,
                            "Caller gone, dropping action result"
                        );
                    }
                });
            }
            Err(e) => {
                let _ = tx.send(rejected(&record, action, e));
            }
        }

        ActionTicket { rx }
    }

    fn begin(&self, id: &PortalId, action: Action) -> Result<InFlightSlot, ActionError> {
        let snapshot = self.inner.directory.snapshot();
        let mut states = self.inner.states();
        if let Some(ActionState::InFlight(current)) = states.get(id) {
            tracing::debug!(%id, %action, %current, "Rejecting action, another is in flight");
            return Err(ActionError::Busy(id.clone()));
        }
        states.insert(id.clone(), ActionState::InFlight(action));
        prune(&mut states, &snapshot, id);
        Ok(InFlightSlot {
            inner: self.inner.clone(),
            id: id.clone(),
            finished: false,
        })
    }

    async fn run(
        &self,
        mut slot: InFlightSlot,
        record: &PortalRecord,
        action: Action,
    ) -> ActionOutcome {
        let result = self.execute(record, action).await;
        match &result {
            Ok(_) => tracing::info!(id = %record.id, %action, "Action succeeded"),
            Err(e) => tracing::warn!(
                id = %record.id,
                name = %record.name,
                %action,
                "Action failed: {}",
                e
            ),
        }
        slot.finish(action, &result);
        ActionOutcome {
            id: record.id.clone(),
            action,
            result,
        }
    }

    async fn execute(
        &self,
        record: &PortalRecord,
        action: Action,
    ) -> Result<ActionSuccess, ActionError> {
        match action {
            Action::Open => self.open(record).await,
            Action::CopyAddress => self.copy_address(record).await,
            Action::Invite => self.invite(record).await,
            Action::Delete => self.delete(record).await,
        }
    }

    async fn open(&self, record: &PortalRecord) -> Result<ActionSuccess, ActionError> {
        let url = record.url().ok_or_else(|| ActionError::UnsupportedAction {
            action: Action::Open,
            id: record.id.clone(),
            reason: "portal has no URL scheme",
        })?;

        let parsed = Url::parse(&url).map_err(|e| ActionError::InvalidAddress {
            address: url.clone(),
            reason: e.to_string(),
        })?;
        if !parsed.has_host() {
            return Err(ActionError::InvalidAddress {
                address: url,
                reason: "missing host".to_string(),
            });
        }

        let opener = self.inner.opener.clone();
        let target = url.clone();
        tokio::task::spawn_blocking(move || opener.open(&target))
            .await
            .map_err(|e| ActionError::AdapterFailure(format!("url opener panicked: {}", e)))??;

        Ok(ActionSuccess::Opened { url })
    }

    async fn copy_address(&self, record: &PortalRecord) -> Result<ActionSuccess, ActionError> {
        let text = record.socket_address();

        let clipboard = self.inner.clipboard.clone();
        let payload = text.clone();
        tokio::task::spawn_blocking(move || clipboard.copy(&payload))
            .await
            .map_err(|e| ActionError::AdapterFailure(format!("clipboard panicked: {}", e)))??;

        Ok(ActionSuccess::Copied { text })
    }

    async fn invite(&self, record: &PortalRecord) -> Result<ActionSuccess, ActionError> {
        if !self.inner.directory.contains(&record.id) {
            return Err(ActionError::RecordNotFound(record.id.clone()));
        }

        self.inner
            .control
            .create_invite(&record.id)
            .await
            .map(ActionSuccess::Invited)
            .map_err(|e| ActionError::from_control(e, &record.id))
    }

    async fn delete(&self, record: &PortalRecord) -> Result<ActionSuccess, ActionError> {
        match self.inner.control.delete_portal(&record.id).await {
            Ok(()) => Ok(ActionSuccess::Deleted { already_absent: false }),
            Err(ControlError::NotFound) => {
                tracing::debug!(id = %record.id, name = %record.name, "Portal already gone");
                Ok(ActionSuccess::Deleted { already_absent: true })
            }
            Err(e) => Err(ActionError::from_control(e, &record.id)),
        }
    }
}

fn rejected(record: &PortalRecord, action: Action, error: ActionError) -> ActionOutcome {
    ActionOutcome {
        id: record.id.clone(),
        action,
        result: Err(error),
    }
}

/// Holds a record's in-flight slot. Records the terminal state on
/// `finish`; if the running task is torn down first, the record goes
/// back to Idle.
struct InFlightSlot {
    inner: Arc<Inner>,
    id: PortalId,
    finished: bool,
}

impl InFlightSlot {
    fn finish(&mut self, action: Action, result: &Result<ActionSuccess, ActionError>) {
        let terminal = match result {
            Ok(_) => ActionState::Succeeded(action),
            Err(e) => ActionState::Failed(action, e.clone()),
        };
        let snapshot = self.inner.directory.snapshot();
        let mut states = self.inner.states();
        states.insert(self.id.clone(), terminal);
        prune(&mut states, &snapshot, &self.id);
        self.finished = true;
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.states().insert(self.id.clone(), ActionState::Idle);
        }
    }
}
