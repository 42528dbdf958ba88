use shared::types::PortalId;
use thiserror::Error;
use crate::dispatcher::Action;

/// Terminal failure of a dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The action needs a field the portal does not have
    #[error("{action} is not supported for portal {id}: {reason}")]
    UnsupportedAction {
        action: Action,
        id: PortalId,
        reason: &'static str,
    },

    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The portal vanished before the daemon round-trip completed
    #[error("portal {0} no longer exists")]
    RecordNotFound(PortalId),

    #[error("adapter failed: {0}")]
    AdapterFailure(String),

    #[error("daemon unreachable: {0}")]
    DaemonUnreachable(String),

    /// Daemon-side error, passed through as the daemon phrased it
    #[error("daemon rejected request: {0}")]
    DaemonRejected(String),

    #[error("an action is already in flight for portal {0}")]
    Busy(PortalId),

    /// The task running the action ended without a result
    #[error("action on portal {0} was interrupted")]
    Interrupted(PortalId),
}

/// Failure talking to the daemon over its control channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Rejected(String),
}

/// Failure of an OS-facing side effect (URL open, clipboard).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AdapterError(pub String);

impl From<AdapterError> for ActionError {
    fn from(e: AdapterError) -> Self {
        ActionError::AdapterFailure(e.0)
    }
}

impl ActionError {
    /// Map a daemon error for an action on `id`. A missing portal is
    /// reported as RecordNotFound; callers that tolerate absence check
    /// for NotFound before calling this.
    pub(crate) fn from_control(e: ControlError, id: &PortalId) -> Self {
        match e {
            ControlError::Unreachable(msg) => ActionError::DaemonUnreachable(msg),
            ControlError::NotFound => ActionError::RecordNotFound(id.clone()),
            ControlError::Conflict(msg) | ControlError::Rejected(msg) => {
                ActionError::DaemonRejected(msg)
            }
        }
    }
}
