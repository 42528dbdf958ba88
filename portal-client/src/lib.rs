//! Client core for locally exposed portals: a daemon-synchronized
//! [`Directory`] of portal records and a [`Dispatcher`] that runs
//! open / copy / invite / delete against them.

pub mod adapters;
pub mod config;
pub mod control;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod sync;

#[cfg(test)]
mod testing;

pub use directory::{Directory, DirectorySnapshot, DirectoryWriter, Subscription};
pub use dispatcher::{Action, ActionOutcome, ActionState, ActionSuccess, ActionTicket, Dispatcher};
pub use error::{ActionError, AdapterError, ControlError};
