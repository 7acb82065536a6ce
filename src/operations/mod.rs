//! # Record Operations
//!
//! Save, delete and edit orchestration for entity records.
//!
//! Saves and deletes follow one fixed sequence on every path:
//!
//! 1. resolve the entity descriptor (configuration errors stop here, before
//!    any side effect)
//! 2. acquire the record lock
//! 3. dispatch the START action
//! 4. issue the REST request
//! 5. on success, dispatch `RECEIVE_ITEMS` (save) or `REMOVE_ITEMS` (delete)
//! 6. dispatch the FINISH action, carrying the error if the request failed
//! 7. release the lock, then hand the result to the caller
//!
//! An operation future dropped between steps 3 and 6 still dispatches its
//! FINISH action, with [`CoreDataError::Aborted`], before the lock is released.
//!
//! Edits are synchronous and never touch the network or the canonical records.

mod delete;
mod edit;
mod save;

use crate::error::CoreDataError;
use crate::locks::LockCoordinator;
use crate::store::{CoreData, StoreAction};
use crate::transport::Transport;
use log::warn;
use std::fmt;
use std::sync::Arc;

/// Options for [`CoreData::save_entity_record`](crate::CoreData::save_entity_record)
#[derive(Clone, Default)]
pub struct SaveOptions {
    /// Save to the record's autosave endpoint instead of the record itself
    pub is_autosave: bool,
    /// Route the request through this transport instead of the store's
    pub fetch: Option<Arc<dyn Transport>>,
    /// Take the record lock through this coordinator instead of the store's
    pub locks: Option<Arc<dyn LockCoordinator>>,
}

impl SaveOptions {
    pub fn autosave() -> Self {
        Self {
            is_autosave: true,
            ..Self::default()
        }
    }

    pub fn with_fetch(mut self, fetch: Arc<dyn Transport>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn LockCoordinator>) -> Self {
        self.locks = Some(locks);
        self
    }
}

impl fmt::Debug for SaveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveOptions")
            .field("is_autosave", &self.is_autosave)
            .field("custom_fetch", &self.fetch.is_some())
            .field("custom_locks", &self.locks.is_some())
            .finish()
    }
}

/// Options for [`CoreData::delete_entity_record`](crate::CoreData::delete_entity_record)
#[derive(Clone, Default)]
pub struct DeleteOptions {
    /// Route the request through this transport instead of the store's
    pub fetch: Option<Arc<dyn Transport>>,
    /// Take the record lock through this coordinator instead of the store's
    pub locks: Option<Arc<dyn LockCoordinator>>,
}

impl DeleteOptions {
    pub fn with_fetch(mut self, fetch: Arc<dyn Transport>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn LockCoordinator>) -> Self {
        self.locks = Some(locks);
        self
    }
}

impl fmt::Debug for DeleteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteOptions")
            .field("custom_fetch", &self.fetch.is_some())
            .field("custom_locks", &self.locks.is_some())
            .finish()
    }
}

type FinishAction = Box<dyn FnOnce(Option<CoreDataError>) -> StoreAction + Send>;

/// FINISH action owed by an operation that has dispatched its START.
///
/// Dropping it unfinished dispatches the action with [`CoreDataError::Aborted`].
/// Declare it after the operation's lock guard so it drops first.
struct PendingFinish<'a> {
    store: &'a CoreData,
    finish: Option<FinishAction>,
}

impl<'a> PendingFinish<'a> {
    fn new(
        store: &'a CoreData,
        finish: impl FnOnce(Option<CoreDataError>) -> StoreAction + Send + 'static,
    ) -> Self {
        Self {
            store,
            finish: Some(Box::new(finish)),
        }
    }

    fn finish(mut self, error: Option<CoreDataError>) {
        if let Some(finish) = self.finish.take() {
            self.store.dispatch(finish(error));
        }
    }
}

impl Drop for PendingFinish<'_> {
    fn drop(&mut self) {
        if let Some(finish) = self.finish.take() {
            let action = finish(Some(CoreDataError::Aborted));
            warn!("⚠️ {} dispatched for a dropped operation", action.action_type());
            self.store.dispatch(action);
        }
    }
}
