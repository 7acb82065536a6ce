//! # Lock Coordinator
//!
//! Saves and deletes of the same record must not overlap. Each orchestration
//! takes an exclusive lock on the record's path
//! (`["entities", "data", kind, name, recordId]`) before it emits its START
//! action and releases it after its FINISH action.
//!
//! Locks are hierarchical: a lock conflicts with locks held on its ancestors,
//! itself and its descendants. Exclusive locks conflict with everything,
//! shared locks only with exclusive ones. See [`LockEngine`].

pub mod engine;

pub use engine::LockEngine;

use crate::entities::RecordId;
use crate::error::CoreDataResult;
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::sync::Arc;

/// A granted lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lock {
    pub id: u64,
    pub path: Vec<String>,
    pub exclusive: bool,
}

/// Acquires and releases path locks.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Wait until the lock is available and take it
    async fn acquire(&self, path: Vec<String>, exclusive: bool) -> CoreDataResult<Lock>;

    /// Give a lock back, waking waiters that can now proceed
    fn release(&self, lock: Lock);
}

/// Lock path for one record.
///
/// Creations have no identifier yet; they get a fresh UUID segment so they
/// never wait on each other.
pub fn record_lock_path(kind: &str, name: &str, record_id: Option<&RecordId>) -> Vec<String> {
    let last = match record_id {
        Some(id) => id.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };
    vec![
        "entities".to_string(),
        "data".to_string(),
        kind.to_string(),
        name.to_string(),
        last,
    ]
}

/// Holds a lock until [`LockGuard::release`] is called or the guard is dropped
pub struct LockGuard {
    coordinator: Arc<dyn LockCoordinator>,
    lock: Option<Lock>,
}

impl LockGuard {
    pub async fn acquire(
        coordinator: Arc<dyn LockCoordinator>,
        path: Vec<String>,
        exclusive: bool,
    ) -> CoreDataResult<Self> {
        let lock = coordinator.acquire(path, exclusive).await?;
        debug!("🔒 Acquired lock {:?}", lock.path);
        Ok(Self {
            coordinator,
            lock: Some(lock),
        })
    }

    pub fn path(&self) -> &[String] {
        self.lock.as_ref().map(|lock| lock.path.as_slice()).unwrap_or(&[])
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(lock) = self.lock.take() {
            debug!("🔓 Releasing lock {:?}", lock.path);
            self.coordinator.release(lock);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
