//! In-memory hierarchical lock engine
//!
//! Granted locks live in a tree keyed by path segment. Lock requests that
//! cannot be granted immediately wait in a queue that is re-scanned, in arrival
//! order, every time a lock is released.

use super::{Lock, LockCoordinator};
use crate::error::{CoreDataError, CoreDataResult};
use async_trait::async_trait;
use log::{debug, error};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct LockNode {
    locks: Vec<Lock>,
    children: HashMap<String, LockNode>,
}

impl LockNode {
    fn descendants_conflict(&self, exclusive: bool) -> bool {
        self.children.values().any(|child| {
            has_conflicting_lock(exclusive, &child.locks) || child.descendants_conflict(exclusive)
        })
    }

    fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.children.is_empty()
    }
}

struct PendingRequest {
    path: Vec<String>,
    exclusive: bool,
    notify: oneshot::Sender<Lock>,
}

#[derive(Default)]
struct LockState {
    tree: LockNode,
    pending: Vec<PendingRequest>,
    next_id: u64,
}

fn has_conflicting_lock(exclusive: bool, locks: &[Lock]) -> bool {
    if exclusive {
        !locks.is_empty()
    } else {
        locks.iter().any(|lock| lock.exclusive)
    }
}

impl LockState {
    fn is_available(&self, path: &[String], exclusive: bool) -> bool {
        let mut node = &self.tree;
        for segment in path {
            if has_conflicting_lock(exclusive, &node.locks) {
                return false;
            }
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return true,
            }
        }

        !has_conflicting_lock(exclusive, &node.locks) && !node.descendants_conflict(exclusive)
    }

    fn grant(&mut self, path: Vec<String>, exclusive: bool) -> Lock {
        self.next_id += 1;
        let lock = Lock {
            id: self.next_id,
            path,
            exclusive,
        };

        let mut node = &mut self.tree;
        for segment in &lock.path {
            node = node.children.entry(segment.clone()).or_default();
        }
        node.locks.push(lock.clone());
        lock
    }

    fn remove(&mut self, lock: &Lock) -> bool {
        fn remove_at(node: &mut LockNode, path: &[String], id: u64) -> bool {
            match path.split_first() {
                None => {
                    let before = node.locks.len();
                    node.locks.retain(|held| held.id != id);
                    before != node.locks.len()
                }
                Some((segment, rest)) => {
                    let Some(child) = node.children.get_mut(segment) else {
                        return false;
                    };
                    let removed = remove_at(child, rest, id);
                    if child.is_empty() {
                        node.children.remove(segment);
                    }
                    removed
                }
            }
        }

        remove_at(&mut self.tree, &lock.path, lock.id)
    }

    /// Grant every pending request that has become available, oldest first
    fn process_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for request in pending {
            if request.notify.is_closed() {
                continue;
            }
            if !self.is_available(&request.path, request.exclusive) {
                self.pending.push(request);
                continue;
            }

            let lock = self.grant(request.path, request.exclusive);
            if let Err(lock) = request.notify.send(lock) {
                // waiter went away between the check and the grant
                self.remove(&lock);
            }
        }
    }
}

/// Default [`LockCoordinator`], owned by one store instance
#[derive(Default)]
pub struct LockEngine {
    state: Mutex<LockState>,
}

impl LockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        // a panic while holding the state cannot leave the tree half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a lock on `path` could be granted right now
    pub fn is_available(&self, path: &[String], exclusive: bool) -> bool {
        self.state().is_available(path, exclusive)
    }

    /// Number of requests waiting for a lock
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }
}

#[async_trait]
impl LockCoordinator for LockEngine {
    async fn acquire(&self, path: Vec<String>, exclusive: bool) -> CoreDataResult<Lock> {
        let receiver = {
            let mut state = self.state();
            if state.pending.is_empty() && state.is_available(&path, exclusive) {
                return Ok(state.grant(path, exclusive));
            }

            debug!("⏳ Waiting for lock {:?}", path);
            let (notify, receiver) = oneshot::channel();
            state.pending.push(PendingRequest {
                path,
                exclusive,
                notify,
            });
            state.process_pending();
            receiver
        };

        receiver.await.map_err(|_| {
            error!("❌ Lock engine dropped a pending lock request");
            CoreDataError::Lock("lock request was dropped".to_string())
        })
    }

    fn release(&self, lock: Lock) {
        let mut state = self.state();
        if !state.remove(&lock) {
            error!("❌ Released lock {:?} that was not held", lock.path);
        }
        state.process_pending();
    }
}
