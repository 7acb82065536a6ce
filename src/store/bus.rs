//! Action bus
//!
//! Dispatched actions are delivered to two kinds of listeners:
//! - observers, called synchronously in dispatch order (an observer sees an
//!   action before the dispatching orchestration takes its next step)
//! - channel subscribers, fed through unbounded tokio channels

use super::actions::StoreAction;
use log::warn;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Synchronous hook for dispatched actions
pub trait ActionObserver: Send + Sync {
    fn on_action(&self, action: &StoreAction);
}

impl<F> ActionObserver for F
where
    F: Fn(&StoreAction) + Send + Sync,
{
    fn on_action(&self, action: &StoreAction) {
        self(action)
    }
}

/// Receiving end of a channel subscription
pub struct ActionConsumer {
    receiver: mpsc::UnboundedReceiver<StoreAction>,
}

impl ActionConsumer {
    pub async fn recv(&mut self) -> Option<StoreAction> {
        self.receiver.recv().await
    }

    /// Receive with a timeout, `None` on timeout or disconnect
    pub async fn recv_timeout(&mut self, duration: Duration) -> Option<StoreAction> {
        timeout(duration, self.receiver.recv()).await.ok().flatten()
    }

    pub fn try_recv(&mut self) -> Option<StoreAction> {
        self.receiver.try_recv().ok()
    }

    /// Everything received so far, without waiting
    pub fn drain(&mut self) -> Vec<StoreAction> {
        let mut actions = Vec::new();
        while let Ok(action) = self.receiver.try_recv() {
            actions.push(action);
        }
        actions
    }
}

/// Fan-out of dispatched actions
#[derive(Default)]
pub struct ActionBus {
    observers: RwLock<Vec<Arc<dyn ActionObserver>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<StoreAction>>>,
}

impl ActionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn ActionObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn subscribe(&self) -> ActionConsumer {
        let (sender, receiver) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(sender),
            Err(poisoned) => poisoned.into_inner().push(sender),
        }
        ActionConsumer { receiver }
    }

    pub fn publish(&self, action: &StoreAction) {
        let observers: Vec<Arc<dyn ActionObserver>> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in observers {
            observer.on_action(action);
        }

        let mut subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.send(action.clone()).is_ok());
        if subscribers.len() < before {
            warn!(
                "Dropped {} disconnected action subscribers",
                before - subscribers.len()
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
