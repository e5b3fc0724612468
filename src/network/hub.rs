//! Observer Hub
//!
//! Fan-out of round events to every connected observer. Each observer is
//! the outbound queue of one WebSocket connection. Delivery never waits: a
//! full queue drops the message for that observer only, and a closed queue
//! deregisters it. Per observer, messages arrive in publish order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::game::state::UserId;
use crate::network::locale::Locale;
use crate::network::protocol::ServerMessage;

/// Observer handle.
pub type ObserverId = u64;

#[derive(Debug)]
struct Observer {
    user_id: UserId,
    locale: Locale,
    sender: mpsc::Sender<ServerMessage>,
}

/// Registry of observer sinks.
#[derive(Debug, Default)]
pub struct ObserverHub {
    observers: RwLock<BTreeMap<ObserverId, Observer>>,
    next_id: AtomicU64,
}

impl ObserverHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue.
    pub async fn register(
        &self,
        user_id: UserId,
        locale: Locale,
        sender: mpsc::Sender<ServerMessage>,
    ) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().await.insert(id, Observer { user_id, locale, sender });
        debug!("Observer {} registered for user {}", id, user_id);
        id
    }

    /// Remove an observer. Returns false if it was already gone.
    pub async fn deregister(&self, id: ObserverId) -> bool {
        let removed = self.observers.write().await.remove(&id).is_some();
        if removed {
            debug!("Observer {} deregistered", id);
        }
        removed
    }

    /// Send to every observer. Returns the number of queues that accepted it.
    pub async fn publish(&self, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let observers = self.observers.read().await;
            for (id, observer) in observers.iter() {
                match observer.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Observer {} queue full, dropping message", id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        self.prune(closed).await;
        delivered
    }

    /// Send to every observer of one user, built in that observer's locale.
    pub async fn send_to_user<F>(&self, user_id: UserId, build: F) -> usize
    where
        F: Fn(Locale) -> ServerMessage,
    {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let observers = self.observers.read().await;
            for (id, observer) in observers.iter().filter(|(_, o)| o.user_id == user_id) {
                match observer.sender.try_send(build(observer.locale)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Observer {} queue full, dropping message for user {}", id, user_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        self.prune(closed).await;
        delivered
    }

    /// Number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    async fn prune(&self, closed: Vec<ObserverId>) {
        if closed.is_empty() {
            return;
        }
        let mut observers = self.observers.write().await;
        for id in closed {
            observers.remove(&id);
            debug!("Observer {} dropped (connection closed)", id);
        }
    }
}
