//! Membership notification handling.
//!
//! One consumer reads raw payloads from the `node` channel and routes each
//! to a bounded queue owned by that node's worker. A worker applies its
//! node's events strictly in arrival order; workers for different nodes
//! run concurrently. Idle workers exit and are recreated on demand.

use rollcall_common::{Action, NodeNotification, RollcallError, RollcallResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use super::Roster;

type Queues = Arc<Mutex<HashMap<String, mpsc::Sender<Action>>>>;

/// Routes notifications to per-node workers
pub struct NotificationDispatcher {
    roster: Arc<Roster>,
    queues: Queues,
    capacity: usize,
    idle: Duration,
}

impl NotificationDispatcher {
    pub fn new(roster: Arc<Roster>, capacity: usize, idle: Duration) -> Self {
        Self {
            roster,
            queues: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            idle,
        }
    }

    /// Consume raw payloads until shutdown.
    ///
    /// Malformed payloads are logged and skipped. The payload channel
    /// closing before shutdown means the roster can no longer follow the
    /// membership table, and is returned as a `Connection` error.
    pub async fn run(
        &self,
        mut payloads: mpsc::Receiver<String>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> RollcallResult<()> {
        tracing::info!("📨 Notification consumer started");

        loop {
            tokio::select! {
                payload = payloads.recv() => {
                    let Some(payload) = payload else {
                        tracing::error!("Notification stream ended");
                        return Err(RollcallError::Connection(
                            "membership notification stream ended".into(),
                        ));
                    };
                    match serde_json::from_str::<NodeNotification>(&payload) {
                        Ok(notification) => self.dispatch(notification).await,
                        Err(e) => {
                            tracing::warn!(payload = %payload, error = %e, "Ignoring malformed notification");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("📨 Notification consumer shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Queue one notification behind any pending work for the same node
    pub async fn dispatch(&self, notification: NodeNotification) {
        let NodeNotification { action, node } = notification;
        tracing::debug!(node = %node, action = %action, "Membership notification");

        let sender = {
            let mut queues = self.queues.lock().await;
            if let Some(sender) = queues.get(&node) {
                match sender.try_send(action) {
                    Ok(()) => return,
                    Err(mpsc::error::TrySendError::Full(_)) => Some(sender.clone()),
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        queues.remove(&node);
                        None
                    }
                }
            } else {
                None
            }
        };

        match sender {
            // Worker is busy; wait for room outside the lock
            Some(sender) => {
                if sender.send(action).await.is_err() {
                    tracing::warn!(node = %node, action = %action, "Node worker gone; notification dropped");
                }
            }
            None => self.spawn_worker(node, action).await,
        }
    }

    async fn spawn_worker(&self, node: String, first: Action) {
        let (tx, rx) = mpsc::channel(self.capacity);
        // Fresh channel with capacity >= 1
        let _ = tx.try_send(first);

        let mut queues = self.queues.lock().await;
        if let Some(existing) = queues.get(&node) {
            // Another dispatch raced us; keep ordering through the existing worker
            let existing = existing.clone();
            drop(queues);
            if existing.send(first).await.is_err() {
                tracing::warn!(node = %node, action = %first, "Node worker gone; notification dropped");
            }
            return;
        }
        queues.insert(node.clone(), tx);
        drop(queues);

        tokio::spawn(node_worker(
            self.roster.clone(),
            node,
            rx,
            self.queues.clone(),
            self.idle,
        ));
    }

    /// Number of live per-node workers
    #[cfg(test)]
    pub async fn workers(&self) -> usize {
        self.queues.lock().await.len()
    }
}

async fn node_worker(
    roster: Arc<Roster>,
    node: String,
    mut rx: mpsc::Receiver<Action>,
    queues: Queues,
    idle: Duration,
) {
    tracing::trace!(node = %node, "Node worker started");

    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(action)) => apply(&roster, &node, action).await,
            Ok(None) => break,
            Err(_) => {
                // Senders only push while holding this lock
                let mut queues = queues.lock().await;
                if rx.is_empty() {
                    queues.remove(&node);
                    break;
                }
            }
        }
    }

    tracing::trace!(node = %node, "Node worker exited");
}

async fn apply(roster: &Arc<Roster>, node: &str, action: Action) {
    let result = match action {
        Action::Insert | Action::Update => roster.refresh(node).await,
        Action::Delete => roster.unload_node(node).await,
    };

    match result {
        Ok(()) => {}
        Err(RollcallError::NotFound(what)) => {
            tracing::debug!(node = %node, action = %action, missing = %what, "Notification for unknown node");
        }
        Err(e) => {
            tracing::warn!(node = %node, action = %action, error = %e, "Failed to apply membership notification");
        }
    }
}
