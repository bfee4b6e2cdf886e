//! Live run registry: the in-memory map from run id to its execution
//! handle, owned by a single task reached by message passing rather than
//! a `RwLock<HashMap<...>>`. §4.5, §9.
//!
//! Entries are inserted on admission to the Dispatch Gate and removed on
//! terminal status, regardless of outcome. The registry is the sole
//! source of truth for live log subscription and cancellation; the
//! persistent store is authoritative for historical reads.

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use flowforge_core::ResourceId;

/// The per-run handle a registered run is reached by.
#[derive(Clone)]
pub struct RunHandle {
    pub cancellation: CancellationToken,
    pub log_tx: mpsc::Sender<String>,
}

struct Entry {
    handle: RunHandle,
    log_rx: Option<mpsc::Receiver<String>>,
}

enum Message {
    Register {
        run_id: ResourceId,
        handle: RunHandle,
        log_rx: mpsc::Receiver<String>,
    },
    Deregister {
        run_id: ResourceId,
    },
    Lookup {
        run_id: ResourceId,
        reply: oneshot::Sender<Option<RunHandle>>,
    },
    Cancel {
        run_id: ResourceId,
        reply: oneshot::Sender<bool>,
    },
    Subscribe {
        run_id: ResourceId,
        reply: oneshot::Sender<Option<mpsc::Receiver<String>>>,
    },
}

/// A cheaply cloneable handle to the registry's owning task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Message>,
}

impl RegistryHandle {
    pub async fn register(&self, run_id: ResourceId, handle: RunHandle, log_rx: mpsc::Receiver<String>) {
        let _ = self.tx.send(Message::Register { run_id, handle, log_rx }).await;
    }

    pub async fn deregister(&self, run_id: ResourceId) {
        let _ = self.tx.send(Message::Deregister { run_id }).await;
    }

    pub async fn lookup(&self, run_id: ResourceId) -> Option<RunHandle> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Lookup { run_id, reply }).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Triggers the run's cancellation token. Returns `false` if the run
    /// is not live (already terminal, or never admitted).
    pub async fn cancel(&self, run_id: ResourceId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Cancel { run_id, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Takes the run's live log receiver. Returns `None` if the run is
    /// not live or a subscriber already took the receiver.
    pub async fn subscribe(&self, run_id: ResourceId) -> Option<mpsc::Receiver<String>> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Subscribe { run_id, reply }).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}

/// Spawns the registry's owning task and returns a handle to it.
pub fn spawn() -> RegistryHandle {
    let (tx, mut rx) = mpsc::channel::<Message>(256);

    tokio::spawn(async move {
        let mut runs: HashMap<ResourceId, Entry> = HashMap::new();

        while let Some(msg) = rx.recv().await {
            match msg {
                Message::Register { run_id, handle, log_rx } => {
                    runs.insert(run_id, Entry { handle, log_rx: Some(log_rx) });
                }
                Message::Deregister { run_id } => {
                    runs.remove(&run_id);
                }
                Message::Lookup { run_id, reply } => {
                    let _ = reply.send(runs.get(&run_id).map(|e| e.handle.clone()));
                }
                Message::Cancel { run_id, reply } => {
                    let found = if let Some(entry) = runs.get(&run_id) {
                        entry.handle.cancellation.cancel();
                        true
                    } else {
                        false
                    };
                    let _ = reply.send(found);
                }
                Message::Subscribe { run_id, reply } => {
                    let taken = runs.get_mut(&run_id).and_then(|e| e.log_rx.take());
                    let _ = reply.send(taken);
                }
            }
        }
    });

    RegistryHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (RunHandle, mpsc::Receiver<String>) {
        let (log_tx, log_rx) = mpsc::channel(100);
        (
            RunHandle {
                cancellation: CancellationToken::new(),
                log_tx,
            },
            log_rx,
        )
    }

    #[tokio::test]
    async fn lookup_after_register_then_absent_after_deregister() {
        let registry = spawn();
        let run_id = ResourceId::new();
        let (h, rx) = handle();
        registry.register(run_id, h, rx).await;

        assert!(registry.lookup(run_id).await.is_some());
        registry.deregister(run_id).await;
        assert!(registry.lookup(run_id).await.is_none());
    }

    #[tokio::test]
    async fn cancel_triggers_the_token_and_reports_found() {
        let registry = spawn();
        let run_id = ResourceId::new();
        let (h, rx) = handle();
        let token = h.cancellation.clone();
        registry.register(run_id, h, rx).await;

        assert!(registry.cancel(run_id).await);
        assert!(token.is_cancelled());
        assert!(!registry.cancel(ResourceId::new()).await);
    }

    #[tokio::test]
    async fn subscribe_hands_out_the_receiver_exactly_once() {
        let registry = spawn();
        let run_id = ResourceId::new();
        let (h, rx) = handle();
        registry.register(run_id, h, rx).await;

        assert!(registry.subscribe(run_id).await.is_some());
        assert!(registry.subscribe(run_id).await.is_none());
    }
}
