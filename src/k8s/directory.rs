//! Current endpoint set of a discovered service
//!
//! A single writer (the endpoints watcher) replaces the whole set on every
//! event; any number of readers take consistent snapshots without waiting.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Snapshot of the addresses backing a service, in discovery feed order.
pub type EndpointSet = Arc<Vec<String>>;

#[derive(Clone)]
pub struct EndpointDirectory {
    tx: Arc<watch::Sender<EndpointSet>>,
}

impl EndpointDirectory {
    /// Create a directory holding an empty set
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx: Arc::new(tx) }
    }

    /// Replace the published set
    pub(crate) fn publish(&self, addresses: Vec<String>) -> EndpointSet {
        let set = Arc::new(addresses);
        self.tx.send_replace(set.clone());
        set
    }

    /// Current set; never blocks on the writer
    pub fn snapshot(&self) -> EndpointSet {
        self.tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Receiver notified on every replacement
    pub fn subscribe(&self) -> watch::Receiver<EndpointSet> {
        self.tx.subscribe()
    }

    /// Wait until a non-empty set is published, up to `timeout`.
    /// Returns the current snapshot either way.
    pub async fn wait_populated(&self, timeout: Duration) -> EndpointSet {
        let mut rx = self.subscribe();
        let populated = tokio::time::timeout(timeout, rx.wait_for(|set| !set.is_empty()))
            .await
            .ok()
            .and_then(|waited| waited.ok().map(|set| set.clone()));

        match populated {
            Some(set) => set,
            None => self.snapshot(),
        }
    }
}

impl Default for EndpointDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EndpointDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointDirectory")
            .field("endpoints", &*self.snapshot())
            .finish()
    }
}
