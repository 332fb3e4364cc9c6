//! The pending-request correlation table.
//!
//! Maps an outstanding outbound request's ID to a single-shot continuation. Backed by
//! [`dashmap`] so `register`/`take` never need an external lock around the map itself.

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::context::ResponseContext;

pub type Continuation = oneshot::Sender<ResponseContext>;

#[derive(Debug, Default)]
pub struct PendingTable {
    table: DashMap<String, Continuation>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// Register a continuation for `id`. Must be called before the request frame
    /// reaches the wire, to avoid a race where the response arrives first.
    ///
    /// Registering the same ID twice is a precondition violation (unique ID generation
    /// should make it impossible). The earlier continuation is silently dropped
    /// (its awaiting future resolves to a closed-channel error) and only debug builds
    /// assert on it.
    pub fn register(&self, id: String, continuation: Continuation) {
        let previous = self.table.insert(id, continuation);
        debug_assert!(
            previous.is_none(),
            "pending request ID collision: a continuation was already registered for this ID"
        );
    }

    /// Remove and return the continuation for `id`, if any. Atomic: at most one caller
    /// ever observes `Some` for a given ID.
    pub fn take(&self, id: &str) -> Option<Continuation> {
        self.table.remove(id).map(|(_, tx)| tx)
    }

    /// Remove every pending continuation without invoking them (dropping each sender).
    /// Used at close time. See the crate-level design notes on pending-request
    /// disposition.
    pub fn drain(&self) -> Vec<Continuation> {
        let ids: Vec<String> = self.table.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.table.remove(&id).map(|(_, tx)| tx))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionRole};
    use std::sync::Arc;
    use std::time::Duration;

    fn dummy_connection() -> Arc<Connection> {
        Connection::new_detached(ConnectionRole::ClientInitiated, Duration::from_secs(300))
    }

    #[test]
    fn register_take_removes_entry() {
        let table = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        table.register("1".into(), tx);
        assert_eq!(table.len(), 1);
        assert!(table.take("1").is_some());
        assert!(table.is_empty());
        assert!(table.take("1").is_none());
    }

    #[tokio::test]
    async fn drain_drops_without_invoking() {
        let table = PendingTable::new();
        let (tx, rx) = oneshot::channel();
        table.register("1".into(), tx);
        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert!(table.is_empty());
        drop(drained);
        assert!(rx.await.is_err(), "receiver should observe a closed channel, not a response");
    }

    #[test]
    fn dummy_connection_constructs() {
        let _ = dummy_connection();
    }
}
