//! In-process store with per-connection disconnect hooks.
//!
//! Each [`MemoryConnection`] plays the part of one client's link to the
//! store. Dropping it, or calling [`MemoryConnection::disconnect`], makes
//! the store run that connection's registered removes, the same way the
//! WebSocket server does when a socket closes. [`MemoryConnection::abandon`]
//! models a link the store never sees close: its hooks are lost.

use parking_lot::Mutex;
use scribble_core::StorePath;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::{StoreClient, StoreError, StoreTree, Subscription};

struct Watcher {
    path: StorePath,
    tx: watch::Sender<Value>,
}

#[derive(Default)]
struct Shared {
    tree: StoreTree,
    watchers: Vec<Watcher>,
    hooks: HashMap<u64, Vec<StorePath>>,
    next_connection: u64,
    live_connections: usize,
}

impl Shared {
    /// `None` removes.
    fn apply(&mut self, path: &StorePath, value: Option<Value>) {
        let changed = match value {
            Some(value) => self.tree.set(path, value),
            None => self.tree.remove(path),
        };
        if changed {
            self.notify(path);
        }
    }

    fn notify(&mut self, changed: &StorePath) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in &self.watchers {
            if !watcher.path.overlaps(changed) {
                continue;
            }
            let current = self.tree.get(&watcher.path);
            watcher.tx.send_if_modified(|seen| {
                if *seen == current {
                    false
                } else {
                    *seen = current;
                    true
                }
            });
        }
    }
}

/// Shared tree. Clones refer to the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection.
    pub fn connect(&self) -> MemoryConnection {
        let mut shared = self.shared.lock();
        shared.next_connection += 1;
        shared.live_connections += 1;
        MemoryConnection {
            id: shared.next_connection,
            shared: Arc::clone(&self.shared),
            online: AtomicBool::new(true),
        }
    }

    /// Read the value at `path` directly.
    pub fn get(&self, path: &StorePath) -> Value {
        self.shared.lock().tree.get(path)
    }

    pub fn live_connections(&self) -> usize {
        self.shared.lock().live_connections
    }

    /// Removes registered across all live connections.
    pub fn pending_disconnect_hooks(&self) -> usize {
        self.shared.lock().hooks.values().map(Vec::len).sum()
    }
}

pub struct MemoryConnection {
    id: u64,
    shared: Arc<Mutex<Shared>>,
    online: AtomicBool,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Drop the link. The store runs this connection's disconnect hooks and
    /// every later operation fails with [`StoreError::Unavailable`].
    pub fn disconnect(&self) {
        if !self.online.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut shared = self.shared.lock();
        shared.live_connections = shared.live_connections.saturating_sub(1);
        let Some(paths) = shared.hooks.remove(&self.id) else {
            return;
        };
        log::debug!("Connection {} closed, running {} disconnect hook(s)", self.id, paths.len());
        for path in paths {
            shared.apply(&path, None);
        }
    }

    /// Vanish without the store noticing. Registered hooks never run.
    pub fn abandon(self) {
        let mut shared = self.shared.lock();
        if let Some(paths) = shared.hooks.remove(&self.id) {
            log::debug!("Connection {} abandoned, {} hook(s) lost", self.id, paths.len());
        }
        if self.online.swap(false, Ordering::AcqRel) {
            shared.live_connections = shared.live_connections.saturating_sub(1);
        }
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl StoreClient for MemoryConnection {
    fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError> {
        self.ensure_online()?;
        let mut shared = self.shared.lock();
        let (tx, rx) = watch::channel(shared.tree.get(path));
        shared.watchers.push(Watcher {
            path: path.clone(),
            tx,
        });
        Ok(Subscription::new(path.clone(), rx))
    }

    fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.shared.lock().apply(path, Some(value));
        Ok(())
    }

    fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.shared.lock().apply(path, None);
        Ok(())
    }

    fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut shared = self.shared.lock();
        let hooks = shared.hooks.entry(self.id).or_default();
        if !hooks.contains(path) {
            hooks.push(path.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    #[test]
    fn test_write_visible_to_other_connections() {
        let store = MemoryStore::new();
        let a = store.connect();
        let b = store.connect();
        a.write(&p("cursors/a"), json!({"x": 1})).unwrap();

        let mut sub = b.subscribe(&StorePath::cursors()).unwrap();
        assert_eq!(sub.current(), json!({"a": {"x": 1}}));
        assert_eq!(store.live_connections(), 2);
    }

    #[tokio::test]
    async fn test_subscription_gets_full_snapshot() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut sub = conn.subscribe(&StorePath::strokes()).unwrap();
        assert_eq!(sub.current(), Value::Null);

        conn.write(&p("strokes/u1/s1"), json!(1)).unwrap();
        conn.write(&p("strokes/u2/s1"), json!(2)).unwrap();
        let value = sub.changed().await.unwrap();
        assert_eq!(value, json!({"u1": {"s1": 1}, "u2": {"s1": 2}}));
    }

    #[test]
    fn test_unrelated_write_does_not_notify() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut sub = conn.subscribe(&StorePath::strokes()).unwrap();
        sub.current();
        conn.write(&p("cursors/u1"), json!(1)).unwrap();
        assert!(!sub.has_changed());
        conn.write(&p("strokes/u1/s1"), json!(1)).unwrap();
        assert!(sub.has_changed());
    }

    #[test]
    fn test_hooks_run_on_drop() {
        let store = MemoryStore::new();
        let observer = store.connect();
        {
            let conn = store.connect();
            conn.write(&p("onlineUsers/u1"), json!({"email": "a"})).unwrap();
            conn.on_disconnect_remove(&p("onlineUsers/u1")).unwrap();
            conn.on_disconnect_remove(&p("onlineUsers/u1")).unwrap();
            assert_eq!(store.pending_disconnect_hooks(), 1);
        }
        assert_eq!(observer.subscribe(&StorePath::online_users()).unwrap().current(), Value::Null);
        assert_eq!(store.pending_disconnect_hooks(), 0);
        assert_eq!(store.live_connections(), 1);
    }

    #[test]
    fn test_disconnect_makes_connection_unavailable() {
        let store = MemoryStore::new();
        let conn = store.connect();
        conn.disconnect();
        assert!(!conn.is_online());
        assert!(matches!(conn.write(&p("a"), json!(1)), Err(StoreError::Unavailable)));
        assert!(matches!(conn.subscribe(&p("a")), Err(StoreError::Unavailable)));
        // Second disconnect is a no-op.
        conn.disconnect();
        assert_eq!(store.live_connections(), 0);
    }

    #[test]
    fn test_abandon_loses_hooks() {
        let store = MemoryStore::new();
        let conn = store.connect();
        conn.write(&p("cursors/u1"), json!({"x": 1})).unwrap();
        conn.on_disconnect_remove(&p("cursors/u1")).unwrap();
        conn.abandon();
        assert_eq!(store.get(&p("cursors/u1")), json!({"x": 1}));
        assert_eq!(store.live_connections(), 0);
    }

    #[test]
    fn test_dropped_subscriptions_are_pruned() {
        let store = MemoryStore::new();
        let conn = store.connect();
        drop(conn.subscribe(&StorePath::cursors()).unwrap());
        conn.write(&p("cursors/u1"), json!(1)).unwrap();
        assert!(store.shared.lock().watchers.is_empty());
    }
}
