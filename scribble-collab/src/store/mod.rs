//! Path-addressed, observable key-value tree.
//!
//! ```text
//! StoreClient ──► MemoryConnection ──► MemoryStore (in-process tree)
//!            └──► RemoteStore ──(WebSocket)──► StoreServer (tree + fan-out)
//! ```
//!
//! Every subscription delivers the complete value at its path on each
//! change, never a diff. Writes are fire-and-forget: `Ok` means the
//! operation was accepted for delivery, not that it was applied.

pub mod memory;
pub mod tree;

pub use memory::{MemoryConnection, MemoryStore};
pub use tree::StoreTree;

use chrono::Utc;
use scribble_core::{PathError, StorePath};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("store unavailable")]
    Unavailable,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection error: {0}")]
    Connection(String),
}

/// Capability set the sync core needs from its backing store.
pub trait StoreClient: Send + Sync {
    /// Observe the full value at `path`.
    fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError>;

    /// Last-writer-wins set. Writing `null` removes the path.
    fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Remove `path` and everything below it. Removing a missing path is `Ok`.
    fn remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Allocate a fresh, collision-free child key under `parent`.
    fn push_unique(&self, parent: &StorePath) -> Result<StorePath, StoreError> {
        Ok(parent.child(&new_push_key())?)
    }

    /// Have the store remove `path` when this connection drops, for any
    /// reason, without further action from this client.
    fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError>;
}

/// Child key that sorts by creation time and never collides.
pub fn new_push_key() -> String {
    format!("{:013}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
}

/// Latest-value view of one path.
///
/// Intermediate values may be skipped when updates arrive faster than they
/// are consumed; only the newest snapshot matters.
#[derive(Debug)]
pub struct Subscription {
    path: StorePath,
    rx: watch::Receiver<Value>,
}

impl Subscription {
    pub(crate) fn new(path: StorePath, rx: watch::Receiver<Value>) -> Self {
        Self { path, rx }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// The most recent snapshot, marking it as seen.
    pub fn current(&mut self) -> Value {
        self.rx.borrow_and_update().clone()
    }

    /// Whether a snapshot arrived since the last `current`/`changed`.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next snapshot.
    ///
    /// Fails with [`StoreError::Unavailable`] once the store side is gone.
    pub async fn changed(&mut self) -> Result<Value, StoreError> {
        self.rx.changed().await.map_err(|_| StoreError::Unavailable)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keys_are_unique_and_valid() {
        let parent = StorePath::strokes();
        let a = new_push_key();
        let b = new_push_key();
        assert_ne!(a, b);
        assert!(parent.child(&a).is_ok());
    }

    #[test]
    fn test_push_keys_sort_by_time() {
        let a = new_push_key();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_push_key();
        assert!(a < b);
    }

    #[tokio::test]
    async fn test_subscription_changed() {
        let (tx, rx) = watch::channel(Value::Null);
        let mut sub = Subscription::new(StorePath::cursors(), rx);
        assert_eq!(sub.current(), Value::Null);
        assert!(!sub.has_changed());

        tx.send_replace(serde_json::json!({"a": 1}));
        assert!(sub.has_changed());
        let value = sub.changed().await.unwrap();
        assert_eq!(value["a"], 1);

        drop(tx);
        assert!(matches!(sub.changed().await, Err(StoreError::Unavailable)));
    }
}
