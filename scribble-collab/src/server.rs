//! WebSocket store server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── StoreTree (authoritative JSON)
//!            ├── connection task ────┤
//! Client B ──┘   (subscriptions,     └── BroadcastGroup (changed paths)
//!                 disconnect hooks)             │
//!                          ┌────────────────────┼──────────────┐
//!                          ▼                    ▼              ▼
//!                       Client A             Client B       Client C
//! ```
//!
//! Each connection task owns:
//! - the paths it subscribes to, with the last snapshot it sent for each
//! - the removes it must run when its socket closes, for any reason
//!
//! The tree lives only in memory. Restarting the server empties the canvas.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use scribble_core::StorePath;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::broadcast::{BroadcastGroup, PeerInfo};
use crate::protocol::{parse_path, parse_value, ProtocolError, StoreFrame};
use crate::store::StoreTree;

/// Server configuration. Loaded from `SCRIBBLE_*` environment variables by
/// [`crate::config::load_server_config`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Change announcements buffered per connection before it lags
    pub broadcast_capacity: usize,
    /// Connections beyond this are closed on accept
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            max_connections: 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub disconnect_hooks_run: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// State shared by every connection task.
#[derive(Clone)]
struct Shared {
    tree: Arc<Mutex<StoreTree>>,
    changes: Arc<BroadcastGroup>,
    stats: Arc<RwLock<ServerStats>>,
}

impl Shared {
    /// `None` removes. Announces the path if the tree changed.
    fn apply(&self, path: &StorePath, value: Option<Value>, origin: u64) -> bool {
        let changed = {
            let mut tree = self.tree.lock();
            match value {
                Some(value) => tree.set(path, value),
                None => tree.remove(path),
            }
        };
        if changed {
            self.changes.announce(path.clone(), origin);
        }
        changed
    }
}

/// Per-socket bookkeeping.
struct Connection {
    id: u64,
    /// Last value sent for each subscribed path.
    subscriptions: HashMap<StorePath, Value>,
    disconnect_hooks: Vec<StorePath>,
}

impl Connection {
    fn new(id: u64) -> Self {
        Self {
            id,
            subscriptions: HashMap::new(),
            disconnect_hooks: Vec::new(),
        }
    }

    /// Apply one client frame. Returns the frames to send back.
    fn handle_frame(&mut self, shared: &Shared, frame: StoreFrame) -> Result<Vec<StoreFrame>, ProtocolError> {
        match frame {
            StoreFrame::Subscribe { path } => {
                let path = parse_path(&path)?;
                let value = shared.tree.lock().get(&path);
                let reply = StoreFrame::snapshot(&path, &value);
                self.subscriptions.insert(path, value);
                Ok(vec![reply])
            }
            StoreFrame::Unsubscribe { path } => {
                self.subscriptions.remove(&parse_path(&path)?);
                Ok(Vec::new())
            }
            StoreFrame::Write { path, value } => {
                let path = parse_path(&path)?;
                let value = parse_value(&value)?;
                shared.apply(&path, Some(value), self.id);
                Ok(Vec::new())
            }
            StoreFrame::Remove { path } => {
                shared.apply(&parse_path(&path)?, None, self.id);
                Ok(Vec::new())
            }
            StoreFrame::OnDisconnectRemove { path } => {
                let path = parse_path(&path)?;
                if !self.disconnect_hooks.contains(&path) {
                    self.disconnect_hooks.push(path);
                }
                Ok(Vec::new())
            }
            StoreFrame::CancelOnDisconnect { path } => {
                let path = parse_path(&path)?;
                self.disconnect_hooks.retain(|p| *p != path);
                Ok(Vec::new())
            }
            StoreFrame::Ping => Ok(vec![StoreFrame::Pong]),
            other @ (StoreFrame::Snapshot { .. } | StoreFrame::Pong | StoreFrame::Error { .. }) => {
                Err(ProtocolError::UnexpectedFrame(other.kind()))
            }
        }
    }

    /// Snapshots for subscriptions whose value differs from what was last
    /// sent. `changed = None` checks every subscription.
    fn refresh(&mut self, shared: &Shared, changed: Option<&StorePath>) -> Vec<StoreFrame> {
        let tree = shared.tree.lock();
        let mut frames = Vec::new();
        for (path, last_sent) in self.subscriptions.iter_mut() {
            if changed.is_some_and(|c| !path.overlaps(c)) {
                continue;
            }
            let current = tree.get(path);
            if current != *last_sent {
                frames.push(StoreFrame::snapshot(path, &current));
                *last_sent = current;
            }
        }
        frames
    }

    /// Run registered removes. Returns how many ran.
    fn run_disconnect_hooks(&mut self, shared: &Shared) -> usize {
        let hooks = std::mem::take(&mut self.disconnect_hooks);
        for path in &hooks {
            shared.apply(path, None, self.id);
        }
        hooks.len()
    }
}

/// The store server.
pub struct StoreServer {
    config: ServerConfig,
    shared: Shared,
    next_connection: Arc<AtomicU64>,
    /// Accepted sockets not yet closed, handshakes in flight included.
    open_slots: Arc<AtomicUsize>,
}

impl StoreServer {
    pub fn new(config: ServerConfig) -> Self {
        let changes = Arc::new(BroadcastGroup::new(config.broadcast_capacity));
        Self {
            config,
            shared: Shared {
                tree: Arc::new(Mutex::new(StoreTree::new())),
                changes,
                stats: Arc::new(RwLock::new(ServerStats::default())),
            },
            next_connection: Arc::new(AtomicU64::new(1)),
            open_slots: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Store server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            // Held from accept, through the handshake, until close.
            let open = self.open_slots.fetch_add(1, Ordering::AcqRel);
            if open >= self.config.max_connections {
                self.open_slots.fetch_sub(1, Ordering::AcqRel);
                log::warn!("Rejecting {addr}: {open} connections already open");
                self.shared.stats.write().await.rejected_connections += 1;
                drop(stream);
                continue;
            }

            let shared = self.shared.clone();
            let slots = Arc::clone(&self.open_slots);
            let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, id, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
                slots.fetch_sub(1, Ordering::AcqRel);
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        id: u64,
        shared: Shared,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        {
            let mut s = shared.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }
        let mut changes_rx = shared
            .changes
            .add_peer(PeerInfo {
                connection_id: id,
                addr,
                connected_at: Utc::now().timestamp_millis(),
            })
            .await;
        log::info!("Connection {id} established from {addr}");

        let mut conn = Connection::new(id);
        let outcome: Result<(), ServerError> = async {
            loop {
                let replies = tokio::select! {
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = shared.stats.write().await;
                                s.total_frames += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            match StoreFrame::decode(&data) {
                                Ok(frame) => {
                                    let kind = frame.kind();
                                    conn.handle_frame(&shared, frame).unwrap_or_else(|e| {
                                        log::debug!("Rejected {kind} frame from {addr}: {e}");
                                        vec![StoreFrame::error(e.to_string())]
                                    })
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    vec![StoreFrame::error(e.to_string())]
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                            Vec::new()
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        Some(Ok(other)) => {
                            log::debug!("Ignoring non-binary message from {addr}: {other:?}");
                            Vec::new()
                        }
                    },

                    change = changes_rx.recv() => match change {
                        Ok(event) => conn.refresh(&shared, Some(&event.path)),
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Connection {id} lagged by {skipped} changes, resending subscriptions");
                            shared.changes.record_dropped(skipped);
                            conn.refresh(&shared, None)
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                for frame in replies {
                    ws_sender.send(Message::Binary(frame.encode()?.into())).await?;
                }
            }
            Ok(())
        }
        .await;

        // The hooks run however the loop ended.
        let ran = conn.run_disconnect_hooks(&shared);
        shared.changes.remove_peer(id).await;
        {
            let mut s = shared.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.disconnect_hooks_run += ran as u64;
        }
        log::info!("Connection {id} from {addr} closed, ran {ran} disconnect hook(s)");
        outcome
    }

    pub async fn stats(&self) -> ServerStats {
        self.shared.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Current value at `path`.
    pub fn snapshot(&self, path: &StorePath) -> Value {
        self.shared.tree.lock().get(path)
    }

    pub fn broadcast(&self) -> &Arc<BroadcastGroup> {
        &self.shared.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared() -> Shared {
        StoreServer::with_defaults().shared
    }

    fn p(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.max_connections, 1024);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = StoreServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.disconnect_hooks_run, 0);
    }

    #[test]
    fn test_subscribe_replies_with_snapshot() {
        let shared = shared();
        shared.apply(&p("cursors/u1"), Some(json!({"x": 1})), 0);

        let mut conn = Connection::new(1);
        let replies = conn.handle_frame(&shared, StoreFrame::subscribe(&StorePath::cursors())).unwrap();
        assert_eq!(replies, vec![StoreFrame::snapshot(&StorePath::cursors(), &json!({"u1": {"x": 1}}))]);
    }

    #[test]
    fn test_refresh_sends_only_changed_overlapping_paths() {
        let shared = shared();
        let mut conn = Connection::new(1);
        conn.handle_frame(&shared, StoreFrame::subscribe(&StorePath::strokes())).unwrap();
        conn.handle_frame(&shared, StoreFrame::subscribe(&StorePath::cursors())).unwrap();

        let mut writer = Connection::new(2);
        writer
            .handle_frame(&shared, StoreFrame::write(&p("strokes/u2/s1"), &json!({"a": 1})))
            .unwrap();

        let frames = conn.refresh(&shared, Some(&p("strokes/u2/s1")));
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], StoreFrame::Snapshot { path, .. } if path == "strokes"));

        // Nothing new to send on a second pass.
        assert!(conn.refresh(&shared, None).is_empty());
    }

    #[test]
    fn test_disconnect_hooks_remove_paths() {
        let shared = shared();
        let mut conn = Connection::new(7);
        conn.handle_frame(&shared, StoreFrame::write(&p("onlineUsers/u7"), &json!({"email": "e"})))
            .unwrap();
        conn.handle_frame(&shared, StoreFrame::on_disconnect_remove(&p("onlineUsers/u7")))
            .unwrap();
        conn.handle_frame(&shared, StoreFrame::on_disconnect_remove(&p("onlineUsers/u7")))
            .unwrap();

        assert_eq!(conn.run_disconnect_hooks(&shared), 1);
        assert_eq!(shared.tree.lock().get(&StorePath::online_users()), Value::Null);
        assert_eq!(conn.run_disconnect_hooks(&shared), 0);
    }

    #[test]
    fn test_cancel_on_disconnect() {
        let shared = shared();
        let mut conn = Connection::new(1);
        conn.handle_frame(&shared, StoreFrame::on_disconnect_remove(&p("cursors/u1"))).unwrap();
        conn.handle_frame(&shared, StoreFrame::cancel_on_disconnect(&p("cursors/u1"))).unwrap();
        assert_eq!(conn.run_disconnect_hooks(&shared), 0);
    }

    #[test]
    fn test_ping_and_unexpected_frames() {
        let shared = shared();
        let mut conn = Connection::new(1);
        assert_eq!(conn.handle_frame(&shared, StoreFrame::Ping).unwrap(), vec![StoreFrame::Pong]);
        assert!(matches!(
            conn.handle_frame(&shared, StoreFrame::Pong),
            Err(ProtocolError::UnexpectedFrame("pong"))
        ));
    }

    #[test]
    fn test_invalid_write_is_rejected() {
        let shared = shared();
        let mut conn = Connection::new(1);
        let bad_value = StoreFrame::Write {
            path: "cursors/u1".into(),
            value: "{oops".into(),
        };
        assert!(conn.handle_frame(&shared, bad_value).is_err());
        let bad_path = StoreFrame::Remove { path: "a/$b".into() };
        assert!(conn.handle_frame(&shared, bad_path).is_err());
        assert!(shared.tree.lock().is_empty());
    }
}
